//! # Vigil Crypto
//!
//! Cryptographic building blocks for the Vigil secret lifecycle engine:
//! - Payload sealing at rest (AES-256-GCM)
//! - Per-secret key derivation from the master key (HKDF-SHA256)
//! - Random generation of passwords, API keys and certificate serials

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod random;

pub use aead::{PayloadCipher, SealedBlob};
pub use error::CryptoError;
pub use keys::{MasterKey, SymmetricKey};
