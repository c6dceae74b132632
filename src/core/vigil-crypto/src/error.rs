//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Sealing a payload failed.
    #[error("seal failed: {0}")]
    SealFailed(String),

    /// Opening a sealed payload failed (wrong key, wrong context or tampering).
    #[error("unseal failed: {0}")]
    UnsealFailed(String),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    DerivationFailed(String),

    /// Invalid key format or size.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Malformed sealed blob or generator parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
