//! # Vigil Storage
//!
//! Storage abstraction layer for Vigil backends.
//!
//! The lifecycle engine persists whole secret records and secret groups as
//! opaque values under string keys. Backends only need ordered key/value
//! semantics; atomicity of a single `put` is what keeps a secret record
//! consistent.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::StorageBackend;
pub use error::StorageError;
pub use memory::MemoryBackend;
