//! AES-256-GCM sealing of secret payloads.
//!
//! Every sealed blob carries its own random nonce. The caller supplies a
//! context (secret and version identifiers) that is authenticated but not
//! encrypted, so a blob copied onto another version fails to open.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::SymmetricKey;
use crate::random::generate_nonce;

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of a GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// An encrypted payload: nonce plus ciphertext-with-tag.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedBlob {
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl SealedBlob {
    /// Encodes the blob as `base64(nonce || ciphertext)` for storage.
    pub fn to_base64(&self) -> String {
        let mut raw = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        raw.extend_from_slice(&self.nonce);
        raw.extend_from_slice(&self.ciphertext);
        BASE64.encode(raw)
    }

    /// Decodes a blob previously produced by [`SealedBlob::to_base64`].
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidInput(format!("sealed blob is not base64: {e}")))?;

        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::InvalidInput("sealed blob too short".into()));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&raw[..NONCE_SIZE]);

        Ok(Self {
            nonce,
            ciphertext: raw[NONCE_SIZE..].to_vec(),
        })
    }

    /// Length of the ciphertext including the authentication tag.
    pub fn ciphertext_len(&self) -> usize {
        self.ciphertext.len()
    }
}

impl std::fmt::Debug for SealedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedBlob")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Seals and opens payloads under a single symmetric key.
pub struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl PayloadCipher {
    /// Creates a cipher bound to `key`.
    pub fn new(key: &SymmetricKey) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypts `plaintext`, authenticating `context` alongside it.
    pub fn seal(&self, plaintext: &[u8], context: &[u8]) -> Result<SealedBlob, CryptoError> {
        let nonce = generate_nonce();
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: context,
                },
            )
            .map_err(|e| CryptoError::SealFailed(e.to_string()))?;

        Ok(SealedBlob { nonce, ciphertext })
    }

    /// Decrypts a blob sealed with the same key and context.
    pub fn open(
        &self,
        blob: &SealedBlob,
        context: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&blob.nonce),
                Payload {
                    msg: &blob.ciphertext,
                    aad: context,
                },
            )
            .map_err(|_| CryptoError::UnsealFailed("authentication failed".into()))?;

        Ok(Zeroizing::new(plaintext))
    }
}
