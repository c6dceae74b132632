//! Key derivation from the master key.
//!
//! Each secret gets its own sealing key, derived with HKDF-SHA256 from the
//! master key and a context string naming the purpose and the secret.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::aead::KEY_SIZE;
use crate::error::CryptoError;
use crate::keys::{MasterKey, SymmetricKey};

/// Salt shared by every derivation in this deployment format.
const DERIVATION_SALT: &[u8] = b"vigil-kdf-v1";

/// Derives a sealing key for `context` (e.g. `payload:<secret-id>`).
pub fn derive_subkey(master: &MasterKey, context: &str) -> Result<SymmetricKey, CryptoError> {
    if context.is_empty() {
        return Err(CryptoError::InvalidInput(
            "derivation context cannot be empty".into(),
        ));
    }

    let hkdf = Hkdf::<Sha256>::new(Some(DERIVATION_SALT), master.as_bytes());
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(context.as_bytes(), &mut okm[..])
        .map_err(|_| CryptoError::DerivationFailed("HKDF expansion failed".into()))?;

    SymmetricKey::from_bytes(&okm[..])
}

/// Hex SHA-256 digest of `data`, for showing that a credential is set
/// without revealing it.
pub fn fingerprint(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let master = MasterKey::from_bytes(&[7u8; KEY_SIZE]).unwrap();
        let a = derive_subkey(&master, "payload:abc").unwrap();
        let b = derive_subkey(&master, "payload:abc").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_contexts_are_separated() {
        let master = MasterKey::generate();
        let a = derive_subkey(&master, "payload:abc").unwrap();
        let b = derive_subkey(&master, "payload:abd").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_master_keys_are_separated() {
        let a = derive_subkey(&MasterKey::generate(), "payload:abc").unwrap();
        let b = derive_subkey(&MasterKey::generate(), "payload:abc").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(fingerprint(b"abc"), fingerprint(b"abd"));
    }

    #[test]
    fn test_empty_context_rejected() {
        let result = derive_subkey(&MasterKey::generate(), "");
        assert!(matches!(result, Err(CryptoError::InvalidInput(_))));
    }
}
