//! Payload sealing at rest.

use uuid::Uuid;
use zeroize::Zeroizing;

use vigil_crypto::{kdf, MasterKey, PayloadCipher, SealedBlob};

use crate::error::LifecycleError;
use crate::model::SecretPayload;

/// Seals version payloads under keys derived per secret.
///
/// The version ID is bound as associated data, so a sealed payload copied
/// onto another version fails to open.
pub struct Sealer {
    master: MasterKey,
}

impl Sealer {
    /// Creates a sealer over `master`.
    pub fn new(master: MasterKey) -> Self {
        Self { master }
    }

    fn cipher(&self, secret_id: Uuid) -> Result<PayloadCipher, LifecycleError> {
        let key = kdf::derive_subkey(&self.master, &format!("payload:{secret_id}"))?;
        Ok(PayloadCipher::new(&key)?)
    }

    /// Seals `payload` for one version; returns the storable encoding.
    pub fn seal(
        &self,
        secret_id: Uuid,
        version_id: Uuid,
        payload: &SecretPayload,
    ) -> Result<String, LifecycleError> {
        let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);
        let blob = self
            .cipher(secret_id)?
            .seal(&plaintext, context(secret_id, version_id).as_bytes())?;
        Ok(blob.to_base64())
    }

    /// Opens a payload sealed by [`Sealer::seal`].
    pub fn open(
        &self,
        secret_id: Uuid,
        version_id: Uuid,
        sealed: &str,
    ) -> Result<SecretPayload, LifecycleError> {
        let blob = SealedBlob::from_base64(sealed)?;
        let plaintext = self
            .cipher(secret_id)?
            .open(&blob, context(secret_id, version_id).as_bytes())?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Seals an engine setting such as the IAM API key, keyed by `label`.
    pub fn seal_setting(&self, label: &str, value: &str) -> Result<String, LifecycleError> {
        let blob = self
            .setting_cipher(label)?
            .seal(value.as_bytes(), label.as_bytes())?;
        Ok(blob.to_base64())
    }

    /// Opens a setting sealed by [`Sealer::seal_setting`].
    pub fn open_setting(
        &self,
        label: &str,
        sealed: &str,
    ) -> Result<Zeroizing<String>, LifecycleError> {
        let blob = SealedBlob::from_base64(sealed)?;
        let plaintext = self.setting_cipher(label)?.open(&blob, label.as_bytes())?;
        let value = std::str::from_utf8(&plaintext)
            .map_err(|_| LifecycleError::Validation(format!("setting {label} is not UTF-8")))?;
        Ok(Zeroizing::new(value.to_string()))
    }

    fn setting_cipher(&self, label: &str) -> Result<PayloadCipher, LifecycleError> {
        let key = kdf::derive_subkey(&self.master, &format!("config:{label}"))?;
        Ok(PayloadCipher::new(&key)?)
    }
}

fn context(secret_id: Uuid, version_id: Uuid) -> String {
    format!("{secret_id}:{version_id}")
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn payload() -> SecretPayload {
        SecretPayload::Arbitrary {
            payload: "s3cr3t".into(),
        }
    }

    #[test]
    fn test_seal_open() {
        let sealer = Sealer::new(MasterKey::generate());
        let (secret, version) = (Uuid::new_v4(), Uuid::new_v4());

        let sealed = sealer.seal(secret, version, &payload()).unwrap();
        assert!(!sealed.contains("s3cr3t"));
        assert_eq!(sealer.open(secret, version, &sealed).unwrap(), payload());
    }

    #[test]
    fn test_sealed_payload_is_bound_to_version() {
        let sealer = Sealer::new(MasterKey::generate());
        let secret = Uuid::new_v4();
        let sealed = sealer.seal(secret, Uuid::new_v4(), &payload()).unwrap();

        let result = sealer.open(secret, Uuid::new_v4(), &sealed);
        assert!(matches!(result, Err(LifecycleError::Crypto(_))));

        let result = sealer.open(Uuid::new_v4(), Uuid::new_v4(), &sealed);
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_are_bound_to_label() {
        let sealer = Sealer::new(MasterKey::generate());
        let sealed = sealer.seal_setting("iam_credentials", "root-key").unwrap();
        assert!(!sealed.contains("root-key"));

        assert_eq!(
            sealer.open_setting("iam_credentials", &sealed).unwrap().as_str(),
            "root-key"
        );
        assert!(sealer.open_setting("public_cert", &sealed).is_err());
    }

    #[test]
    fn test_other_master_key_cannot_open() {
        let (secret, version) = (Uuid::new_v4(), Uuid::new_v4());
        let sealed = Sealer::new(MasterKey::generate())
            .seal(secret, version, &payload())
            .unwrap();

        let other = Sealer::new(MasterKey::generate());
        assert!(other.open(secret, version, &sealed).is_err());
    }
}
