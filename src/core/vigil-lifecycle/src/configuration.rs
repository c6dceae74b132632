//! Secrets engine configuration.
//!
//! Public certificates name the certificate authority and DNS provider they
//! use, private certificates name a certificate template, and IAM credentials
//! need the API key the provider acts with. Those names and keys are set per
//! secret type before secrets of the type can be created.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use vigil_storage::StorageBackend;

use crate::error::LifecycleError;
use crate::model::SecretType;

const CONFIG_PREFIX: &str = "config/";

/// A named configuration entry: a certificate authority, a DNS provider or a
/// certificate template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigElement {
    /// Name secrets refer to.
    pub name: String,
    /// Provider specific settings.
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Certificate authorities and DNS providers for public certificates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicCertConfiguration {
    /// ACME certificate authorities.
    #[serde(default)]
    pub certificate_authorities: Vec<ConfigElement>,
    /// DNS providers answering DNS-01 challenges.
    #[serde(default)]
    pub dns_providers: Vec<ConfigElement>,
}

/// Certificate authorities and templates for private certificates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivateCertConfiguration {
    /// Root and intermediate authorities.
    #[serde(default)]
    pub certificate_authorities: Vec<ConfigElement>,
    /// Certificate templates.
    #[serde(default)]
    pub templates: Vec<ConfigElement>,
}

/// IAM settings as shown to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IamConfiguration {
    /// SHA-256 of the configured API key.
    pub api_key_hash: String,
}

/// Configuration of one secrets engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "secret_type", rename_all = "snake_case")]
pub enum Configuration {
    /// `public_cert` engine.
    PublicCert(PublicCertConfiguration),
    /// `private_cert` engine.
    PrivateCert(PrivateCertConfiguration),
    /// `iam_credentials` engine.
    IamCredentials(IamConfiguration),
}

impl Configuration {
    /// Secret type the configuration applies to.
    pub fn secret_type(&self) -> SecretType {
        match self {
            Configuration::PublicCert(_) => SecretType::PublicCert,
            Configuration::PrivateCert(_) => SecretType::PrivateCert,
            Configuration::IamCredentials(_) => SecretType::IamCredentials,
        }
    }
}

/// A configuration change as sent by a caller.
#[derive(Clone, PartialEq)]
pub enum ConfigurationUpdate {
    /// Replaces the public certificate configuration.
    PublicCert(PublicCertConfiguration),
    /// Replaces the private certificate configuration.
    PrivateCert(PrivateCertConfiguration),
    /// Sets the API key used to issue IAM credentials.
    IamCredentials {
        /// The key, sealed before it is stored.
        api_key: String,
    },
}

impl std::fmt::Debug for ConfigurationUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigurationUpdate::PublicCert(c) => f.debug_tuple("PublicCert").field(c).finish(),
            ConfigurationUpdate::PrivateCert(c) => f.debug_tuple("PrivateCert").field(c).finish(),
            ConfigurationUpdate::IamCredentials { .. } => f
                .debug_struct("IamCredentials")
                .field("api_key", &"[REDACTED]")
                .finish(),
        }
    }
}

#[derive(Deserialize)]
struct IamConfigurationBody {
    api_key: String,
}

impl ConfigurationUpdate {
    /// Parses the JSON body of a configuration change for `secret_type`.
    ///
    /// # Errors
    ///
    /// `NotFound` for types without an engine configuration, `Validation`
    /// for malformed bodies.
    pub fn from_json(secret_type: SecretType, body: Value) -> Result<Self, LifecycleError> {
        let invalid = |e: serde_json::Error| {
            LifecycleError::Validation(format!("invalid {secret_type} configuration: {e}"))
        };
        let update = match secret_type {
            SecretType::PublicCert => {
                ConfigurationUpdate::PublicCert(serde_json::from_value(body).map_err(invalid)?)
            }
            SecretType::PrivateCert => {
                ConfigurationUpdate::PrivateCert(serde_json::from_value(body).map_err(invalid)?)
            }
            SecretType::IamCredentials => {
                let body: IamConfigurationBody = serde_json::from_value(body).map_err(invalid)?;
                ConfigurationUpdate::IamCredentials {
                    api_key: body.api_key,
                }
            }
            other => return Err(not_configurable(other)),
        };
        update.validate()?;
        Ok(update)
    }

    /// Secret type the change applies to.
    pub fn secret_type(&self) -> SecretType {
        match self {
            ConfigurationUpdate::PublicCert(_) => SecretType::PublicCert,
            ConfigurationUpdate::PrivateCert(_) => SecretType::PrivateCert,
            ConfigurationUpdate::IamCredentials { .. } => SecretType::IamCredentials,
        }
    }

    /// Checks element names and the IAM key.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        match self {
            ConfigurationUpdate::PublicCert(c) => {
                validate_elements("certificate authority", &c.certificate_authorities)?;
                validate_elements("DNS provider", &c.dns_providers)
            }
            ConfigurationUpdate::PrivateCert(c) => {
                validate_elements("certificate authority", &c.certificate_authorities)?;
                validate_elements("template", &c.templates)
            }
            ConfigurationUpdate::IamCredentials { api_key } => {
                if api_key.trim().is_empty() {
                    return Err(LifecycleError::Validation("api_key cannot be empty".into()));
                }
                Ok(())
            }
        }
    }
}

fn not_configurable(secret_type: SecretType) -> LifecycleError {
    LifecycleError::NotFound(format!("{secret_type} has no engine configuration"))
}

fn validate_elements(what: &str, elements: &[ConfigElement]) -> Result<(), LifecycleError> {
    let mut seen = std::collections::HashSet::new();
    for element in elements {
        let len = element.name.chars().count();
        if !(2..=128).contains(&len)
            || !element
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(LifecycleError::Validation(format!(
                "invalid {what} name: {:?}",
                element.name
            )));
        }
        if !seen.insert(element.name.as_str()) {
            return Err(LifecycleError::Validation(format!(
                "duplicate {what} name: {}",
                element.name
            )));
        }
    }
    Ok(())
}

fn has(elements: &[ConfigElement], name: &str) -> bool {
    elements.iter().any(|e| e.name == name)
}

/// Persisted form. The IAM key is only ever stored sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredConfiguration {
    pub configuration: Configuration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_api_key: Option<String>,
}

fn storage_key(secret_type: SecretType) -> String {
    format!("{CONFIG_PREFIX}{secret_type}")
}

/// Persistent engine configurations, one per configurable secret type.
pub struct ConfigurationRegistry {
    storage: Arc<dyn StorageBackend>,
    entries: RwLock<BTreeMap<SecretType, StoredConfiguration>>,
}

impl ConfigurationRegistry {
    /// Loads every stored configuration.
    pub async fn load(storage: Arc<dyn StorageBackend>) -> Result<Self, LifecycleError> {
        let mut entries = BTreeMap::new();
        for key in storage.list(CONFIG_PREFIX).await? {
            if let Some(raw) = storage.get(&key).await? {
                let stored: StoredConfiguration = serde_json::from_slice(&raw)?;
                entries.insert(stored.configuration.secret_type(), stored);
            }
        }
        debug!(configurations = entries.len(), "Engine configurations loaded");
        Ok(Self {
            storage,
            entries: RwLock::new(entries),
        })
    }

    /// The configuration of `secret_type`.
    pub async fn get(&self, secret_type: SecretType) -> Result<Configuration, LifecycleError> {
        if !matches!(
            secret_type,
            SecretType::PublicCert | SecretType::PrivateCert | SecretType::IamCredentials
        ) {
            return Err(not_configurable(secret_type));
        }
        self.entries
            .read()
            .await
            .get(&secret_type)
            .map(|s| s.configuration.clone())
            .ok_or_else(|| LifecycleError::NotFound(format!("{secret_type} configuration")))
    }

    pub(crate) async fn stored(&self, secret_type: SecretType) -> Option<StoredConfiguration> {
        self.entries.read().await.get(&secret_type).cloned()
    }

    /// Replaces the configuration of its secret type.
    pub(crate) async fn put(
        &self,
        stored: StoredConfiguration,
        actor: Option<&str>,
    ) -> Result<Configuration, LifecycleError> {
        let secret_type = stored.configuration.secret_type();
        let mut entries = self.entries.write().await;
        let key = storage_key(secret_type);
        let raw = serde_json::to_vec(&stored)?;
        match actor {
            Some(actor) => self.storage.put_as(&key, &raw, actor).await?,
            None => self.storage.put(&key, &raw).await?,
        }
        let configuration = stored.configuration.clone();
        entries.insert(secret_type, stored);

        info!(secret_type = %secret_type, "Engine configuration updated");
        Ok(configuration)
    }

    /// Checks that the names a public certificate refers to are configured.
    pub async fn check_public_cert(&self, ca: &str, dns: &str) -> Result<(), LifecycleError> {
        let entries = self.entries.read().await;
        let Some(Configuration::PublicCert(config)) =
            entries.get(&SecretType::PublicCert).map(|s| &s.configuration)
        else {
            return Err(LifecycleError::Validation(
                "the public_cert engine is not configured".into(),
            ));
        };
        if !has(&config.certificate_authorities, ca) {
            return Err(LifecycleError::Validation(format!(
                "certificate authority {ca} is not configured"
            )));
        }
        if !has(&config.dns_providers, dns) {
            return Err(LifecycleError::Validation(format!(
                "DNS provider {dns} is not configured"
            )));
        }
        Ok(())
    }

    /// Checks that a private certificate template is configured.
    pub async fn check_private_cert(&self, template: &str) -> Result<(), LifecycleError> {
        let entries = self.entries.read().await;
        let Some(Configuration::PrivateCert(config)) =
            entries.get(&SecretType::PrivateCert).map(|s| &s.configuration)
        else {
            return Err(LifecycleError::Validation(
                "the private_cert engine is not configured".into(),
            ));
        };
        if !has(&config.templates, template) {
            return Err(LifecycleError::Validation(format!(
                "certificate template {template} is not configured"
            )));
        }
        Ok(())
    }

    /// Checks that an IAM API key is configured.
    pub async fn check_iam(&self) -> Result<(), LifecycleError> {
        if self.entries.read().await.contains_key(&SecretType::IamCredentials) {
            Ok(())
        } else {
            Err(LifecycleError::Validation(
                "the iam_credentials engine is not configured".into(),
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_storage::MemoryBackend;

    fn element(name: &str) -> ConfigElement {
        ConfigElement {
            name: name.into(),
            config: Map::new(),
        }
    }

    fn public(ca: &str, dns: &str) -> StoredConfiguration {
        StoredConfiguration {
            configuration: Configuration::PublicCert(PublicCertConfiguration {
                certificate_authorities: vec![element(ca)],
                dns_providers: vec![element(dns)],
            }),
            sealed_api_key: None,
        }
    }

    #[test]
    fn test_parse_by_type() {
        let update = ConfigurationUpdate::from_json(
            SecretType::PrivateCert,
            json!({"templates": [{"name": "server", "config": {"max_ttl": "90d"}}]}),
        )
        .unwrap();
        let ConfigurationUpdate::PrivateCert(config) = update else {
            panic!("expected a private_cert configuration");
        };
        assert_eq!(config.templates[0].config["max_ttl"], "90d");
        assert!(config.certificate_authorities.is_empty());

        let update =
            ConfigurationUpdate::from_json(SecretType::IamCredentials, json!({"api_key": "k"}))
                .unwrap();
        assert!(!format!("{update:?}").contains("\"k\""));

        assert!(matches!(
            ConfigurationUpdate::from_json(SecretType::Kv, json!({})),
            Err(LifecycleError::NotFound(_))
        ));
        assert!(matches!(
            ConfigurationUpdate::from_json(SecretType::IamCredentials, json!({"api_key": " "})),
            Err(LifecycleError::Validation(_))
        ));
    }

    #[test]
    fn test_element_names_are_checked() {
        let dup = json!({"dns_providers": [{"name": "cis"}, {"name": "cis"}]});
        assert!(matches!(
            ConfigurationUpdate::from_json(SecretType::PublicCert, dup),
            Err(LifecycleError::Validation(_))
        ));

        let bad = json!({"certificate_authorities": [{"name": "lets encrypt"}]});
        assert!(ConfigurationUpdate::from_json(SecretType::PublicCert, bad).is_err());
    }

    #[tokio::test]
    async fn test_put_check_and_reload() {
        let storage = Arc::new(MemoryBackend::new());
        let registry = ConfigurationRegistry::load(storage.clone()).await.unwrap();

        assert!(matches!(
            registry.get(SecretType::PublicCert).await,
            Err(LifecycleError::NotFound(_))
        ));
        assert!(registry.check_public_cert("letsencrypt", "cis").await.is_err());

        registry.put(public("letsencrypt", "cis"), None).await.unwrap();
        registry.check_public_cert("letsencrypt", "cis").await.unwrap();
        assert!(registry.check_public_cert("digicert", "cis").await.is_err());
        assert!(registry.check_public_cert("letsencrypt", "route53").await.is_err());
        assert!(registry.check_private_cert("server").await.is_err());
        assert!(registry.check_iam().await.is_err());

        let reloaded = ConfigurationRegistry::load(storage).await.unwrap();
        assert_eq!(
            reloaded.get(SecretType::PublicCert).await.unwrap(),
            registry.get(SecretType::PublicCert).await.unwrap()
        );
    }

    #[test]
    fn test_configuration_is_tagged_with_type() {
        let json = serde_json::to_value(Configuration::IamCredentials(IamConfiguration {
            api_key_hash: "ab".into(),
        }))
        .unwrap();
        assert_eq!(json, json!({"secret_type": "iam_credentials", "api_key_hash": "ab"}));
    }
}
