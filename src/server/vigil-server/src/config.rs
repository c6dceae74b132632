//! Server configuration: TOML file values overridden by flags and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use vigil_lifecycle::{EngineConfig, DEFAULT_PAGE_LIMIT};

/// Settings read from the configuration file.
///
/// Every field has a default, so the server starts without a file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Directory holding the per-tenant SQLite databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Tenant whose database this process serves.
    #[serde(default = "default_tenant")]
    pub tenant: String,

    /// File containing the base64 master key.
    #[serde(default)]
    pub master_key_file: Option<PathBuf>,

    /// Seconds between rotation scheduler passes.
    #[serde(default = "default_rotation_period_secs")]
    pub rotation_period_secs: u64,

    /// Upper bound on a certificate issuance, in seconds.
    #[serde(default = "default_issuance_timeout_secs")]
    pub issuance_timeout_secs: u64,

    /// Length of generated passwords.
    #[serde(default = "default_password_length")]
    pub password_length: usize,

    /// Page size of listings that give no limit.
    #[serde(default = "default_page_limit")]
    pub default_page_limit: usize,
}

fn default_bind() -> String {
    "0.0.0.0:8300".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_rotation_period_secs() -> u64 {
    60
}

fn default_issuance_timeout_secs() -> u64 {
    120
}

fn default_password_length() -> usize {
    32
}

fn default_page_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: default_data_dir(),
            tenant: default_tenant(),
            master_key_file: None,
            rotation_period_secs: default_rotation_period_secs(),
            issuance_timeout_secs: default_issuance_timeout_secs(),
            password_length: default_password_length(),
            default_page_limit: default_page_limit(),
        }
    }
}

impl ServerConfig {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Interval of the rotation scheduler.
    pub fn rotation_period(&self) -> Duration {
        Duration::from_secs(self.rotation_period_secs.max(1))
    }

    /// Engine tuning derived from the file.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            issuance_timeout: Duration::from_secs(self.issuance_timeout_secs),
            password_length: self.password_length,
            default_page_limit: self.default_page_limit,
        }
    }
}
