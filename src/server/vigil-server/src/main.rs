//! Vigil Server - Main entry point.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_api::ApiState;
use vigil_crypto::MasterKey;
use vigil_lifecycle::{Collaborators, LifecycleEngine, RotationScheduler};
use vigil_storage::{MemoryBackend, StorageBackend};
use vigil_storage_sqlite::SqliteBackend;

use crate::config::ServerConfig;

#[derive(Parser)]
#[command(name = "vigil-server")]
#[command(about = "Vigil - secret lifecycle server")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/vigil.toml", env = "VIGIL_CONFIG")]
    config: PathBuf,

    /// Enable development mode (in-memory storage, generated master key)
    #[arg(long, env = "VIGIL_DEV_MODE")]
    dev: bool,

    /// Server bind address
    #[arg(long, env = "VIGIL_BIND_ADDRESS")]
    bind: Option<String>,

    /// Directory for tenant databases
    #[arg(long, env = "VIGIL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Tenant to serve
    #[arg(long, env = "VIGIL_TENANT")]
    tenant: Option<String>,

    /// Base64 master key
    #[arg(long, env = "VIGIL_MASTER_KEY", hide_env_values = true)]
    master_key: Option<String>,

    /// Seconds between rotation scheduler passes
    #[arg(long, env = "VIGIL_ROTATION_PERIOD_SECS")]
    rotation_period_secs: Option<u64>,

    /// Certificate issuance timeout in seconds
    #[arg(long, env = "VIGIL_ISSUANCE_TIMEOUT_SECS")]
    issuance_timeout_secs: Option<u64>,
}

impl Cli {
    /// Applies flags and environment over the file values.
    fn merge(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(tenant) = &self.tenant {
            config.tenant = tenant.clone();
        }
        if let Some(secs) = self.rotation_period_secs {
            config.rotation_period_secs = secs;
        }
        if let Some(secs) = self.issuance_timeout_secs {
            config.issuance_timeout_secs = secs;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = cli.merge(ServerConfig::load(&cli.config)?);

    tracing::info!("Starting Vigil server...");
    tracing::info!(bind = %config.bind, tenant = %config.tenant, "Configuration loaded");

    if cli.dev {
        tracing::warn!("Development mode enabled - DO NOT USE IN PRODUCTION");
    }

    let master_key = load_master_key(&cli, &config)?;
    let storage = open_storage(cli.dev, &config).await?;

    let engine = LifecycleEngine::open(
        storage,
        master_key,
        Collaborators::default(),
        config.engine_config(),
    )
    .await
    .context("Failed to open lifecycle engine")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(
        RotationScheduler::new(engine.clone()).run(config.rotation_period(), shutdown_rx),
    );

    let mut app = vigil_api::router(ApiState::new(engine));
    if cli.dev {
        app = app.layer(CorsLayer::permissive());
    }

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!(address = %listener.local_addr()?, "Vigil server started successfully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Shutting down...");
    // A dropped receiver only means the scheduler already stopped.
    let _ = shutdown_tx.send(true);
    scheduler.await.context("Rotation scheduler panicked")?;

    Ok(())
}

/// Master key from the flag or environment, then the configured file.
/// Development mode generates a throwaway key when neither is set.
fn load_master_key(cli: &Cli, config: &ServerConfig) -> Result<MasterKey> {
    if let Some(encoded) = &cli.master_key {
        return MasterKey::from_base64(encoded).context("Invalid VIGIL_MASTER_KEY");
    }
    if let Some(path) = &config.master_key_file {
        let encoded = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read master key file {}", path.display()))?;
        return MasterKey::from_base64(&encoded)
            .with_context(|| format!("Invalid master key in {}", path.display()));
    }
    if cli.dev {
        tracing::warn!("No master key configured, generated an ephemeral one");
        return Ok(MasterKey::generate());
    }
    bail!("A master key is required: set VIGIL_MASTER_KEY or master_key_file")
}

async fn open_storage(dev: bool, config: &ServerConfig) -> Result<Arc<dyn StorageBackend>> {
    if dev {
        tracing::info!("Using in-memory storage");
        return Ok(Arc::new(MemoryBackend::new()));
    }
    let backend = SqliteBackend::open(&config.data_dir, &config.tenant)
        .await
        .with_context(|| format!("Failed to open storage in {}", config.data_dir.display()))?
        .with_actor("vigil-server");
    Ok(Arc::new(backend))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file_values() {
        let cli = Cli::parse_from([
            "vigil-server",
            "--tenant",
            "payments",
            "--rotation-period-secs",
            "5",
        ]);
        let file = ServerConfig {
            tenant: "default".into(),
            bind: "127.0.0.1:9000".into(),
            ..Default::default()
        };

        let merged = cli.merge(file);
        assert_eq!(merged.tenant, "payments");
        assert_eq!(merged.rotation_period_secs, 5);
        assert_eq!(merged.bind, "127.0.0.1:9000");
    }

    #[test]
    fn test_master_key_required_outside_dev() {
        let cli = Cli::parse_from(["vigil-server"]);
        let config = ServerConfig::default();
        if cli.master_key.is_none() && !cli.dev {
            assert!(load_master_key(&cli, &config).is_err());
        }

        let key = MasterKey::generate();
        let cli = Cli::parse_from(["vigil-server", "--master-key", key.to_base64().as_str()]);
        let loaded = load_master_key(&cli, &config).unwrap();
        assert_eq!(loaded.as_bytes(), key.as_bytes());
    }
}
