//! Integration tests for the Vigil server.
//!
//! These tests serve the real router on an ephemeral port and drive the
//! secret lifecycle over HTTP.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use vigil_api::{ApiState, Collection};
use vigil_crypto::MasterKey;
use vigil_lifecycle::{Collaborators, EngineConfig, LifecycleEngine};
use vigil_storage::{MemoryBackend, StorageBackend};
use vigil_storage_sqlite::SqliteBackend;

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status and decoded envelope of a response; `None` for empty bodies.
pub type ApiResponse = (StatusCode, Option<Collection<Value>>);

// ============================================================================
// Test Server
// ============================================================================

/// A server instance running inside the test process.
pub struct TestServer {
    pub base_url: String,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Starts a server over in-memory storage.
    pub async fn start() -> Result<Self> {
        Self::serve(Arc::new(MemoryBackend::new()), MasterKey::generate()).await
    }

    /// Starts a server over the SQLite database of `tenant` in `dir`.
    pub async fn start_sqlite(dir: &Path, tenant: &str, key: MasterKey) -> Result<Self> {
        let backend = SqliteBackend::open(dir, tenant)
            .await
            .context("Failed to open SQLite backend")?
            .with_actor("integration");
        Self::serve(Arc::new(backend), key).await
    }

    async fn serve(storage: Arc<dyn StorageBackend>, key: MasterKey) -> Result<Self> {
        let engine = LifecycleEngine::open(
            storage,
            key,
            Collaborators::default(),
            EngineConfig::default(),
        )
        .await
        .context("Failed to open engine")?;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind test listener")?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let app = vigil_api::router(ApiState::new(engine));
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let server = Self { base_url, handle };
        server.wait_for_ready().await?;
        Ok(server)
    }

    /// Wait for the server to be ready to accept connections.
    async fn wait_for_ready(&self) -> Result<()> {
        let client = self.client()?;
        for _ in 0..50 {
            match client.health().await {
                Ok(health) if health.status == "ok" => return Ok(()),
                _ => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        bail!("Server failed to start within 1 second")
    }

    /// Get a configured HTTP client for this server.
    pub fn client(&self) -> Result<VigilClient> {
        VigilClient::new(&self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// HTTP client for testing the Vigil API.
pub struct VigilClient {
    client: Client,
    base_url: String,
    actor: String,
}

impl VigilClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .context("Failed to create HTTP client")?,
            base_url: base_url.to_string(),
            actor: "integration".to_string(),
        })
    }

    pub fn as_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let resp = self.client.get(self.url("/sys/health")).send().await?;
        Ok(resp.json().await?)
    }

    pub async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<ApiResponse> {
        let mut req = self
            .client
            .request(method, self.url(path))
            .header("X-Vigil-Actor", &self.actor);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Ok((status, None));
        }
        let envelope = serde_json::from_slice(&bytes)
            .with_context(|| format!("Unexpected body: {}", String::from_utf8_lossy(&bytes)))?;
        Ok((status, Some(envelope)))
    }

    /// Creates a secret and returns the created resource.
    pub async fn create_secret(&self, secret_type: &str, resource: Value) -> Result<Value> {
        let body = json!({
            "metadata": {
                "collection_type": "application/vnd.ibm.secrets-manager.secret+json",
                "collection_total": 1
            },
            "resources": [resource]
        });
        let (status, envelope) = self
            .send(Method::POST, &format!("/secrets/{secret_type}"), Some(body))
            .await?;
        if status != StatusCode::CREATED {
            bail!("Create secret failed with {status}: {envelope:?}");
        }
        first(envelope)
    }

    pub async fn get_secret(&self, secret_type: &str, id: &str) -> Result<Value> {
        let (status, envelope) = self
            .send(Method::GET, &format!("/secrets/{secret_type}/{id}"), None)
            .await?;
        if !status.is_success() {
            bail!("Get secret failed with {status}: {envelope:?}");
        }
        first(envelope)
    }

    pub async fn action(
        &self,
        secret_type: &str,
        id: &str,
        action: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse> {
        self.send(
            Method::POST,
            &format!("/secrets/{secret_type}/{id}?action={action}"),
            body,
        )
        .await
    }

    pub async fn lock(
        &self,
        secret_type: &str,
        id: &str,
        version: &str,
        names: &[&str],
    ) -> Result<ApiResponse> {
        let locks: Vec<Value> = names.iter().map(|n| json!({ "name": n })).collect();
        self.send(
            Method::POST,
            &format!("/locks/{secret_type}/{id}/versions/{version}/lock"),
            Some(json!({ "locks": locks })),
        )
        .await
    }

    pub async fn unlock(
        &self,
        secret_type: &str,
        id: &str,
        version: &str,
        names: &[&str],
    ) -> Result<ApiResponse> {
        self.send(
            Method::POST,
            &format!("/locks/{secret_type}/{id}/versions/{version}/unlock"),
            Some(json!({ "locks": names })),
        )
        .await
    }

    pub async fn delete_secret(&self, secret_type: &str, id: &str) -> Result<ApiResponse> {
        self.send(Method::DELETE, &format!("/secrets/{secret_type}/{id}"), None)
            .await
    }

    /// Replaces the engine configuration of `secret_type`.
    pub async fn configure(&self, secret_type: &str, config: Value) -> Result<()> {
        let (status, envelope) = self
            .send(Method::PUT, &format!("/config/{secret_type}"), Some(config))
            .await?;
        if status != StatusCode::NO_CONTENT {
            bail!("Configure {secret_type} failed with {status}: {envelope:?}");
        }
        Ok(())
    }

    /// Configures the certificate and IAM engines used by the tests.
    pub async fn configure_engines(&self) -> Result<()> {
        self.configure(
            "public_cert",
            json!({
                "certificate_authorities": [{"name": "letsencrypt-stage"}],
                "dns_providers": [{"name": "cis"}]
            }),
        )
        .await?;
        self.configure(
            "private_cert",
            json!({
                "certificate_authorities": [{"name": "internal-root"}],
                "templates": [{"name": "server"}]
            }),
        )
        .await?;
        self.configure("iam_credentials", json!({"api_key": "integration-api-key"}))
            .await
    }
}

/// The first resource of an envelope.
pub fn first(envelope: Option<Collection<Value>>) -> Result<Value> {
    envelope
        .and_then(|c| c.resources.into_iter().next())
        .context("Response holds no resource")
}

/// The error code of an error envelope.
pub fn error_code(envelope: &Option<Collection<Value>>) -> Option<String> {
    envelope
        .as_ref()
        .and_then(|c| c.resources.first())
        .and_then(|r| r["code"].as_str())
        .map(str::to_string)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id_of(resource: &Value) -> String {
        resource["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_server_health() {
        let server = TestServer::start().await.unwrap();
        let health = server.client().unwrap().health().await.unwrap();

        assert_eq!(health.status, "ok");
        assert!(!health.version.is_empty());
    }

    #[tokio::test]
    async fn test_rotate_lock_delete_scenario() {
        let server = TestServer::start().await.unwrap();
        let client = server.client().unwrap().as_actor("deployer");

        let secret = client
            .create_secret("arbitrary", json!({"name": "db-password", "payload": "p1"}))
            .await
            .unwrap();
        let id = id_of(&secret);
        assert_eq!(secret["version"]["created_by"], "deployer");

        let (status, _) = client
            .action("arbitrary", &id, "rotate", Some(json!({"payload": "p2"})))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        let current = client.get_secret("arbitrary", &id).await.unwrap();
        assert_eq!(current["version"]["payload"]["payload"], "p2");

        let (status, envelope) = client
            .send(
                Method::GET,
                &format!("/secrets/arbitrary/{id}/versions/previous"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        let previous = first(envelope).unwrap();
        assert_eq!(previous["payload"]["payload"], "p1");

        let (status, _) = client
            .lock("arbitrary", &id, "previous", &["lease-A"])
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        let (status, envelope) = client.delete_secret("arbitrary", &id).await.unwrap();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(error_code(&envelope).as_deref(), Some("secret_locked"));

        let (status, _) = client
            .unlock("arbitrary", &id, "previous", &["lease-A"])
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        let (status, envelope) = client.delete_secret("arbitrary", &id).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(envelope.is_none());
        assert!(client.get_secret("arbitrary", &id).await.is_err());
    }

    #[tokio::test]
    async fn test_exclusive_delete_purges_previous_payload() {
        let server = TestServer::start().await.unwrap();
        let client = server.client().unwrap();

        let secret = client
            .create_secret("arbitrary", json!({"name": "app-token", "payload": "t1"}))
            .await
            .unwrap();
        let id = id_of(&secret);
        client.lock("arbitrary", &id, "current", &["app"]).await.unwrap();
        client
            .action("arbitrary", &id, "rotate", Some(json!({"payload": "t2"})))
            .await
            .unwrap();

        let (status, _) = client
            .send(
                Method::POST,
                &format!("/locks/arbitrary/{id}/versions/current/lock?mode=exclusive_delete"),
                Some(json!({"locks": [{"name": "app"}]})),
            )
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        let (_, envelope) = client
            .send(
                Method::GET,
                &format!("/secrets/arbitrary/{id}/versions/previous"),
                None,
            )
            .await
            .unwrap();
        let previous = first(envelope).unwrap();
        assert_eq!(previous["payload_available"], false);
        assert!(previous.get("payload").is_none());
        assert_eq!(previous["locks_total"], 0);
    }

    #[tokio::test]
    async fn test_sqlite_persistence_across_restart() {
        let dir = TempDir::new().unwrap();
        let key = MasterKey::generate();

        let id = {
            let server = TestServer::start_sqlite(dir.path(), "acme", key.clone())
                .await
                .unwrap();
            let client = server.client().unwrap();
            client.configure_engines().await.unwrap();
            let secret = client
                .create_secret(
                    "kv",
                    json!({"name": "billing-config", "payload": {"endpoint": "https://billing"}}),
                )
                .await
                .unwrap();
            let id = id_of(&secret);
            client.lock("kv", &id, "current", &["billing"]).await.unwrap();
            id
        };

        let server = TestServer::start_sqlite(dir.path(), "acme", key)
            .await
            .unwrap();
        let client = server.client().unwrap();
        let secret = client.get_secret("kv", &id).await.unwrap();
        assert_eq!(
            secret["version"]["payload"]["data"]["endpoint"],
            "https://billing"
        );
        assert_eq!(secret["locks_total"], 1);

        // The IAM engine comes back configured with the sealed API key.
        let (status, envelope) = client
            .send(Method::GET, "/config/iam_credentials", None)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        let config = first(envelope).unwrap();
        assert_eq!(
            config["api_key_hash"],
            vigil_crypto::kdf::fingerprint(b"integration-api-key")
        );
        let iam = client
            .create_secret("iam_credentials", json!({"name": "after-restart", "ttl_secs": 600}))
            .await
            .unwrap();
        assert!(iam["version"]["payload"]["api_key"].is_string());
    }

    #[tokio::test]
    async fn test_public_certificate_issued_in_background() {
        let server = TestServer::start().await.unwrap();
        let client = server.client().unwrap();
        client.configure_engines().await.unwrap();

        let secret = client
            .create_secret(
                "public_cert",
                json!({
                    "name": "www-cert",
                    "common_name": "example.com",
                    "ca": "letsencrypt-stage",
                    "dns": "cis"
                }),
            )
            .await
            .unwrap();
        let id = id_of(&secret);
        assert_eq!(secret["state"], 0);

        let mut issued = None;
        for _ in 0..50 {
            let secret = client.get_secret("public_cert", &id).await.unwrap();
            if secret["state"] == 1 {
                issued = Some(secret);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let issued = issued.expect("certificate was not issued within 1 second");
        assert_eq!(issued["issuance_info"]["state"], "issued");
        assert!(issued["version"]["payload"]["certificate"].is_string());
        assert!(issued["next_rotation_date"].is_null());
    }

    #[tokio::test]
    async fn test_private_certificate_revocation() {
        let server = TestServer::start().await.unwrap();
        let client = server.client().unwrap();
        client.configure_engines().await.unwrap();

        let secret = client
            .create_secret(
                "private_cert",
                json!({
                    "name": "internal-cert",
                    "common_name": "internal.example.com",
                    "certificate_template": "server",
                    "ttl_secs": 86400
                }),
            )
            .await
            .unwrap();
        let id = id_of(&secret);
        assert!(secret["version"]["payload"]["private_key"].is_string());

        let (status, envelope) = client.action("private_cert", &id, "revoke", None).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        let revoked = first(envelope).unwrap();
        assert_eq!(revoked["state"], 5);
        assert!(revoked["revocation_time"].is_string());

        let (status, envelope) = client.action("private_cert", &id, "revoke", None).await.unwrap();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(error_code(&envelope).as_deref(), Some("already_revoked"));
    }

    #[tokio::test]
    async fn test_iam_credentials_restore_and_delete() {
        let server = TestServer::start().await.unwrap();
        let client = server.client().unwrap();
        client.configure_engines().await.unwrap();

        let secret = client
            .create_secret(
                "iam_credentials",
                json!({
                    "name": "ci-key",
                    "ttl_secs": 3600,
                    "access_groups": ["AccessGroupId-ops"]
                }),
            )
            .await
            .unwrap();
        let id = id_of(&secret);
        let first_key = secret["version"]["payload"]["api_key_id"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, _) = client
            .action("iam_credentials", &id, "rotate", None)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        let (status, envelope) = client
            .action(
                "iam_credentials",
                &id,
                "restore",
                Some(json!({"version_id": "previous"})),
            )
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        let restored = first(envelope).unwrap();
        assert_eq!(restored["versions_total"], 3);
        assert_eq!(restored["version"]["payload"]["api_key_id"], first_key.as_str());

        let body = json!({"api_key_id": first_key});
        let (status, _) = client
            .action("iam_credentials", &id, "delete_credentials", Some(body.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        let (status, envelope) = client
            .action("iam_credentials", &id, "delete_credentials", Some(body))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&envelope).as_deref(), Some("credential_not_found"));
    }
}
