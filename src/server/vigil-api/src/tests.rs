//! Router tests driven through `tower::ServiceExt::oneshot`.

#![allow(clippy::disallowed_methods)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use vigil_crypto::MasterKey;
use vigil_lifecycle::{Collaborators, EngineConfig, LifecycleEngine};
use vigil_storage::MemoryBackend;

use crate::extract::ACTOR_HEADER;
use crate::{router, ApiState};

async fn app() -> Router {
    let engine = LifecycleEngine::open(
        Arc::new(MemoryBackend::new()),
        MasterKey::generate(),
        Collaborators::default(),
        EngineConfig::default(),
    )
    .await
    .unwrap();
    router(ApiState::new(engine))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(ACTOR_HEADER, "tester");
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn envelope(resource: Value) -> Value {
    json!({
        "metadata": {
            "collection_type": "application/vnd.ibm.secrets-manager.secret+json",
            "collection_total": 1
        },
        "resources": [resource]
    })
}

async fn create_arbitrary(app: &Router, name: &str, payload: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/secrets/arbitrary",
        Some(envelope(json!({"name": name, "payload": payload}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["resources"][0]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/api/v1/sys/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_and_read_secret() {
    let app = app().await;
    let id = create_arbitrary(&app, "db-password", "p1").await;

    let (status, body) = send(&app, Method::GET, &format!("/api/v1/secrets/arbitrary/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["metadata"]["collection_type"],
        "application/vnd.ibm.secrets-manager.secret+json"
    );
    let secret = &body["resources"][0];
    assert_eq!(secret["name"], "db-password");
    assert_eq!(secret["secret_type"], "arbitrary");
    assert_eq!(secret["state"], 1);
    assert_eq!(secret["version"]["payload"]["payload"], "p1");
    assert_eq!(secret["version"]["created_by"], "tester");

    // Same ID under another type.
    let (status, body) = send(&app, Method::GET, &format!("/api/v1/secrets/kv/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["metadata"]["collection_type"],
        "application/vnd.ibm.secrets-manager.error+json"
    );
}

#[tokio::test]
async fn test_lock_blocks_delete_until_released() {
    let app = app().await;
    let id = create_arbitrary(&app, "db-password", "p1").await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/secrets/arbitrary/{id}?action=rotate"),
        Some(json!({"payload": "p2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["resources"][0]["versions_total"], 2);

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/secrets/arbitrary/{id}/versions/previous"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resources"][0]["alias"], "previous");
    assert_eq!(body["resources"][0]["payload"]["payload"], "p1");

    let lock_uri = format!("/api/v1/locks/arbitrary/{id}/versions/previous/lock");
    let (status, body) = send(
        &app,
        Method::POST,
        &lock_uri,
        Some(json!({"locks": [{"name": "lease-A", "description": "batch job"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["resources"][0]["locks"][0]["name"], "lease-A");

    let secret_uri = format!("/api/v1/secrets/arbitrary/{id}");
    let (status, body) = send(&app, Method::DELETE, &secret_uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["resources"][0]["code"], "secret_locked");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/locks/arbitrary/{id}/versions/previous/unlock"),
        Some(json!({"locks": ["lease-A"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::DELETE, &secret_uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, Method::GET, &secret_uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_lock_listing_and_bad_mode() {
    let app = app().await;
    let id = create_arbitrary(&app, "api-token", "t1").await;

    for name in ["lease-A", "lease-B", "other-C"] {
        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/api/v1/locks/arbitrary/{id}/versions/current/lock"),
            Some(json!({"locks": [{"name": name}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/locks/arbitrary/{id}?search=lease&limit=1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["collection_total"], 2);
    assert_eq!(body["resources"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/locks/arbitrary/{id}/versions/current/lock?mode=forever"),
        Some(json!({"locks": [{"name": "lease-D"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resources"][0]["code"], "validation_error");
}

#[tokio::test]
async fn test_unknown_action_and_malformed_body() {
    let app = app().await;
    let id = create_arbitrary(&app, "db-password", "p1").await;

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/secrets/arbitrary/{id}?action=explode"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/secrets/arbitrary/{id}?action=restore"),
        Some(json!({"version_id": "previous"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resources"][0]["code"], "unsupported_operation");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/secrets/arbitrary",
        Some(json!({"resources": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resources"][0]["code"], "bad_request");
}

#[tokio::test]
async fn test_policy_round_trip() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/secrets/username_password",
        Some(envelope(json!({"name": "svc-login", "username": "svc"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["resources"][0]["id"].as_str().unwrap().to_string();
    let password = body["resources"][0]["version"]["payload"]["password"]
        .as_str()
        .unwrap();
    assert_eq!(password.len(), 32);

    let uri = format!("/api/v1/secrets/username_password/{id}/policies");
    let (status, body) = send(
        &app,
        Method::PUT,
        &uri,
        Some(json!({
            "resources": [{
                "type": "application/vnd.ibm.secrets-manager.secret.policy+json",
                "rotation": {"auto_rotate": true, "interval": 30, "unit": "day"}
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resources"][0]["rotation"]["interval"], 30);
    assert_eq!(body["resources"][0]["status"]["status"], "scheduled");

    // Password-only rotation keeps the username.
    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/secrets/username_password/{id}?action=rotate"),
        Some(json!({"password": "n3w-passw0rd"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["resources"][0]["version"]["payload"]["username"], "svc");
    assert_eq!(
        body["resources"][0]["version"]["payload"]["password"],
        "n3w-passw0rd"
    );
}

#[tokio::test]
async fn test_group_lifecycle() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/secret_groups",
        Some(json!({"resources": [{"name": "payments", "description": "team"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let group_id = body["resources"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/secrets/kv",
        Some(envelope(json!({
            "name": "billing-config",
            "secret_group_id": group_id,
            "payload": {"endpoint": "https://billing"}
        }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let secret_id = body["resources"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/secrets/kv?groups={group_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["collection_total"], 1);

    let group_uri = format!("/api/v1/secret_groups/{group_id}");
    let (status, body) = send(&app, Method::DELETE, &group_uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["resources"][0]["code"], "group_not_empty");

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/v1/secrets/kv/{secret_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, Method::DELETE, &group_uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, Method::GET, "/api/v1/secret_groups", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["name"].as_str().unwrap().to_string())
        .collect();
    assert!(!names.contains(&"payments".to_string()));
}

#[tokio::test]
async fn test_destroy_state_refused_while_locked() {
    let app = app().await;
    let id = create_arbitrary(&app, "db-password", "p1").await;
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/locks/arbitrary/{id}/versions/current/lock"),
        Some(json!({"locks": [{"name": "lease-A"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let state_uri = format!("/api/v1/secrets/arbitrary/{id}/state");
    let (status, body) = send(&app, Method::PUT, &state_uri, Some(json!({"state": 5}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["resources"][0]["code"], "secret_locked");

    let (status, body) = send(&app, Method::GET, &format!("/api/v1/secrets/arbitrary/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resources"][0]["state"], 1);
    assert_eq!(body["resources"][0]["version"]["payload"]["payload"], "p1");

    // Suspending is not a destruction and stays allowed.
    let (status, body) = send(&app, Method::PUT, &state_uri, Some(json!({"state": 2}))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["resources"][0]["state"], 2);
}

#[tokio::test]
async fn test_engine_configuration_round_trip() {
    let app = app().await;

    let (status, _) = send(&app, Method::GET, "/api/v1/config/public_cert", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/v1/config/public_cert",
        Some(json!({
            "certificate_authorities": [
                {"name": "letsencrypt-stage", "config": {"private_key": "k"}}
            ],
            "dns_providers": [{"name": "cis", "config": {"cis_crn": "crn:1"}}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT, "{body}");

    let (status, body) = send(&app, Method::GET, "/api/v1/config/public_cert", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["metadata"]["collection_type"],
        "application/vnd.ibm.secrets-manager.config+json"
    );
    let config = &body["resources"][0];
    assert_eq!(config["certificate_authorities"][0]["name"], "letsencrypt-stage");
    assert_eq!(config["dns_providers"][0]["name"], "cis");

    // An order against an unknown authority never reaches the issuer.
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/secrets/public_cert",
        Some(envelope(json!({
            "name": "web",
            "common_name": "example.com",
            "ca": "letsencrypt-prod",
            "dns": "cis"
        }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["resources"][0]["code"], "validation_error");

    let (status, _) = send(
        &app,
        Method::PUT,
        "/api/v1/config/iam_credentials",
        Some(json!({"api_key": "root-api-key"})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send(&app, Method::GET, "/api/v1/config/iam_credentials", None).await;
    assert_eq!(status, StatusCode::OK);
    let config = &body["resources"][0];
    assert_eq!(
        config["api_key_hash"],
        vigil_crypto::kdf::fingerprint(b"root-api-key")
    );
    assert!(config.get("api_key").is_none());

    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/v1/config/private_cert",
        Some(json!({"templates": [{"name": "bad name!"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, _) = send(&app, Method::PUT, "/api/v1/config/arbitrary", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_writes_are_journaled_under_the_calling_actor() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(
        vigil_storage_sqlite::SqliteBackend::open(dir.path(), "api")
            .await
            .unwrap(),
    );
    let engine = LifecycleEngine::open(
        storage.clone(),
        MasterKey::generate(),
        Collaborators::default(),
        EngineConfig::default(),
    )
    .await
    .unwrap();
    let app = router(ApiState::new(engine));

    // `send` identifies as "tester".
    let id = create_arbitrary(&app, "audited", "p1").await;
    let request = Request::builder()
        .method(Method::PUT)
        .uri(format!("/api/v1/secrets/arbitrary/{id}/metadata"))
        .header(ACTOR_HEADER, "operator")
        .header("content-type", "application/json")
        .body(Body::from(
            envelope(json!({"description": "rotated by ops"})).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let actors: Vec<String> = storage
        .journal(&format!("secrets/{id}"))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.actor)
        .collect();
    assert_eq!(actors, vec!["tester", "operator"]);
}
