//! Version lock handlers.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use vigil_lifecycle::{LockMode, LockSpec};

use super::{pagination, typed_secret};
use crate::envelope::{Collection, CollectionType};
use crate::error::ApiError;
use crate::extract::{version_ref, Actor};
use crate::ApiState;

#[derive(Debug, Deserialize)]
pub struct LockBody {
    locks: Vec<LockSpec>,
}

#[derive(Debug, Deserialize)]
pub struct UnlockBody {
    locks: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LockQuery {
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListLocksQuery {
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    search: Option<String>,
}

/// `POST /locks/{secret_type}/{id}/versions/{version_id}/lock`
pub async fn lock_version(
    State(state): State<ApiState>,
    Path((raw_type, raw_id, raw_version)): Path<(String, String, String)>,
    query: Result<Query<LockQuery>, QueryRejection>,
    actor: Actor,
    body: Result<Json<LockBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let Json(body) = body?;
    let mode = query
        .mode
        .as_deref()
        .map(str::parse::<LockMode>)
        .transpose()?
        .unwrap_or_default();
    let version = version_ref(&raw_version)?;
    let (id, _) = typed_secret(&state, &raw_type, &raw_id).await?;

    let locks = state
        .acting(&actor)
        .lock_version(id, version, body.locks, mode, &actor.0)
        .await?;
    info!(secret_id = %id, version_id = %locks.version_id, ?mode, "Version locked via API");
    Ok(Json(Collection::one(CollectionType::SecretLock, locks)).into_response())
}

/// `POST /locks/{secret_type}/{id}/versions/{version_id}/unlock`
pub async fn unlock_version(
    State(state): State<ApiState>,
    Path((raw_type, raw_id, raw_version)): Path<(String, String, String)>,
    actor: Actor,
    body: Result<Json<UnlockBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let version = version_ref(&raw_version)?;
    let (id, _) = typed_secret(&state, &raw_type, &raw_id).await?;

    let locks = state
        .acting(&actor)
        .unlock_version(id, version, body.locks)
        .await?;
    Ok(Json(Collection::one(CollectionType::SecretLock, locks)).into_response())
}

/// `GET /locks/{secret_type}/{id}`
pub async fn list_secret_locks(
    State(state): State<ApiState>,
    Path((raw_type, raw_id)): Path<(String, String)>,
    query: Result<Query<ListLocksQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    list(&state, &raw_type, &raw_id, None, query).await
}

/// `GET /locks/{secret_type}/{id}/versions/{version_id}`
pub async fn list_version_locks(
    State(state): State<ApiState>,
    Path((raw_type, raw_id, raw_version)): Path<(String, String, String)>,
    query: Result<Query<ListLocksQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    list(&state, &raw_type, &raw_id, Some(&raw_version), query).await
}

async fn list(
    state: &ApiState,
    raw_type: &str,
    raw_id: &str,
    raw_version: Option<&str>,
    query: ListLocksQuery,
) -> Result<Response, ApiError> {
    let page = pagination(state, query.offset, query.limit)?;
    let version = raw_version.map(version_ref).transpose()?;
    let (id, _) = typed_secret(state, raw_type, raw_id).await?;

    let page = state
        .engine()
        .list_locks(id, version, query.search.as_deref(), page)
        .await?;
    Ok(Json(Collection::with_total(
        CollectionType::SecretLock,
        page.total,
        page.items,
    ))
    .into_response())
}
