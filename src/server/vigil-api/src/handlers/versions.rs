//! Version handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::typed_secret;
use crate::envelope::{Collection, CollectionType};
use crate::error::ApiError;
use crate::extract::{version_ref, Actor};
use crate::ApiState;

#[derive(Debug, Deserialize)]
pub struct VersionMetadataUpdate {
    #[serde(default)]
    version_custom_metadata: Map<String, Value>,
}

/// `GET /secrets/{secret_type}/{id}/versions`
pub async fn list_versions(
    State(state): State<ApiState>,
    Path((raw_type, raw_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (id, _) = typed_secret(&state, &raw_type, &raw_id).await?;
    let versions: Vec<_> = state.engine().list_versions(id).await?.collect();
    Ok(Json(Collection::new(CollectionType::SecretVersion, versions)).into_response())
}

/// `GET /secrets/{secret_type}/{id}/versions/{version_id}`
pub async fn get_version(
    State(state): State<ApiState>,
    Path((raw_type, raw_id, raw_version)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let (id, _) = typed_secret(&state, &raw_type, &raw_id).await?;
    let version = state
        .engine()
        .get_version(id, version_ref(&raw_version)?)
        .await?;
    Ok(Json(Collection::one(CollectionType::SecretVersion, version)).into_response())
}

/// `GET /secrets/{secret_type}/{id}/versions/{version_id}/metadata`
pub async fn get_version_metadata(
    State(state): State<ApiState>,
    Path((raw_type, raw_id, raw_version)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let (id, _) = typed_secret(&state, &raw_type, &raw_id).await?;
    let metadata = state
        .engine()
        .get_version_metadata(id, version_ref(&raw_version)?)
        .await?;
    Ok(Json(Collection::one(CollectionType::SecretVersion, metadata)).into_response())
}

/// `PUT /secrets/{secret_type}/{id}/versions/{version_id}/metadata`
pub async fn update_version_metadata(
    State(state): State<ApiState>,
    Path((raw_type, raw_id, raw_version)): Path<(String, String, String)>,
    actor: Actor,
    body: Result<Json<Collection<VersionMetadataUpdate>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let update = body.into_single()?;
    let (id, _) = typed_secret(&state, &raw_type, &raw_id).await?;
    let metadata = state
        .acting(&actor)
        .update_version_metadata(id, version_ref(&raw_version)?, update.version_custom_metadata)
        .await?;
    Ok(Json(Collection::one(CollectionType::SecretVersion, metadata)).into_response())
}
