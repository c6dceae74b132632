//! Secret group handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{Map, Value};

use vigil_lifecycle::GroupUpdate;

use crate::envelope::{Collection, CollectionType};
use crate::error::ApiError;
use crate::extract::Actor;
use crate::ApiState;

#[derive(Debug, Deserialize)]
pub struct NewGroup {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(flatten)]
    extra_fields: Map<String, Value>,
}

/// `POST /secret_groups`
pub async fn create_group(
    State(state): State<ApiState>,
    actor: Actor,
    body: Result<Json<Collection<NewGroup>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let group = body.into_single()?;
    let group = state
        .acting(&actor)
        .create_group(&group.name, group.description, group.extra_fields)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Collection::one(CollectionType::SecretGroup, group)),
    )
        .into_response())
}

/// `GET /secret_groups`
pub async fn list_groups(State(state): State<ApiState>) -> Response {
    let groups = state.engine().list_groups().await;
    Json(Collection::new(CollectionType::SecretGroup, groups)).into_response()
}

/// `GET /secret_groups/{id}`
pub async fn get_group(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let group = state.engine().get_group(&id).await?;
    Ok(Json(Collection::one(CollectionType::SecretGroup, group)).into_response())
}

/// `PUT /secret_groups/{id}`
pub async fn update_group(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    actor: Actor,
    body: Result<Json<Collection<GroupUpdate>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let update = body.into_single()?;
    let group = state.acting(&actor).update_group(&id, update).await?;
    Ok(Json(Collection::one(CollectionType::SecretGroup, group)).into_response())
}

/// `DELETE /secret_groups/{id}`
pub async fn delete_group(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    actor: Actor,
) -> Result<StatusCode, ApiError> {
    state.acting(&actor).delete_group(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
