//! Secrets engine configuration handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::info;

use vigil_lifecycle::ConfigurationUpdate;

use crate::envelope::{Collection, CollectionType};
use crate::error::ApiError;
use crate::extract::{secret_type, Actor};
use crate::ApiState;

/// `PUT /config/{secret_type}`
///
/// The body is the bare configuration object, not an envelope.
pub async fn put_config(
    State(state): State<ApiState>,
    Path(raw_type): Path<String>,
    actor: Actor,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let ty = secret_type(&raw_type)?;
    let Json(body) = body?;
    let update = ConfigurationUpdate::from_json(ty, body)?;
    state.acting(&actor).configure(update).await?;
    info!(secret_type = %ty, actor = %actor.0, "Engine configured via API");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /config/{secret_type}`
pub async fn get_config(
    State(state): State<ApiState>,
    Path(raw_type): Path<String>,
) -> Result<Response, ApiError> {
    let ty = secret_type(&raw_type)?;
    let configuration = state.engine().get_configuration(ty).await?;
    Ok(Json(Collection::one(CollectionType::Config, configuration)).into_response())
}
