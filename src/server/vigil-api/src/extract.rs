//! Request extraction helpers.

use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use vigil_lifecycle::{SecretType, VersionRef};

use crate::error::ApiError;

/// Header naming the caller, recorded as `created_by` on versions and locks.
pub const ACTOR_HEADER: &str = "x-vigil-actor";

const DEFAULT_ACTOR: &str = "api";

/// The caller of a request.
#[derive(Debug, Clone)]
pub struct Actor(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_ACTOR);
        Ok(Actor(actor.to_string()))
    }
}

pub fn secret_type(raw: &str) -> Result<SecretType, ApiError> {
    raw.parse::<SecretType>()
        .map_err(|_| ApiError::NotFound(format!("unknown secret type: {raw}")))
}

pub fn secret_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid secret id: {raw}")))
}

pub fn version_ref(raw: &str) -> Result<VersionRef, ApiError> {
    Ok(raw.parse::<VersionRef>()?)
}

/// Parses an optional JSON body; an empty body yields the default value.
pub fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}

/// Splits a comma separated query value.
pub fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
