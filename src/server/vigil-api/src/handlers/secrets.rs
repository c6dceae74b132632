//! Secret handlers: create, read, list, delete, metadata, actions and policies.

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use vigil_lifecycle::model::CertificateBundle;
use vigil_lifecycle::{
    CreateSecretRequest, CredentialRef, MetadataUpdate, RotateRequest, RotationPolicy,
    SecretFilter, SecretKind, SecretMaterial, SecretPayload, SecretState, SecretType,
};

use super::{check_type, pagination, typed_secret};
use crate::envelope::{Collection, CollectionType};
use crate::error::ApiError;
use crate::extract::{optional_body, secret_id, secret_type, split_list, version_ref, Actor};
use crate::ApiState;

// ============================================================================
// Request bodies
// ============================================================================

/// Payload fields accepted on create and rotate.
#[derive(Debug, Default, Deserialize)]
pub struct MaterialFields {
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    certificate: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    intermediate: Option<String>,
    #[serde(default)]
    csr: Option<String>,
}

impl MaterialFields {
    fn into_material(self, ty: SecretType) -> Result<SecretMaterial, ApiError> {
        if let Some(csr) = self.csr {
            return Ok(SecretMaterial::Csr(csr));
        }

        let payload = match ty {
            SecretType::Arbitrary => match self.payload {
                Some(Value::String(payload)) => Some(SecretPayload::Arbitrary { payload }),
                Some(_) => {
                    return Err(ApiError::BadRequest(
                        "arbitrary payload must be a string".into(),
                    ))
                }
                None => None,
            },
            SecretType::Kv => match self.payload {
                Some(Value::Object(data)) => Some(SecretPayload::Kv { data }),
                Some(_) => return Err(ApiError::BadRequest("kv payload must be an object".into())),
                None => None,
            },
            SecretType::UsernamePassword => self.username.map(|username| {
                SecretPayload::UsernamePassword {
                    username,
                    password: self.password.unwrap_or_default(),
                }
            }),
            SecretType::ImportedCert => self.certificate.map(|certificate| {
                SecretPayload::ImportedCert(CertificateBundle {
                    certificate,
                    private_key: self.private_key,
                    intermediate: self.intermediate,
                    issuing_ca: None,
                })
            }),
            SecretType::IamCredentials | SecretType::PublicCert | SecretType::PrivateCert => {
                if self.payload.is_some() || self.certificate.is_some() {
                    return Err(ApiError::BadRequest(format!(
                        "{ty} secrets are generated and do not accept a payload"
                    )));
                }
                None
            }
        };

        Ok(payload.map_or(SecretMaterial::Generate, SecretMaterial::Supplied))
    }
}

/// A secret to create. Fields not listed here are kind attributes.
#[derive(Debug, Deserialize)]
pub struct NewSecret {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    secret_group_id: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    custom_metadata: Map<String, Value>,
    #[serde(default)]
    version_custom_metadata: Map<String, Value>,
    #[serde(default)]
    expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    rotation: RotationPolicy,
    #[serde(flatten)]
    material: MaterialFields,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

impl NewSecret {
    fn into_request(self, ty: SecretType, actor: String) -> Result<CreateSecretRequest, ApiError> {
        let mut attributes = self.attributes;
        attributes.insert("secret_type".into(), Value::String(ty.as_str().into()));
        let kind: SecretKind = serde_json::from_value(Value::Object(attributes))?;

        Ok(CreateSecretRequest {
            name: self.name,
            description: self.description,
            secret_group_id: self.secret_group_id,
            labels: self.labels,
            custom_metadata: self.custom_metadata,
            version_custom_metadata: self.version_custom_metadata,
            expiration_date: self.expiration_date,
            rotation: self.rotation,
            kind,
            material: self.material.into_material(ty)?,
            created_by: actor,
        })
    }
}

/// `?action=` values of the secret update endpoint.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretAction {
    Rotate,
    Restore,
    Revoke,
    DeleteCredentials,
    ValidateDnsChallenge,
}

#[derive(Debug, Deserialize)]
pub struct ActionQuery {
    action: SecretAction,
}

/// Body of a secret action; each action reads the fields it needs.
#[derive(Debug, Default, Deserialize)]
pub struct ActionBody {
    #[serde(flatten)]
    material: MaterialFields,
    #[serde(default)]
    rotate_keys: Option<bool>,
    #[serde(default)]
    version_custom_metadata: Map<String, Value>,
    #[serde(default)]
    custom_metadata: Map<String, Value>,
    #[serde(default)]
    version_id: Option<String>,
    #[serde(default)]
    api_key_id: Option<String>,
    #[serde(default)]
    service_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSecretsQuery {
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    groups: Option<String>,
    #[serde(default)]
    labels: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StateBody {
    state: SecretState,
}

#[derive(Debug, Deserialize)]
pub struct PolicyResource {
    #[serde(default, rename = "type")]
    policy_type: Option<String>,
    rotation: RotationPolicy,
}

// ============================================================================
// Secrets
// ============================================================================

/// `POST /secrets/{secret_type}`
pub async fn create_secret(
    State(state): State<ApiState>,
    Path(raw_type): Path<String>,
    actor: Actor,
    body: Result<Json<Collection<NewSecret>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ty = secret_type(&raw_type)?;
    let Json(body) = body?;
    let request = body.into_single()?.into_request(ty, actor.0.clone())?;

    let view = state.acting(&actor).create_secret(request).await?;
    info!(secret_id = %view.metadata.id, secret_type = %ty, "Secret created via API");
    Ok((
        StatusCode::CREATED,
        Json(Collection::one(CollectionType::Secret, view)),
    )
        .into_response())
}

/// `GET /secrets/{secret_type}`
pub async fn list_secrets(
    State(state): State<ApiState>,
    Path(raw_type): Path<String>,
    query: Result<Query<ListSecretsQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let ty = secret_type(&raw_type)?;
    let Query(query) = query?;
    let page = pagination(&state, query.offset, query.limit)?;
    let filter = SecretFilter {
        secret_types: vec![ty],
        groups: split_list(query.groups.as_deref()),
        labels: split_list(query.labels.as_deref()),
        search: query.search,
    };

    let page = state.engine().list_secrets(&filter, page).await?;
    Ok(Json(Collection::with_total(
        CollectionType::Secret,
        page.total,
        page.items,
    ))
    .into_response())
}

/// `GET /secrets/{secret_type}/{id}`
pub async fn get_secret(
    State(state): State<ApiState>,
    Path((raw_type, raw_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let ty = secret_type(&raw_type)?;
    let id = secret_id(&raw_id)?;
    let view = state.engine().get_secret(id).await?;
    check_type(ty, id, view.metadata.kind.secret_type())?;
    Ok(Json(Collection::one(CollectionType::Secret, view)).into_response())
}

/// `DELETE /secrets/{secret_type}/{id}`
pub async fn delete_secret(
    State(state): State<ApiState>,
    Path((raw_type, raw_id)): Path<(String, String)>,
    actor: Actor,
) -> Result<StatusCode, ApiError> {
    let (id, _) = typed_secret(&state, &raw_type, &raw_id).await?;
    state.acting(&actor).delete_secret(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /secrets/{secret_type}/{id}?action=...`
pub async fn secret_action(
    State(state): State<ApiState>,
    Path((raw_type, raw_id)): Path<(String, String)>,
    query: Result<Query<ActionQuery>, QueryRejection>,
    actor: Actor,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Query(ActionQuery { action }) = query?;
    let (id, metadata) = typed_secret(&state, &raw_type, &raw_id).await?;
    let ty = metadata.kind.secret_type();
    let body: ActionBody = optional_body(&body)?;
    let engine = state.acting(&actor);

    let response = match action {
        SecretAction::Rotate => {
            let material = rotation_material(&state, ty, id, body.material).await?;
            let view = engine
                .rotate(
                    id,
                    RotateRequest {
                        material,
                        rotate_keys: body.rotate_keys,
                        version_custom_metadata: body.version_custom_metadata,
                        actor: actor.0.clone(),
                    },
                )
                .await?;
            Json(Collection::one(CollectionType::Secret, view)).into_response()
        }
        SecretAction::Restore => {
            let raw = body
                .version_id
                .ok_or_else(|| ApiError::BadRequest("restore requires version_id".into()))?;
            let view = engine
                .restore(id, version_ref(&raw)?, body.custom_metadata, &actor.0)
                .await?;
            Json(Collection::one(CollectionType::Secret, view)).into_response()
        }
        SecretAction::Revoke => {
            let version = body.version_id.as_deref().map(version_ref).transpose()?;
            let metadata = engine.revoke(id, version).await?;
            Json(Collection::one(CollectionType::Secret, metadata)).into_response()
        }
        SecretAction::DeleteCredentials => {
            let credential = match (body.api_key_id, body.service_id) {
                (Some(key), None) => CredentialRef::ApiKeyId(key),
                (None, Some(service)) => CredentialRef::ServiceId(service),
                _ => {
                    return Err(ApiError::BadRequest(
                        "delete_credentials requires exactly one of api_key_id or service_id"
                            .into(),
                    ))
                }
            };
            let metadata = engine.delete_credentials(id, credential).await?;
            Json(Collection::one(CollectionType::Secret, metadata)).into_response()
        }
        SecretAction::ValidateDnsChallenge => {
            let metadata = engine.validate_dns_challenge(id, &actor.0).await?;
            Json(Collection::one(CollectionType::Secret, metadata)).into_response()
        }
    };
    Ok(response)
}

/// A password-only rotation keeps the current username.
async fn rotation_material(
    state: &ApiState,
    ty: SecretType,
    id: Uuid,
    mut fields: MaterialFields,
) -> Result<SecretMaterial, ApiError> {
    if ty == SecretType::UsernamePassword && fields.username.is_none() {
        let Some(password) = fields.password.take() else {
            return Ok(SecretMaterial::Generate);
        };
        let view = state.engine().get_secret(id).await?;
        let Some(SecretPayload::UsernamePassword { username, .. }) = view.payload() else {
            return Err(ApiError::BadRequest(
                "the current version has no username to keep".into(),
            ));
        };
        return Ok(SecretMaterial::Supplied(SecretPayload::UsernamePassword {
            username: username.clone(),
            password,
        }));
    }
    fields.into_material(ty)
}

// ============================================================================
// Metadata and state
// ============================================================================

/// `GET /secrets/{secret_type}/{id}/metadata`
pub async fn get_metadata(
    State(state): State<ApiState>,
    Path((raw_type, raw_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (_, metadata) = typed_secret(&state, &raw_type, &raw_id).await?;
    Ok(Json(Collection::one(CollectionType::Secret, metadata)).into_response())
}

/// `PUT /secrets/{secret_type}/{id}/metadata`
pub async fn update_metadata(
    State(state): State<ApiState>,
    Path((raw_type, raw_id)): Path<(String, String)>,
    actor: Actor,
    body: Result<Json<Collection<MetadataUpdate>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let update = body.into_single()?;
    let (id, _) = typed_secret(&state, &raw_type, &raw_id).await?;
    let metadata = state.acting(&actor).update_secret_metadata(id, update).await?;
    Ok(Json(Collection::one(CollectionType::Secret, metadata)).into_response())
}

/// `PUT /secrets/{secret_type}/{id}/state`
pub async fn set_state(
    State(state): State<ApiState>,
    Path((raw_type, raw_id)): Path<(String, String)>,
    actor: Actor,
    body: Result<Json<StateBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let (id, _) = typed_secret(&state, &raw_type, &raw_id).await?;
    let metadata = state.acting(&actor).set_state(id, body.state).await?;
    Ok(Json(Collection::one(CollectionType::Secret, metadata)).into_response())
}

// ============================================================================
// Policies
// ============================================================================

/// `PUT /secrets/{secret_type}/{id}/policies`
pub async fn put_policy(
    State(state): State<ApiState>,
    Path((raw_type, raw_id)): Path<(String, String)>,
    actor: Actor,
    body: Result<Json<Collection<PolicyResource>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let resource = body.into_single()?;
    let expected = CollectionType::SecretPolicy.as_str();
    if resource.policy_type.as_deref().is_some_and(|t| t != expected) {
        return Err(ApiError::BadRequest(format!("policy type must be {expected}")));
    }

    let (id, _) = typed_secret(&state, &raw_type, &raw_id).await?;
    let view = state.acting(&actor).put_policy(id, resource.rotation).await?;
    Ok(Json(Collection::one(CollectionType::SecretPolicy, view)).into_response())
}

/// `GET /secrets/{secret_type}/{id}/policies`
pub async fn get_policy(
    State(state): State<ApiState>,
    Path((raw_type, raw_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (id, _) = typed_secret(&state, &raw_type, &raw_id).await?;
    let view = state.engine().get_policy(id).await?;
    Ok(Json(Collection::one(CollectionType::SecretPolicy, view)).into_response())
}
