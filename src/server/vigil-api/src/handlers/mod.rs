//! Route handlers.

pub mod config;
pub mod groups;
pub mod locks;
pub mod secrets;
pub mod sys;
pub mod versions;

use uuid::Uuid;

use vigil_lifecycle::{Pagination, SecretMetadata, SecretType};

use crate::error::ApiError;
use crate::extract::{secret_id, secret_type};
use crate::ApiState;

/// Page window from `offset` / `limit` query parameters.
fn pagination(
    state: &ApiState,
    offset: Option<usize>,
    limit: Option<usize>,
) -> Result<Pagination, ApiError> {
    Ok(Pagination::new(
        offset,
        limit,
        state.engine().config().default_page_limit,
    )?)
}

/// Resolves `{secret_type}/{id}` to a secret of that type.
///
/// A secret addressed under the wrong type is reported as missing.
async fn typed_secret(
    state: &ApiState,
    raw_type: &str,
    raw_id: &str,
) -> Result<(Uuid, SecretMetadata), ApiError> {
    let ty = secret_type(raw_type)?;
    let id = secret_id(raw_id)?;
    let metadata = state.engine().get_secret_metadata(id).await?;
    check_type(ty, id, metadata.kind.secret_type())?;
    Ok((id, metadata))
}

fn check_type(expected: SecretType, id: Uuid, actual: SecretType) -> Result<(), ApiError> {
    if expected != actual {
        return Err(ApiError::NotFound(format!("{expected} secret {id}")));
    }
    Ok(())
}
