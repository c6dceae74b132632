//! # Vigil API
//!
//! REST layer over the Vigil lifecycle engine.
//!
//! ## Endpoints
//!
//! All routes live under `/api/v1`:
//!
//! - `/secrets/{secret_type}[/{id}]` - Create, list, read, delete, and the
//!   `rotate` / `restore` / `revoke` / `delete_credentials` /
//!   `validate_dns_challenge` actions
//! - `/secrets/{secret_type}/{id}/metadata`, `/versions`, `/policies`
//! - `/locks/{secret_type}/{id}[/versions/{version_id}]` - Version locks
//! - `/secret_groups[/{id}]` - Secret groups
//! - `/config/{secret_type}` - Certificate authorities, DNS providers,
//!   templates and the IAM API key
//! - `/sys/health` - Liveness
//!
//! Responses use the `{metadata, resources}` collection envelope; errors use
//! the same envelope with the error collection type.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;
mod extract;
mod handlers;
mod routes;

#[cfg(test)]
mod tests;

pub use envelope::{Collection, CollectionMetadata, CollectionType};
pub use error::ApiError;
pub use routes::router;

use vigil_lifecycle::LifecycleEngine;

use crate::extract::Actor;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    engine: LifecycleEngine,
}

impl ApiState {
    /// Wraps `engine`.
    pub fn new(engine: LifecycleEngine) -> Self {
        Self { engine }
    }

    /// The engine behind the API.
    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    /// The engine with writes attributed to the caller.
    pub(crate) fn acting(&self, actor: &Actor) -> LifecycleEngine {
        self.engine.acting_as(&actor.0)
    }
}
