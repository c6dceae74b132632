//! Router assembly.

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{config, groups, locks, secrets, sys, versions};
use crate::ApiState;

/// Builds the `/api/v1` router over `state`.
pub fn router(state: ApiState) -> Router {
    let secret_routes = Router::new()
        .route(
            "/{secret_type}",
            post(secrets::create_secret).get(secrets::list_secrets),
        )
        .route(
            "/{secret_type}/{id}",
            get(secrets::get_secret)
                .post(secrets::secret_action)
                .delete(secrets::delete_secret),
        )
        .route(
            "/{secret_type}/{id}/metadata",
            get(secrets::get_metadata).put(secrets::update_metadata),
        )
        .route("/{secret_type}/{id}/state", put(secrets::set_state))
        .route(
            "/{secret_type}/{id}/policies",
            get(secrets::get_policy).put(secrets::put_policy),
        )
        .route("/{secret_type}/{id}/versions", get(versions::list_versions))
        .route(
            "/{secret_type}/{id}/versions/{version_id}",
            get(versions::get_version),
        )
        .route(
            "/{secret_type}/{id}/versions/{version_id}/metadata",
            get(versions::get_version_metadata).put(versions::update_version_metadata),
        );

    let lock_routes = Router::new()
        .route("/{secret_type}/{id}", get(locks::list_secret_locks))
        .route(
            "/{secret_type}/{id}/versions/{version_id}",
            get(locks::list_version_locks),
        )
        .route(
            "/{secret_type}/{id}/versions/{version_id}/lock",
            post(locks::lock_version),
        )
        .route(
            "/{secret_type}/{id}/versions/{version_id}/unlock",
            post(locks::unlock_version),
        );

    let group_routes = Router::new()
        .route("/", post(groups::create_group).get(groups::list_groups))
        .route(
            "/{id}",
            get(groups::get_group)
                .put(groups::update_group)
                .delete(groups::delete_group),
        );

    let api = Router::new()
        .nest("/secrets", secret_routes)
        .nest("/locks", lock_routes)
        .nest("/secret_groups", group_routes)
        .route(
            "/config/{secret_type}",
            get(config::get_config).put(config::put_config),
        )
        .route("/sys/health", get(sys::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
