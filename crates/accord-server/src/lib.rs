//! Accord server library logic.
//!
//! Two surfaces share one router:
//!
//! - `/api/admin/federation/*`: tenant administration, called by the
//!   platform's session layer with the acting user in `X-Accord-*` headers.
//! - `/api/v1/federation/*`: the federation API partner installations call
//!   with an issued API key or HMAC signature.

pub mod api;
pub mod api_audit;
pub mod api_credentials;
pub mod api_external;
pub mod api_partnerships;
pub mod config;
pub mod middleware;

use accord_db::DbPool;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Extension, Router,
};
use config::{Config, FederationConfig};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Outbound client used for connectivity tests.
    pub http_client: reqwest::Client,
    /// Name announced by the discovery endpoint.
    pub public_name: String,
    pub federation: FederationConfig,
}

impl AppState {
    /// Builds the state from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the outbound HTTP client cannot be constructed.
    pub fn new(pool: DbPool, config: &Config) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("accord/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.federation.connect_timeout())
            .build()?;
        Ok(Self {
            pool,
            http_client,
            public_name: config.server.public_name.clone(),
            federation: config.federation.clone(),
        })
    }
}

/// Maximum request body size (256 KiB). Every endpoint takes small JSON.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

fn admin_routes() -> Router {
    Router::new()
        .route(
            "/partnerships",
            post(api_partnerships::request_partnership_handler)
                .get(api_partnerships::list_partnerships_handler),
        )
        .route(
            "/partnerships/incoming",
            get(api_partnerships::incoming_partnerships_handler),
        )
        .route(
            "/partnerships/outgoing",
            get(api_partnerships::outgoing_partnerships_handler),
        )
        .route(
            "/partnerships/counter-proposals",
            get(api_partnerships::counter_proposals_handler),
        )
        .route(
            "/partnerships/stats",
            get(api_partnerships::partnership_stats_handler),
        )
        .route(
            "/partnerships/{id}",
            get(api_partnerships::get_partnership_handler),
        )
        .route(
            "/partnerships/{id}/counter-propose",
            post(api_partnerships::counter_propose_handler),
        )
        .route(
            "/partnerships/{id}/accept-counter",
            post(api_partnerships::accept_counter_handler),
        )
        .route(
            "/partnerships/{id}/approve",
            post(api_partnerships::approve_handler),
        )
        .route(
            "/partnerships/{id}/reject",
            post(api_partnerships::reject_handler),
        )
        .route(
            "/partnerships/{id}/permissions",
            patch(api_partnerships::update_permissions_handler),
        )
        .route(
            "/partnerships/{id}/terminate",
            post(api_partnerships::terminate_handler),
        )
        .route(
            "/partnerships/{id}/withdraw",
            post(api_partnerships::withdraw_handler),
        )
        .route(
            "/partnerships/{id}/suspend",
            post(api_partnerships::suspend_handler),
        )
        .route(
            "/partnerships/{id}/reactivate",
            post(api_partnerships::reactivate_handler),
        )
        .route(
            "/api-keys",
            post(api_credentials::issue_api_key_handler)
                .get(api_credentials::list_api_keys_handler),
        )
        .route("/api-keys/{id}", get(api_credentials::get_api_key_handler))
        .route(
            "/api-keys/{id}/suspend",
            post(api_credentials::suspend_api_key_handler),
        )
        .route(
            "/api-keys/{id}/activate",
            post(api_credentials::activate_api_key_handler),
        )
        .route(
            "/api-keys/{id}/revoke",
            post(api_credentials::revoke_api_key_handler),
        )
        .route(
            "/api-keys/{id}/regenerate",
            post(api_credentials::regenerate_api_key_handler),
        )
        .route(
            "/external-partners",
            post(api_external::create_external_partner_handler)
                .get(api_external::list_external_partners_handler),
        )
        .route(
            "/external-partners/{id}",
            get(api_external::get_external_partner_handler)
                .patch(api_external::update_external_partner_handler)
                .delete(api_external::delete_external_partner_handler),
        )
        .route(
            "/external-partners/{id}/test",
            post(api_external::test_external_partner_handler),
        )
        .route(
            "/external-partners/{id}/suspend",
            post(api_external::suspend_external_partner_handler),
        )
        .route(
            "/external-partners/{id}/activate",
            post(api_external::activate_external_partner_handler),
        )
        .route("/audit", get(api_audit::list_audit_handler))
        .route("/audit/timeline", get(api_audit::audit_timeline_handler))
        .route("/audit/partners", get(api_audit::audit_partners_handler))
        .route("/audit/features", get(api_audit::audit_features_handler))
        .route("/audit/stats", get(api_audit::audit_stats_handler))
        .route("/audit/purge", post(api_audit::purge_audit_handler))
        .route("/export/{kind}", get(api_audit::export_handler))
        .layer(axum::middleware::from_fn(middleware::actor_middleware))
}

fn federation_routes() -> Router {
    Router::new()
        .route("/api/v1/federation", get(api::discovery_handler))
        .route("/api/v1/federation/whoami", get(api::whoami_handler))
        .route_layer(axum::middleware::from_fn(
            middleware::federation_auth_middleware,
        ))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .nest("/api/admin/federation", admin_routes())
        .merge(federation_routes())
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
