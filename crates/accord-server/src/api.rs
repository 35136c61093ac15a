//! Shared API plumbing plus the unauthenticated and federation-facing
//! endpoints.

use crate::AppState;
use accord_audit::AuditError;
use accord_federation::{AuthenticatedKey, FederationError};
use accord_types::{ActorContext, ErrorKind, OperationResult};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Extension, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

/// Protocol version announced by the discovery endpoint.
pub const FEDERATION_API_VERSION: &str = "1.0";

/// Errors returned by HTTP handlers, rendered as
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalServerError(msg) => {
                tracing::error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "an internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "success": false,
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<FederationError> for ApiError {
    fn from(err: FederationError) -> Self {
        let message = err.public_message();
        match err.kind() {
            ErrorKind::Validation => ApiError::BadRequest(message),
            ErrorKind::NotFound => ApiError::NotFound(message),
            ErrorKind::Conflict => ApiError::Conflict(message),
            ErrorKind::Forbidden => ApiError::Forbidden(message),
            ErrorKind::ExternalUnavailable => ApiError::BadGateway(message),
            ErrorKind::Internal => ApiError::InternalServerError(err.to_string()),
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::InvalidFilter(msg) => ApiError::BadRequest(msg),
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

/// JSON body extractor whose rejections use the `{"success": false}`
/// envelope instead of axum's plain-text body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

/// Runs `f` against a pooled connection on the blocking thread pool.
pub(crate) async fn with_conn<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, ApiError> + Send + 'static,
{
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("pool error: {e}")))?;
        f(&conn)
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {e}")))?
}

/// Parses an optional JSON body. An empty body yields `T::default()`.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

/// Reads on audit and export endpoints are limited to tenant administrators.
pub(crate) fn require_tenant_admin(actor: &ActorContext) -> Result<(), ApiError> {
    if actor.is_tenant_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "federation administration requires an admin role".to_string(),
        ))
    }
}

/// Health check handler.
///
/// `audit_incidents` counts audit writes dropped since start; anything above
/// zero needs an operator.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "audit_incidents": accord_audit::audit_incident_count()
    }))
}

/// The endpoint partner installations call when testing a connection.
pub async fn discovery_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "api": "Federation API",
        "name": state.public_name,
        "version": FEDERATION_API_VERSION,
        "endpoints": {
            "discovery": "/api/v1/federation",
            "whoami": "/api/v1/federation/whoami"
        }
    }))
}

/// Echoes the tenant and scopes bound to the presented credential.
pub async fn whoami_handler(
    Extension(key): Extension<AuthenticatedKey>,
) -> Json<OperationResult<AuthenticatedKey>> {
    Json(OperationResult::ok(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn federation_errors_map_to_status_codes() {
        let cases = [
            (FederationError::Validation("bad level".into()), StatusCode::BAD_REQUEST),
            (FederationError::NotFound("partnership"), StatusCode::NOT_FOUND),
            (FederationError::Conflict("already active".into()), StatusCode::CONFLICT),
            (FederationError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (
                FederationError::ExternalUnavailable("timeout".into()),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, expected) in cases {
            let (status, json) = body_json(ApiError::from(err)).await;
            assert_eq!(status, expected);
            assert_eq!(json["success"], false);
        }
    }

    #[tokio::test]
    async fn internal_errors_are_sanitized() {
        let err = FederationError::Internal("disk I/O at /var/lib/accord.db".into());
        let (status, json) = body_json(ApiError::from(err)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "an internal error occurred");
    }

    #[test]
    fn empty_optional_body_is_default() {
        let parsed: accord_types::PermissionsUpdate = optional_json(&Bytes::from_static(b"  ")).unwrap();
        assert!(parsed.is_empty());
        assert!(matches!(
            optional_json::<accord_types::PermissionsUpdate>(&Bytes::from_static(b"{oops")),
            Err(ApiError::BadRequest(_))
        ));
    }
}
