//! Federation API key endpoints under `/api/admin/federation/api-keys`.
//!
//! Raw keys and signing secrets appear only in the responses to issue and
//! regenerate.

use crate::api::{with_conn, ApiError, ApiJson};
use crate::AppState;
use accord_federation::{
    list_api_keys, ApiKeySummary, CredentialIssuer, FederationError, IssuedCredential, NewApiKey,
    SqliteFeatureGate,
};
use accord_types::{ActorContext, OperationResult};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

async fn with_issuer<T, F>(state: &AppState, actor: ActorContext, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&CredentialIssuer<'_>, &ActorContext) -> Result<T, FederationError> + Send + 'static,
{
    with_conn(state, move |conn| {
        let gate = SqliteFeatureGate::new(conn);
        Ok(op(&CredentialIssuer::new(conn, &gate), &actor)?)
    })
    .await
}

pub async fn issue_api_key_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    ApiJson(input): ApiJson<NewApiKey>,
) -> Result<(StatusCode, Json<OperationResult<IssuedCredential>>), ApiError> {
    let issued = with_issuer(&state, actor, move |issuer, actor| issuer.issue(actor, &input)).await?;
    Ok((StatusCode::CREATED, Json(OperationResult::ok(issued))))
}

pub async fn list_api_keys_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
) -> Result<Json<OperationResult<Vec<ApiKeySummary>>>, ApiError> {
    let keys = with_conn(&state, move |conn| Ok(list_api_keys(conn, actor.tenant_id)?)).await?;
    Ok(Json(OperationResult::ok(keys)))
}

pub async fn get_api_key_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<Json<OperationResult<ApiKeySummary>>, ApiError> {
    let key = with_issuer(&state, actor, move |issuer, actor| issuer.get(id, actor)).await?;
    Ok(Json(OperationResult::ok(key)))
}

pub async fn suspend_api_key_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<Json<OperationResult<ApiKeySummary>>, ApiError> {
    let key = with_issuer(&state, actor, move |issuer, actor| issuer.suspend(id, actor)).await?;
    Ok(Json(OperationResult::ok(key)))
}

pub async fn activate_api_key_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<Json<OperationResult<ApiKeySummary>>, ApiError> {
    let key = with_issuer(&state, actor, move |issuer, actor| issuer.activate(id, actor)).await?;
    Ok(Json(OperationResult::ok(key)))
}

pub async fn revoke_api_key_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<Json<OperationResult<ApiKeySummary>>, ApiError> {
    let key = with_issuer(&state, actor, move |issuer, actor| issuer.revoke(id, actor)).await?;
    Ok(Json(OperationResult::ok(key)))
}

pub async fn regenerate_api_key_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<Json<OperationResult<IssuedCredential>>, ApiError> {
    let issued = with_issuer(&state, actor, move |issuer, actor| issuer.regenerate(id, actor)).await?;
    Ok(Json(OperationResult::ok(issued)))
}
