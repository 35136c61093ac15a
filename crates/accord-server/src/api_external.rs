//! External partner endpoints under
//! `/api/admin/federation/external-partners`.

use crate::api::{with_conn, ApiError, ApiJson};
use crate::AppState;
use accord_federation::{
    list_external_partners, test_connection, ConnectionTestReport, ExternalPartner,
    ExternalPartnerRegistry, ExternalPartnerUpdate, FederationError, NewExternalPartner,
    SqliteFeatureGate,
};
use accord_types::{ActorContext, OperationResult};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

type PartnerResponse = Json<OperationResult<ExternalPartner>>;

async fn with_registry<T, F>(state: &AppState, actor: ActorContext, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ExternalPartnerRegistry<'_>, &ActorContext) -> Result<T, FederationError>
        + Send
        + 'static,
{
    with_conn(state, move |conn| {
        let gate = SqliteFeatureGate::new(conn);
        Ok(op(&ExternalPartnerRegistry::new(conn, &gate), &actor)?)
    })
    .await
}

pub async fn create_external_partner_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    ApiJson(input): ApiJson<NewExternalPartner>,
) -> Result<(StatusCode, PartnerResponse), ApiError> {
    let partner = with_registry(&state, actor, move |registry, actor| {
        registry.create(actor, &input)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(OperationResult::ok(partner))))
}

pub async fn list_external_partners_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
) -> Result<Json<OperationResult<Vec<ExternalPartner>>>, ApiError> {
    let partners =
        with_conn(&state, move |conn| Ok(list_external_partners(conn, actor.tenant_id)?)).await?;
    Ok(Json(OperationResult::ok(partners)))
}

pub async fn get_external_partner_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<PartnerResponse, ApiError> {
    let partner = with_registry(&state, actor, move |registry, actor| registry.get(id, actor)).await?;
    Ok(Json(OperationResult::ok(partner)))
}

pub async fn update_external_partner_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
    ApiJson(update): ApiJson<ExternalPartnerUpdate>,
) -> Result<PartnerResponse, ApiError> {
    let partner = with_registry(&state, actor, move |registry, actor| {
        registry.update(id, actor, &update)
    })
    .await?;
    Ok(Json(OperationResult::ok(partner)))
}

pub async fn delete_external_partner_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<Json<OperationResult<Value>>, ApiError> {
    with_registry(&state, actor, move |registry, actor| registry.delete(id, actor)).await?;
    Ok(Json(OperationResult::ok(json!({ "deleted": id }))))
}

pub async fn suspend_external_partner_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<PartnerResponse, ApiError> {
    let partner =
        with_registry(&state, actor, move |registry, actor| registry.suspend(id, actor)).await?;
    Ok(Json(OperationResult::ok(partner)))
}

pub async fn activate_external_partner_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<PartnerResponse, ApiError> {
    let partner =
        with_registry(&state, actor, move |registry, actor| registry.activate(id, actor)).await?;
    Ok(Json(OperationResult::ok(partner)))
}

/// Probes the partner's discovery endpoint. An unreachable or misbehaving
/// node answers `502` with the diagnostic report as `data`.
pub async fn test_external_partner_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<OperationResult<ConnectionTestReport>>), ApiError> {
    let report = test_connection(
        &state.pool,
        &state.http_client,
        id,
        &actor,
        state.federation.connect_timeout(),
    )
    .await?;

    if report.success {
        return Ok((StatusCode::OK, Json(OperationResult::ok(report))));
    }
    let error = report
        .error
        .clone()
        .unwrap_or_else(|| "connection test failed".to_string());
    Ok((
        StatusCode::BAD_GATEWAY,
        Json(OperationResult::failure_with(error, report)),
    ))
}
