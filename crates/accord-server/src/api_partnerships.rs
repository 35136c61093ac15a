//! Partnership administration endpoints under
//! `/api/admin/federation/partnerships`.

use crate::api::{optional_json, with_conn, ApiError, ApiJson};
use crate::AppState;
use accord_federation::partnership::{counter_proposals, list_for_tenant, outgoing, pending_incoming, stats};
use accord_federation::{
    CounterProposalInput, FederationError, NewPartnershipRequest, OutboxNotifier, Partnership,
    PartnershipRegistry, PartnershipStats, PartnershipStatus, SqliteFeatureGate,
};
use accord_types::{ActorContext, OperationResult, PermissionsUpdate};
use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

type PartnershipResponse = Json<OperationResult<Partnership>>;

#[derive(Debug, Default, Deserialize)]
pub struct ListPartnershipsQuery {
    pub status: Option<PartnershipStatus>,
}

/// Optional free-text reason carried by reject, terminate, withdraw and
/// suspend.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReasonBody {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApproveBody {
    pub permissions: Option<PermissionsUpdate>,
}

/// Runs one registry call with the installation's gate and notification
/// outbox.
async fn with_registry<T, F>(state: &AppState, actor: ActorContext, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&PartnershipRegistry<'_>, &ActorContext) -> Result<T, FederationError> + Send + 'static,
{
    with_conn(state, move |conn| {
        let gate = SqliteFeatureGate::new(conn);
        let notifier = OutboxNotifier::new(conn);
        let registry = PartnershipRegistry::new(conn, &gate, &notifier);
        Ok(op(&registry, &actor)?)
    })
    .await
}

pub async fn request_partnership_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    ApiJson(input): ApiJson<NewPartnershipRequest>,
) -> Result<(StatusCode, PartnershipResponse), ApiError> {
    let partnership = with_registry(&state, actor, move |registry, actor| {
        registry.request(actor, &input)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(OperationResult::ok(partnership))))
}

pub async fn list_partnerships_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Query(params): Query<ListPartnershipsQuery>,
) -> Result<Json<OperationResult<Vec<Partnership>>>, ApiError> {
    let list = with_conn(&state, move |conn| {
        Ok(list_for_tenant(conn, actor.tenant_id, params.status)?)
    })
    .await?;
    Ok(Json(OperationResult::ok(list)))
}

/// Pending requests awaiting the actor's tenant.
pub async fn incoming_partnerships_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
) -> Result<Json<OperationResult<Vec<Partnership>>>, ApiError> {
    let list = with_conn(&state, move |conn| Ok(pending_incoming(conn, actor.tenant_id)?)).await?;
    Ok(Json(OperationResult::ok(list)))
}

pub async fn outgoing_partnerships_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
) -> Result<Json<OperationResult<Vec<Partnership>>>, ApiError> {
    let list = with_conn(&state, move |conn| Ok(outgoing(conn, actor.tenant_id)?)).await?;
    Ok(Json(OperationResult::ok(list)))
}

/// Requests the actor's tenant sent that came back with a counter-proposal.
pub async fn counter_proposals_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
) -> Result<Json<OperationResult<Vec<Partnership>>>, ApiError> {
    let list = with_conn(&state, move |conn| Ok(counter_proposals(conn, actor.tenant_id)?)).await?;
    Ok(Json(OperationResult::ok(list)))
}

pub async fn partnership_stats_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
) -> Result<Json<OperationResult<PartnershipStats>>, ApiError> {
    let summary = with_conn(&state, move |conn| Ok(stats(conn, Some(actor.tenant_id))?)).await?;
    Ok(Json(OperationResult::ok(summary)))
}

pub async fn get_partnership_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<PartnershipResponse, ApiError> {
    let partnership = with_registry(&state, actor, move |registry, actor| registry.get(id, actor)).await?;
    Ok(Json(OperationResult::ok(partnership)))
}

pub async fn counter_propose_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
    ApiJson(input): ApiJson<CounterProposalInput>,
) -> Result<PartnershipResponse, ApiError> {
    let partnership = with_registry(&state, actor, move |registry, actor| {
        registry.counter_propose(id, actor, &input)
    })
    .await?;
    Ok(Json(OperationResult::ok(partnership)))
}

pub async fn accept_counter_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<PartnershipResponse, ApiError> {
    let partnership = with_registry(&state, actor, move |registry, actor| {
        registry.accept_counter_proposal(id, actor)
    })
    .await?;
    Ok(Json(OperationResult::ok(partnership)))
}

/// Body is optional; `{"permissions": {...}}` overrides the level defaults.
pub async fn approve_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<PartnershipResponse, ApiError> {
    let body: ApproveBody = optional_json(&body)?;
    let partnership = with_registry(&state, actor, move |registry, actor| {
        registry.approve(id, actor, body.permissions.as_ref())
    })
    .await?;
    Ok(Json(OperationResult::ok(partnership)))
}

pub async fn reject_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<PartnershipResponse, ApiError> {
    let body: ReasonBody = optional_json(&body)?;
    let partnership = with_registry(&state, actor, move |registry, actor| {
        registry.reject(id, actor, body.reason.as_deref())
    })
    .await?;
    Ok(Json(OperationResult::ok(partnership)))
}

pub async fn update_permissions_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
    ApiJson(update): ApiJson<PermissionsUpdate>,
) -> Result<PartnershipResponse, ApiError> {
    let partnership = with_registry(&state, actor, move |registry, actor| {
        registry.update_permissions(id, actor, &update)
    })
    .await?;
    Ok(Json(OperationResult::ok(partnership)))
}

pub async fn terminate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<PartnershipResponse, ApiError> {
    let body: ReasonBody = optional_json(&body)?;
    let partnership = with_registry(&state, actor, move |registry, actor| {
        registry.terminate(id, actor, body.reason.as_deref())
    })
    .await?;
    Ok(Json(OperationResult::ok(partnership)))
}

pub async fn withdraw_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<PartnershipResponse, ApiError> {
    let body: ReasonBody = optional_json(&body)?;
    let partnership = with_registry(&state, actor, move |registry, actor| {
        registry.withdraw(id, actor, body.reason.as_deref())
    })
    .await?;
    Ok(Json(OperationResult::ok(partnership)))
}

pub async fn suspend_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<PartnershipResponse, ApiError> {
    let body: ReasonBody = optional_json(&body)?;
    let partnership = with_registry(&state, actor, move |registry, actor| {
        registry.suspend(id, actor, body.reason.as_deref())
    })
    .await?;
    Ok(Json(OperationResult::ok(partnership)))
}

pub async fn reactivate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<i64>,
) -> Result<PartnershipResponse, ApiError> {
    let partnership = with_registry(&state, actor, move |registry, actor| {
        registry.reactivate(id, actor)
    })
    .await?;
    Ok(Json(OperationResult::ok(partnership)))
}
