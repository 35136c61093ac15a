//! Audit trail reads and CSV exports.
//!
//! Every read is pinned to the actor's tenant regardless of the filter
//! supplied. The retention purge spans all tenants and is reserved for
//! installation administrators.

use crate::api::{require_tenant_admin, with_conn, ApiError};
use crate::AppState;
use accord_audit::{
    count, feature_usage, partner_activity, purge, query, record_export, stats, timeline,
    write_audit_csv, AuditEntry, AuditFilter, AuditStats, ExportKind, FeatureUsage,
    PartnerActivity, PurgeReport, TimelinePoint,
};
use accord_federation::{write_api_activity_csv, write_partnerships_csv};
use accord_types::{ActorContext, OperationResult, Role};
use axum::{
    extract::{Extension, Path, Query},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

/// A page of audit entries plus the unpaged total.
#[derive(Debug, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}

fn scoped(actor: &ActorContext, filter: AuditFilter) -> AuditFilter {
    AuditFilter {
        tenant_id: Some(actor.tenant_id),
        ..filter
    }
}

pub async fn list_audit_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<OperationResult<AuditPage>>, ApiError> {
    require_tenant_admin(&actor)?;
    let filter = scoped(&actor, filter);
    let page = with_conn(&state, move |conn| {
        Ok(AuditPage {
            entries: query(conn, &filter)?,
            total: count(conn, &filter)?,
            limit: filter.effective_limit(),
            offset: filter.offset.unwrap_or(0),
        })
    })
    .await?;
    Ok(Json(OperationResult::ok(page)))
}

pub async fn audit_timeline_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<OperationResult<Vec<TimelinePoint>>>, ApiError> {
    require_tenant_admin(&actor)?;
    let filter = scoped(&actor, filter);
    let points = with_conn(&state, move |conn| Ok(timeline(conn, &filter)?)).await?;
    Ok(Json(OperationResult::ok(points)))
}

pub async fn audit_partners_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<OperationResult<Vec<PartnerActivity>>>, ApiError> {
    require_tenant_admin(&actor)?;
    let filter = scoped(&actor, filter);
    let partners = with_conn(&state, move |conn| Ok(partner_activity(conn, &filter)?)).await?;
    Ok(Json(OperationResult::ok(partners)))
}

pub async fn audit_features_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<OperationResult<Vec<FeatureUsage>>>, ApiError> {
    require_tenant_admin(&actor)?;
    let filter = scoped(&actor, filter);
    let usage = with_conn(&state, move |conn| Ok(feature_usage(conn, &filter)?)).await?;
    Ok(Json(OperationResult::ok(usage)))
}

pub async fn audit_stats_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<OperationResult<AuditStats>>, ApiError> {
    require_tenant_admin(&actor)?;
    let filter = scoped(&actor, filter);
    let summary = with_conn(&state, move |conn| Ok(stats(conn, &filter)?)).await?;
    Ok(Json(OperationResult::ok(summary)))
}

/// Deletes audit entries older than `federation.audit_retention_days`.
pub async fn purge_audit_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
) -> Result<Json<OperationResult<PurgeReport>>, ApiError> {
    if !actor.roles.contains(&Role::SuperAdmin) {
        return Err(ApiError::Forbidden(
            "purging the audit trail requires the super_admin role".to_string(),
        ));
    }
    let retention_days = state.federation.audit_retention_days;
    let report = with_conn(&state, move |conn| Ok(purge(conn, retention_days, &actor)?)).await?;
    tracing::info!(
        retention_days,
        deleted = report.deleted,
        deleted_critical = report.deleted_critical,
        "audit trail purged"
    );
    Ok(Json(OperationResult::ok(report)))
}

fn parse_export_kind(raw: &str) -> Result<ExportKind, ApiError> {
    match raw {
        "audit" => Ok(ExportKind::Audit),
        "partnerships" => Ok(ExportKind::Partnerships),
        "api-activity" => Ok(ExportKind::ApiActivity),
        other => Err(ApiError::NotFound(format!("unknown export: {other}"))),
    }
}

/// Streams a CSV export as a download and records a `data_exported` entry.
///
/// The audit export honours the same filters as the audit listing.
pub async fn export_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(actor): Extension<ActorContext>,
    Path(kind): Path<String>,
    Query(filter): Query<AuditFilter>,
) -> Result<Response, ApiError> {
    require_tenant_admin(&actor)?;
    let kind = parse_export_kind(&kind)?;
    let filter = scoped(&actor, filter);

    let csv = with_conn(&state, move |conn| {
        let mut buf = Vec::new();
        let rows = match kind {
            ExportKind::Audit => write_audit_csv(conn, &filter, &mut buf)?,
            ExportKind::Partnerships => write_partnerships_csv(conn, actor.tenant_id, &mut buf)?,
            ExportKind::ApiActivity => write_api_activity_csv(conn, actor.tenant_id, &mut buf)?,
        };
        record_export(conn, &actor, kind, rows);
        tracing::info!(tenant_id = actor.tenant_id, export = kind.as_str(), rows, "federation export generated");
        Ok(buf)
    })
    .await?;

    let file_name = kind.file_name(&chrono::Utc::now().format("%Y-%m-%d").to_string());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        csv,
    )
        .into_response())
}
