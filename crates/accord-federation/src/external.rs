//! External partner registry: federation nodes hosted by other installations.
//!
//! Registration stores the outbound credentials this installation presents
//! when calling the node. [`test_connection`] checks that the node's
//! discovery endpoint answers; it records the outcome as diagnostics and an
//! audit entry but never changes the partner's status.

use std::time::{Duration, Instant};

use accord_audit::{record_or_report, AuditAction, NewAuditEntry};
use accord_db::DbPool;
use accord_types::{ActorContext, TenantId};
use chrono::Utc;
use reqwest::header::ACCEPT;
use reqwest::Client;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::access::{authorize_mutation, clean_text, conversion_error};
use crate::auth::{sign_request, PLATFORM_ID_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::error::FederationError;
use crate::gate::{FeatureGate, SqliteFeatureGate};
use crate::types::{
    AuthMethod, ConnectionTestReport, ExternalCapabilities, ExternalPartner,
    ExternalPartnerStatus,
};

pub const DEFAULT_API_PATH: &str = "/api/v1/federation";

/// Default budget for a connectivity test.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Input for [`ExternalPartnerRegistry::create`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewExternalPartner {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub api_path: Option<String>,
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub signing_secret: Option<String>,
    #[serde(default)]
    pub platform_id: Option<String>,
    #[serde(default)]
    pub capabilities: ExternalCapabilities,
}

/// Partial update; `None` keeps the stored value and an empty string clears
/// an optional one. Credentials the resulting auth method does not use are
/// dropped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExternalPartnerUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub base_url: Option<String>,
    pub api_path: Option<String>,
    pub auth_method: Option<AuthMethod>,
    pub api_key: Option<String>,
    pub signing_secret: Option<String>,
    pub platform_id: Option<String>,
    pub capabilities: Option<ExternalCapabilities>,
}

/// Validated column values shared by create and update.
struct PartnerFields {
    name: String,
    description: Option<String>,
    base_url: String,
    api_path: String,
    auth_method: AuthMethod,
    api_key: Option<String>,
    signing_secret: Option<String>,
    platform_id: Option<String>,
    capabilities: ExternalCapabilities,
}

impl PartnerFields {
    fn validate(self) -> Result<Self, FederationError> {
        let name = clean_text(Some(&self.name))
            .ok_or_else(|| FederationError::Validation("name is required".to_string()))?;
        let base_url = validate_base_url(&self.base_url)?;
        let api_path = clean_text(Some(&self.api_path)).unwrap_or_else(|| DEFAULT_API_PATH.to_string());
        if !api_path.starts_with('/') {
            return Err(FederationError::Validation(
                "api path must start with '/'".to_string(),
            ));
        }

        // Only the credentials the chosen method presents are kept.
        let (api_key, signing_secret, platform_id) = match self.auth_method {
            AuthMethod::ApiKey => {
                let api_key = clean_text(self.api_key.as_deref()).ok_or_else(|| {
                    FederationError::Validation(
                        "api key authentication requires an api key".to_string(),
                    )
                })?;
                (Some(api_key), None, None)
            }
            AuthMethod::Hmac => {
                let signing_secret = clean_text(self.signing_secret.as_deref());
                let platform_id = clean_text(self.platform_id.as_deref());
                if signing_secret.is_none() || platform_id.is_none() {
                    return Err(FederationError::Validation(
                        "hmac authentication requires a signing secret and platform id".to_string(),
                    ));
                }
                (None, signing_secret, platform_id)
            }
        };

        Ok(Self {
            name,
            description: clean_text(self.description.as_deref()),
            base_url,
            api_path,
            auth_method: self.auth_method,
            api_key,
            signing_secret,
            platform_id,
            capabilities: self.capabilities,
        })
    }
}

/// Accepts absolute http(s) URLs with a host. Returns the URL without a
/// trailing slash.
pub fn validate_base_url(raw: &str) -> Result<String, FederationError> {
    let invalid = || FederationError::Validation(format!("invalid base url: {raw}"));
    let url = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

const PARTNER_COLUMNS: &str = "id, tenant_id, name, description, base_url, api_path, auth_method,
     api_key, signing_secret, platform_id,
     allow_member_search, allow_listing_search, allow_messaging,
     allow_transactions, allow_events, allow_groups,
     status, last_tested_at, last_test_success, created_by, created_at, updated_at";

fn partner_from_row(row: &Row<'_>) -> rusqlite::Result<ExternalPartner> {
    let auth_method: String = row.get(6)?;
    let status: String = row.get(16)?;
    Ok(ExternalPartner {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        base_url: row.get(4)?,
        api_path: row.get(5)?,
        auth_method: auth_method
            .parse()
            .map_err(|e| conversion_error(6, Type::Text, e))?,
        api_key: row.get(7)?,
        signing_secret: row.get(8)?,
        platform_id: row.get(9)?,
        capabilities: ExternalCapabilities {
            member_search: row.get(10)?,
            listing_search: row.get(11)?,
            messaging: row.get(12)?,
            transactions: row.get(13)?,
            events: row.get(14)?,
            groups: row.get(15)?,
        },
        status: status
            .parse()
            .map_err(|e| conversion_error(16, Type::Text, e))?,
        last_tested_at: row.get(17)?,
        last_test_success: row.get(18)?,
        created_by: row.get(19)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

/// Partners owned by `tenant_id`, deleted ones excluded.
pub fn list_external_partners(
    conn: &Connection,
    tenant_id: TenantId,
) -> Result<Vec<ExternalPartner>, FederationError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PARTNER_COLUMNS} FROM federation_external_partners
         WHERE tenant_id = ?1 AND status <> 'deleted'
         ORDER BY name COLLATE NOCASE, id"
    ))?;
    let rows = stmt.query_map([tenant_id], partner_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn get_visible(
    conn: &Connection,
    id: i64,
    tenant_id: TenantId,
) -> Result<ExternalPartner, FederationError> {
    conn.query_row(
        &format!(
            "SELECT {PARTNER_COLUMNS} FROM federation_external_partners
             WHERE id = ?1 AND tenant_id = ?2 AND status <> 'deleted'"
        ),
        params![id, tenant_id],
        partner_from_row,
    )
    .optional()?
    .ok_or(FederationError::NotFound("external partner"))
}

pub struct ExternalPartnerRegistry<'a> {
    conn: &'a Connection,
    gate: &'a dyn FeatureGate,
}

impl<'a> ExternalPartnerRegistry<'a> {
    pub fn new(conn: &'a Connection, gate: &'a dyn FeatureGate) -> Self {
        Self { conn, gate }
    }

    pub fn get(&self, id: i64, actor: &ActorContext) -> Result<ExternalPartner, FederationError> {
        get_visible(self.conn, id, actor.tenant_id)
    }

    pub fn create(
        &self,
        actor: &ActorContext,
        input: &NewExternalPartner,
    ) -> Result<ExternalPartner, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let fields = PartnerFields {
            name: input.name.clone(),
            description: input.description.clone(),
            base_url: input.base_url.clone(),
            api_path: input.api_path.clone().unwrap_or_default(),
            auth_method: input.auth_method,
            api_key: input.api_key.clone(),
            signing_secret: input.signing_secret.clone(),
            platform_id: input.platform_id.clone(),
            capabilities: input.capabilities,
        }
        .validate()?;

        let caps = fields.capabilities;
        let id: i64 = self.conn.query_row(
            "INSERT INTO federation_external_partners (
                 tenant_id, name, description, base_url, api_path, auth_method,
                 api_key, signing_secret, platform_id,
                 allow_member_search, allow_listing_search, allow_messaging,
                 allow_transactions, allow_events, allow_groups, created_by
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             RETURNING id",
            params![
                actor.tenant_id,
                fields.name,
                fields.description,
                fields.base_url,
                fields.api_path,
                fields.auth_method.as_str(),
                fields.api_key,
                fields.signing_secret,
                fields.platform_id,
                caps.member_search,
                caps.listing_search,
                caps.messaging,
                caps.transactions,
                caps.events,
                caps.groups,
                actor.user_id,
            ],
            |row| row.get(0),
        )?;

        let partner = self.get(id, actor)?;
        tracing::info!(
            external_partner_id = id,
            tenant_id = actor.tenant_id,
            base_url = %partner.base_url,
            "external partner registered"
        );
        self.audit(
            AuditAction::ExternalPartnerCreated,
            actor,
            json!({
                "external_partner_id": id,
                "name": partner.name,
                "base_url": partner.base_url,
                "auth_method": partner.auth_method,
            }),
        );
        Ok(partner)
    }

    pub fn update(
        &self,
        id: i64,
        actor: &ActorContext,
        update: &ExternalPartnerUpdate,
    ) -> Result<ExternalPartner, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        let fields = PartnerFields {
            name: update.name.clone().unwrap_or_else(|| current.name.clone()),
            description: update
                .description
                .clone()
                .or_else(|| current.description.clone()),
            base_url: update
                .base_url
                .clone()
                .unwrap_or_else(|| current.base_url.clone()),
            api_path: update
                .api_path
                .clone()
                .unwrap_or_else(|| current.api_path.clone()),
            auth_method: update.auth_method.unwrap_or(current.auth_method),
            api_key: update.api_key.clone().or_else(|| current.api_key.clone()),
            signing_secret: update
                .signing_secret
                .clone()
                .or_else(|| current.signing_secret.clone()),
            platform_id: update
                .platform_id
                .clone()
                .or_else(|| current.platform_id.clone()),
            capabilities: update.capabilities.unwrap_or(current.capabilities),
        }
        .validate()?;

        let caps = fields.capabilities;
        let changed = self.conn.execute(
            "UPDATE federation_external_partners
             SET name = ?1, description = ?2, base_url = ?3, api_path = ?4, auth_method = ?5,
                 api_key = ?6, signing_secret = ?7, platform_id = ?8,
                 allow_member_search = ?9, allow_listing_search = ?10, allow_messaging = ?11,
                 allow_transactions = ?12, allow_events = ?13, allow_groups = ?14,
                 updated_at = datetime('now')
             WHERE id = ?15 AND tenant_id = ?16 AND status <> 'deleted'",
            params![
                fields.name,
                fields.description,
                fields.base_url,
                fields.api_path,
                fields.auth_method.as_str(),
                fields.api_key,
                fields.signing_secret,
                fields.platform_id,
                caps.member_search,
                caps.listing_search,
                caps.messaging,
                caps.transactions,
                caps.events,
                caps.groups,
                id,
                actor.tenant_id,
            ],
        )?;
        if changed == 0 {
            return Err(FederationError::NotFound("external partner"));
        }

        let partner = self.get(id, actor)?;
        self.audit(
            AuditAction::ExternalPartnerUpdated,
            actor,
            json!({
                "external_partner_id": id,
                "fields": changed_fields(update),
            }),
        );
        Ok(partner)
    }

    pub fn suspend(&self, id: i64, actor: &ActorContext) -> Result<ExternalPartner, FederationError> {
        self.toggle(id, actor, ExternalPartnerStatus::Suspended)
    }

    pub fn activate(&self, id: i64, actor: &ActorContext) -> Result<ExternalPartner, FederationError> {
        self.toggle(id, actor, ExternalPartnerStatus::Active)
    }

    /// Soft delete: the row stays for the audit trail, its outbound
    /// credentials are cleared and it disappears from every read.
    pub fn delete(&self, id: i64, actor: &ActorContext) -> Result<(), FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        let changed = self.conn.execute(
            "UPDATE federation_external_partners
             SET status = 'deleted', api_key = NULL, signing_secret = NULL,
                 deleted_at = datetime('now'), deleted_by = ?1, updated_at = datetime('now')
             WHERE id = ?2 AND tenant_id = ?3 AND status <> 'deleted'",
            params![actor.user_id, id, actor.tenant_id],
        )?;
        if changed == 0 {
            return Err(FederationError::NotFound("external partner"));
        }

        tracing::warn!(external_partner_id = id, tenant_id = actor.tenant_id, "external partner deleted");
        self.audit(
            AuditAction::ExternalPartnerDeleted,
            actor,
            json!({
                "external_partner_id": id,
                "name": current.name,
                "base_url": current.base_url,
            }),
        );
        Ok(())
    }

    /// Authorizes a connectivity test and returns the partner to contact.
    pub fn connection_target(
        &self,
        id: i64,
        actor: &ActorContext,
    ) -> Result<ExternalPartner, FederationError> {
        authorize_mutation(actor, self.gate)?;
        self.get(id, actor)
    }

    /// Stores the diagnostic columns and audits the test. Status is untouched.
    pub fn record_test_result(
        &self,
        partner: &ExternalPartner,
        actor: &ActorContext,
        report: &ConnectionTestReport,
    ) -> Result<(), FederationError> {
        self.conn.execute(
            "UPDATE federation_external_partners
             SET last_tested_at = datetime('now'), last_test_success = ?1
             WHERE id = ?2 AND tenant_id = ?3 AND status <> 'deleted'",
            params![report.success, partner.id, actor.tenant_id],
        )?;
        self.audit(
            AuditAction::ExternalPartnerConnectionTested,
            actor,
            json!({
                "external_partner_id": partner.id,
                "url": report.url,
                "success": report.success,
                "http_status": report.http_status,
                "elapsed_ms": report.elapsed_ms,
                "error": report.error,
            }),
        );
        Ok(())
    }

    fn toggle(
        &self,
        id: i64,
        actor: &ActorContext,
        to: ExternalPartnerStatus,
    ) -> Result<ExternalPartner, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        if current.status == to {
            return Err(FederationError::Conflict(format!(
                "external partner is already {to}"
            )));
        }
        let changed = self.conn.execute(
            "UPDATE federation_external_partners
             SET status = ?1, updated_at = datetime('now')
             WHERE id = ?2 AND tenant_id = ?3 AND status = ?4",
            params![to.as_str(), id, actor.tenant_id, current.status.as_str()],
        )?;
        if changed == 0 {
            return Err(FederationError::Conflict(
                "external partner was modified concurrently".to_string(),
            ));
        }

        let action = match to {
            ExternalPartnerStatus::Suspended => AuditAction::ExternalPartnerSuspended,
            _ => AuditAction::ExternalPartnerActivated,
        };
        self.audit(
            action,
            actor,
            json!({ "external_partner_id": id, "name": current.name }),
        );
        self.get(id, actor)
    }

    fn audit(&self, action: AuditAction, actor: &ActorContext, metadata: Value) {
        record_or_report(
            self.conn,
            &NewAuditEntry::new(action, actor.tenant_id)
                .actor(actor)
                .metadata(metadata),
        );
    }
}

fn changed_fields(update: &ExternalPartnerUpdate) -> Vec<&'static str> {
    [
        ("name", update.name.is_some()),
        ("description", update.description.is_some()),
        ("base_url", update.base_url.is_some()),
        ("api_path", update.api_path.is_some()),
        ("auth_method", update.auth_method.is_some()),
        ("api_key", update.api_key.is_some()),
        ("signing_secret", update.signing_secret.is_some()),
        ("platform_id", update.platform_id.is_some()),
        ("capabilities", update.capabilities.is_some()),
    ]
    .into_iter()
    .filter_map(|(name, set)| set.then_some(name))
    .collect()
}

// ── Connectivity ─────────────────────────────────────────────────────

/// Issues one GET against the partner's discovery endpoint.
///
/// Success requires a 2xx JSON body naming the node (`name` or `api`) and
/// its protocol version (`version` or `protocol_version`) before `timeout`.
/// Every failure comes back as a report with the raw diagnostic.
pub async fn check_connection(
    client: &Client,
    partner: &ExternalPartner,
    timeout: Duration,
) -> ConnectionTestReport {
    let url = partner.discovery_url();
    let started = Instant::now();
    let mut report = ConnectionTestReport {
        success: false,
        url: url.clone(),
        http_status: None,
        partner_name: None,
        protocol_version: None,
        elapsed_ms: 0,
        error: None,
    };

    let mut request = client
        .get(&url)
        .timeout(timeout)
        .header(ACCEPT, "application/json");
    match (partner.auth_method, &partner.api_key, &partner.signing_secret, &partner.platform_id) {
        (AuthMethod::ApiKey, Some(key), _, _) => request = request.bearer_auth(key),
        (AuthMethod::Hmac, _, Some(secret), Some(platform_id)) => {
            let timestamp = Utc::now().timestamp().to_string();
            let path = Url::parse(&url)
                .map(|u| u.path().to_string())
                .unwrap_or_else(|_| partner.api_path.clone());
            match sign_request(secret, "GET", &path, &timestamp, b"") {
                Ok(signature) => {
                    request = request
                        .header(PLATFORM_ID_HEADER, platform_id.as_str())
                        .header(TIMESTAMP_HEADER, timestamp)
                        .header(SIGNATURE_HEADER, signature);
                }
                Err(e) => {
                    report.error = Some(format!("could not sign request: {e}"));
                    return report;
                }
            }
        }
        _ => {}
    }

    let outcome = request.send().await;
    let elapsed = |started: Instant| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let response = match outcome {
        Ok(response) => response,
        Err(e) => {
            report.elapsed_ms = elapsed(started);
            report.error = Some(if e.is_timeout() {
                format!("connection timed out after {}s", timeout.as_secs())
            } else if e.is_connect() {
                format!("connection failed: {e}")
            } else {
                format!("request failed: {e}")
            });
            return report;
        }
    };

    let status = response.status();
    report.http_status = Some(status.as_u16());
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        report.elapsed_ms = elapsed(started);
        report.error = Some(format!("authentication rejected (HTTP {})", status.as_u16()));
        return report;
    }
    if !status.is_success() {
        report.elapsed_ms = elapsed(started);
        report.error = Some(format!("unexpected HTTP status {}", status.as_u16()));
        return report;
    }

    let body = response.json::<Value>().await;
    report.elapsed_ms = elapsed(started);
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            report.error = Some(format!("malformed response: {e}"));
            return report;
        }
    };

    let name = ["name", "api"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .map(str::to_string);
    let version = ["version", "protocol_version"]
        .iter()
        .find_map(|key| body.get(key))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    match (name, version) {
        (Some(name), Some(version)) => {
            report.success = true;
            report.partner_name = Some(name);
            report.protocol_version = Some(version);
        }
        _ => {
            report.error = Some("response is missing a name or protocol version".to_string());
        }
    }
    report
}

/// Runs a full connectivity test against the installation's own gate
/// tables. No pooled connection is held while the request is in flight.
pub async fn test_connection(
    pool: &DbPool,
    client: &Client,
    id: i64,
    actor: &ActorContext,
    timeout: Duration,
) -> Result<ConnectionTestReport, FederationError> {
    let partner = {
        let pool = pool.clone();
        let actor = actor.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let gate = SqliteFeatureGate::new(&conn);
            ExternalPartnerRegistry::new(&conn, &gate).connection_target(id, &actor)
        })
        .await
        .map_err(|e| FederationError::Internal(format!("connection test task failed: {e}")))??
    };

    let report = check_connection(client, &partner, timeout).await;
    if let Some(error) = &report.error {
        tracing::warn!(external_partner_id = id, url = %report.url, error = %error, "connection test failed");
    }

    let pool = pool.clone();
    let actor = actor.clone();
    let recorded = report.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        let gate = SqliteFeatureGate::new(&conn);
        ExternalPartnerRegistry::new(&conn, &gate).record_test_result(&partner, &actor, &recorded)
    })
    .await
    .map_err(|e| FederationError::Internal(format!("connection test task failed: {e}")))??;

    Ok(report)
}
