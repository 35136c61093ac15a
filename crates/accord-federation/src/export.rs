//! Partnership and credential-activity exports, encoded with the same
//! [`CsvExport`] the audit trail uses.

use std::io::Write;

use accord_audit::{yes_no, CsvExport};
use accord_types::TenantId;
use rusqlite::Connection;

use crate::error::FederationError;
use crate::partnership::list_for_tenant;
use crate::types::Partnership;

pub const PARTNERSHIP_EXPORT_HEADERS: [&str; 17] = [
    "Partnership ID",
    "Initiator Tenant",
    "Partner Tenant",
    "Status",
    "Federation Level",
    "Profiles Enabled",
    "Messaging Enabled",
    "Transactions Enabled",
    "Listings Enabled",
    "Events Enabled",
    "Groups Enabled",
    "Requested By",
    "Created Date",
    "Updated Date",
    "Approved Date",
    "Terminated Date",
    "Termination Reason",
];

pub const API_ACTIVITY_EXPORT_HEADERS: [&str; 10] = [
    "Log ID",
    "API Key",
    "Key Prefix",
    "Endpoint",
    "Method",
    "Auth Method",
    "Signature Valid",
    "IP Address",
    "User Agent",
    "Timestamp",
];

fn tenant_label(name: Option<&str>, id: TenantId) -> String {
    name.map_or_else(|| format!("Tenant {id}"), str::to_string)
}

fn partnership_row(p: &Partnership) -> [String; 17] {
    let perms = &p.permissions;
    [
        p.id.to_string(),
        tenant_label(p.tenant_name.as_deref(), p.tenant_id),
        tenant_label(p.partner_tenant_name.as_deref(), p.partner_tenant_id),
        p.status.to_string(),
        p.federation_level.to_string(),
        yes_no(perms.profiles).to_string(),
        yes_no(perms.messaging).to_string(),
        yes_no(perms.transactions).to_string(),
        yes_no(perms.listings).to_string(),
        yes_no(perms.events).to_string(),
        yes_no(perms.groups).to_string(),
        p.requested_by.to_string(),
        p.created_at.clone(),
        p.updated_at.clone(),
        p.approved_at.clone().unwrap_or_default(),
        p.terminated_at.clone().unwrap_or_default(),
        p.termination_reason.clone().unwrap_or_default(),
    ]
}

/// Writes every partnership `tenant_id` is a party to. Returns the row count.
pub fn write_partnerships_csv<W: Write>(
    conn: &Connection,
    tenant_id: TenantId,
    out: W,
) -> Result<usize, FederationError> {
    let mut export = CsvExport::new(out, &PARTNERSHIP_EXPORT_HEADERS)?;
    for partnership in list_for_tenant(conn, tenant_id, None)? {
        export.write_row(partnership_row(&partnership))?;
    }
    Ok(export.finish()?)
}

/// Writes the federation API request log for `tenant_id`'s keys, newest
/// first. Returns the row count.
pub fn write_api_activity_csv<W: Write>(
    conn: &Connection,
    tenant_id: TenantId,
    out: W,
) -> Result<usize, FederationError> {
    let mut export = CsvExport::new(out, &API_ACTIVITY_EXPORT_HEADERS)?;
    let mut stmt = conn.prepare(
        "SELECT l.id, k.name, k.key_prefix, l.endpoint, l.method, l.auth_method,
                l.signature_valid, l.ip_address, l.user_agent, l.created_at
         FROM federation_api_logs l
         JOIN federation_api_keys k ON k.id = l.api_key_id
         WHERE k.tenant_id = ?1
         ORDER BY l.created_at DESC, l.id DESC",
    )?;
    let mut rows = stmt.query([tenant_id])?;
    while let Some(row) = rows.next()? {
        let signature_valid: bool = row.get(6)?;
        export.write_row([
            row.get::<_, i64>(0)?.to_string(),
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            yes_no(signature_valid).to_string(),
            row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            row.get::<_, String>(9)?,
        ])?;
    }
    Ok(export.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{log_api_request, ApiRequestLog};
    use crate::credentials::{CredentialIssuer, NewApiKey};
    use crate::gate::StaticFeatureGate;
    use crate::notify::TracingNotifier;
    use crate::partnership::{NewPartnershipRequest, PartnershipRegistry};
    use crate::types::{AuthMethod, ExpiresIn};
    use accord_types::ActorContext;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        accord_db::run_migrations(&conn).expect("migrations should succeed");
        conn.execute_batch(
            "INSERT INTO tenants (id, name, slug) VALUES (1, 'North', 'north'), (2, 'South', 'south');",
        )
        .expect("seed");
        conn
    }

    fn lines(buf: Vec<u8>) -> Vec<String> {
        String::from_utf8(buf)
            .expect("utf8")
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn partnership_export_uses_labels_and_yes_no() {
        let conn = setup();
        let gate = StaticFeatureGate::open();
        PartnershipRegistry::new(&conn, &gate, &TracingNotifier)
            .request(
                &ActorContext::admin(1, 10),
                &NewPartnershipRequest {
                    target_tenant_id: 2,
                    federation_level: 1,
                    message: None,
                },
            )
            .expect("request");

        let mut buf = Vec::new();
        let rows = write_partnerships_csv(&conn, 2, &mut buf).expect("export");
        assert_eq!(rows, 1);
        let lines = lines(buf);
        assert!(lines[0].starts_with("Partnership ID,Initiator Tenant,Partner Tenant,Status"));
        assert!(lines[1].contains(",North,South,pending,1 (Discovery),Yes,No,No,No,No,No,10,"));
    }

    #[test]
    fn api_activity_export_is_tenant_scoped() {
        let conn = setup();
        let gate = StaticFeatureGate::open();
        let issued = CredentialIssuer::new(&conn, &gate)
            .issue(
                &ActorContext::admin(1, 10),
                &NewApiKey {
                    name: "sync".into(),
                    permissions: vec!["*".into()],
                    rate_limit: 10,
                    expires_in: ExpiresIn::Never,
                    platform_id: None,
                    auth_method: AuthMethod::ApiKey,
                },
            )
            .expect("issue");
        log_api_request(
            &conn,
            &ApiRequestLog {
                api_key_id: issued.key.id,
                endpoint: "/api/v1/federation/whoami",
                method: "GET",
                ip_address: Some("198.51.100.4"),
                user_agent: Some("partner-client/1.0"),
                auth_method: AuthMethod::ApiKey,
                signature_valid: false,
            },
        )
        .expect("log");

        let mut buf = Vec::new();
        assert_eq!(write_api_activity_csv(&conn, 1, &mut buf).expect("export"), 1);
        let lines = lines(buf);
        assert_eq!(lines[0], API_ACTIVITY_EXPORT_HEADERS.join(","));
        assert!(lines[1].contains(",sync,"));
        assert!(lines[1].contains(",api_key,No,198.51.100.4,partner-client/1.0,"));

        let mut other = Vec::new();
        assert_eq!(write_api_activity_csv(&conn, 2, &mut other).expect("export"), 0);
    }
}
