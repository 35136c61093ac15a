//! Handling of audit writes that fail after the primary action committed.
//!
//! A dropped audit entry is an operational incident. It is never returned to
//! the end user and never undoes the action that triggered it; instead the
//! full entry is emitted on the `accord::audit_incident` tracing target and
//! a process-wide counter is bumped so health checks can surface it.

use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::Connection;

use crate::entry::{AuditEntry, NewAuditEntry};
use crate::store::record;

static AUDIT_INCIDENTS: AtomicU64 = AtomicU64::new(0);

/// Appends `entry`, reporting any failure to operators instead of the caller.
pub fn record_or_report(conn: &Connection, entry: &NewAuditEntry) -> Option<AuditEntry> {
    match record(conn, entry) {
        Ok(stored) => Some(stored),
        Err(e) => {
            report_incident(entry, &e);
            None
        }
    }
}

/// Logs a failed audit write with everything needed to replay it by hand.
pub fn report_incident(entry: &NewAuditEntry, error: &dyn std::error::Error) {
    let total = AUDIT_INCIDENTS.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::error!(
        target: "accord::audit_incident",
        action_type = %entry.action_type,
        source_tenant_id = entry.source_tenant_id,
        target_tenant_id = ?entry.target_tenant_id,
        actor_user_id = ?entry.actor_user_id,
        metadata = %entry.metadata,
        incidents_total = total,
        error = %error,
        "audit write failed after the action committed"
    );
}

/// Number of audit writes dropped since process start.
pub fn audit_incident_count() -> u64 {
    AUDIT_INCIDENTS.load(Ordering::Relaxed)
}
