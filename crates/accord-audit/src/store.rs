//! Persistence operations for the federation audit trail.
//!
//! All writes go through [`record`], which derives the category and level,
//! snapshots the actor's identity and appends one row. Reads go through
//! [`query`] and the aggregate views in [`crate::aggregate`], which share the
//! same dynamic WHERE builder.

use std::str::FromStr;

use accord_types::{ActorContext, UserId};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::action::{AuditAction, AuditLevel};
use crate::entry::{AuditEntry, AuditFilter, NewAuditEntry};
use crate::error::AuditError;

/// How many earlier failed connectivity tests (in a row) escalate the next
/// failure from warning to error.
const FAILED_TEST_ESCALATION: usize = 2;

pub(crate) const ENTRY_COLUMNS: &str = "id, action_type, category, level, source_tenant_id, \
     target_tenant_id, actor_user_id, actor_name, actor_email, ip_address, user_agent, data, created_at";

/// Appends one entry to the trail.
///
/// The actor's name and email are read from `users` at write time. A failed
/// lookup leaves the snapshot empty and does not stop the write.
///
/// # Errors
///
/// Returns `AuditError::Database` if the insert fails or
/// `AuditError::Serialization` if the metadata cannot be encoded.
pub fn record(conn: &Connection, entry: &NewAuditEntry) -> Result<AuditEntry, AuditError> {
    let category = entry.category();
    let level = resolve_level(conn, entry)?;
    let (actor_name, actor_email) = match entry.actor_user_id {
        Some(user_id) => actor_snapshot(conn, user_id),
        None => (None, None),
    };
    let data = serde_json::to_string(&entry.metadata)?;

    let (id, created_at): (i64, String) = conn.query_row(
        "INSERT INTO federation_audit_log
            (action_type, category, level, source_tenant_id, target_tenant_id, actor_user_id,
             actor_name, actor_email, ip_address, user_agent, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         RETURNING id, created_at",
        params![
            entry.action_type,
            category.as_str(),
            level.as_str(),
            entry.source_tenant_id,
            entry.target_tenant_id,
            entry.actor_user_id,
            actor_name,
            actor_email,
            entry.ip_address,
            entry.user_agent,
            data,
        ],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    tracing::debug!(
        audit_id = id,
        action_type = %entry.action_type,
        category = %category,
        level = %level,
        "audit entry recorded"
    );

    Ok(AuditEntry {
        id,
        action_type: entry.action_type.clone(),
        category,
        level,
        source_tenant_id: Some(entry.source_tenant_id),
        target_tenant_id: entry.target_tenant_id,
        actor_user_id: entry.actor_user_id,
        actor_name,
        actor_email,
        ip_address: entry.ip_address.clone(),
        user_agent: entry.user_agent.clone(),
        metadata: entry.metadata.clone(),
        created_at,
    })
}

/// Picks the level for a new entry.
///
/// An explicit level always wins. Failed connectivity tests are warnings,
/// and become errors once the same partner has already failed
/// [`FAILED_TEST_ESCALATION`] times in a row.
fn resolve_level(conn: &Connection, entry: &NewAuditEntry) -> Result<AuditLevel, AuditError> {
    if let Some(level) = entry.level {
        return Ok(level);
    }
    let Some(action) = AuditAction::parse(&entry.action_type) else {
        return Ok(AuditLevel::Info);
    };
    if action != AuditAction::ExternalPartnerConnectionTested {
        return Ok(action.default_level());
    }
    if entry.metadata.get("success").and_then(Value::as_bool) != Some(false) {
        return Ok(AuditLevel::Info);
    }
    let Some(partner_id) = entry.metadata.get("external_partner_id").and_then(Value::as_i64) else {
        return Ok(AuditLevel::Warning);
    };
    let prior_failures = consecutive_failed_tests(conn, partner_id)?;
    if prior_failures >= FAILED_TEST_ESCALATION {
        Ok(AuditLevel::Error)
    } else {
        Ok(AuditLevel::Warning)
    }
}

/// Counts failed connectivity tests for a partner since its last success,
/// looking back no further than the escalation threshold.
fn consecutive_failed_tests(conn: &Connection, partner_id: i64) -> Result<usize, AuditError> {
    let mut stmt = conn.prepare(
        "SELECT json_extract(data, '$.success')
         FROM federation_audit_log
         WHERE action_type = ?1 AND json_extract(data, '$.external_partner_id') = ?2
         ORDER BY id DESC
         LIMIT ?3",
    )?;
    let outcomes = stmt
        .query_map(
            params![
                AuditAction::ExternalPartnerConnectionTested.as_str(),
                partner_id,
                FAILED_TEST_ESCALATION as i64
            ],
            |row| row.get::<_, Option<bool>>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(outcomes
        .into_iter()
        .take_while(|success| *success == Some(false))
        .count())
}

/// Reads the actor's current display name and email.
fn actor_snapshot(conn: &Connection, user_id: UserId) -> (Option<String>, Option<String>) {
    let lookup = conn
        .query_row(
            "SELECT first_name, last_name, email FROM users WHERE id = ?1",
            [user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional();

    match lookup {
        Ok(Some((first, last, email))) => {
            let name = format!("{first} {last}").trim().to_string();
            ((!name.is_empty()).then_some(name), Some(email))
        }
        Ok(None) => (None, None),
        Err(e) => {
            tracing::warn!(user_id, error = %e, "actor snapshot lookup failed");
            (None, None)
        }
    }
}

/// A WHERE clause and its bound parameters, numbered `?1..`.
pub(crate) struct WhereClause {
    pub sql: String,
    pub params: Vec<Box<dyn ToSql>>,
}

impl WhereClause {
    pub fn push(&mut self, value: Box<dyn ToSql>) -> usize {
        self.params.push(value);
        self.params.len()
    }

    pub fn param_refs(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| &**p).collect()
    }
}

/// Builds the parameterised WHERE clause for a filter. Nothing from the
/// filter is interpolated into the SQL text.
pub(crate) fn build_where(filter: &AuditFilter) -> WhereClause {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();
    let mut idx = 1usize;

    if let Some(tenant_id) = filter.tenant_id {
        clauses.push(format!(
            "(source_tenant_id = ?{idx} OR target_tenant_id = ?{idx})"
        ));
        params.push(Box::new(tenant_id));
        idx += 1;
    }

    if let Some(from) = filter.date_from {
        clauses.push(format!("created_at >= ?{idx}"));
        params.push(Box::new(from.format("%Y-%m-%d").to_string()));
        idx += 1;
    }

    if let Some(to) = filter.date_to {
        clauses.push(format!("created_at < date(?{idx}, '+1 day')"));
        params.push(Box::new(to.format("%Y-%m-%d").to_string()));
        idx += 1;
    }

    if let Some(category) = filter.category {
        clauses.push(format!("category = ?{idx}"));
        params.push(Box::new(category.as_str()));
        idx += 1;
    }

    if let Some(ref action_type) = filter.action_type {
        clauses.push(format!("action_type = ?{idx}"));
        params.push(Box::new(action_type.clone()));
        idx += 1;
    }

    if let Some(level) = filter.level {
        clauses.push(format!("level = ?{idx}"));
        params.push(Box::new(level.as_str()));
        idx += 1;
    }

    if let Some(actor) = filter.actor_user_id {
        clauses.push(format!("actor_user_id = ?{idx}"));
        params.push(Box::new(actor));
        idx += 1;
    }

    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push(format!(
            "(action_type LIKE ?{idx} ESCAPE '\\' OR actor_name LIKE ?{idx} ESCAPE '\\' \
             OR actor_email LIKE ?{idx} ESCAPE '\\' OR data LIKE ?{idx} ESCAPE '\\')"
        ));
        params.push(Box::new(format!("%{}%", escape_like(search))));
    }

    let sql = if clauses.is_empty() {
        "1 = 1".to_string()
    } else {
        clauses.join(" AND ")
    };
    WhereClause { sql, params }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Maps a row selected with [`ENTRY_COLUMNS`].
pub(crate) fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let data: String = row.get(11)?;
    let metadata = serde_json::from_str(&data)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?;
    Ok(AuditEntry {
        id: row.get(0)?,
        action_type: row.get(1)?,
        category: parse_column(row, 2)?,
        level: parse_column(row, 3)?,
        source_tenant_id: row.get(4)?,
        target_tenant_id: row.get(5)?,
        actor_user_id: row.get(6)?,
        actor_name: row.get(7)?,
        actor_email: row.get(8)?,
        ip_address: row.get(9)?,
        user_agent: row.get(10)?,
        metadata,
        created_at: row.get(12)?,
    })
}

/// Reads one page of entries, newest first.
///
/// Ties on `created_at` are broken by descending id so the order is total.
///
/// # Errors
///
/// Returns `AuditError::Database` on SQL failure.
pub fn query(conn: &Connection, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
    let mut clause = build_where(filter);
    let limit_idx = clause.push(Box::new(i64::from(filter.effective_limit())));
    let offset_idx = clause.push(Box::new(i64::from(filter.offset.unwrap_or(0))));
    let sql = format!(
        "SELECT {ENTRY_COLUMNS}
         FROM federation_audit_log
         WHERE {}
         ORDER BY created_at DESC, id DESC
         LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
        clause.sql
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(clause.param_refs().as_slice(), entry_from_row)?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

/// Position of the last entry read by [`query_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PageCursor {
    pub created_at: String,
    pub id: i64,
}

/// Highest entry id currently in the trail, or zero when empty.
pub(crate) fn max_entry_id(conn: &Connection) -> Result<i64, AuditError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(id), 0) FROM federation_audit_log",
        [],
        |row| row.get(0),
    )?)
}

/// Reads up to `limit` entries older than `after` (newest first), never
/// past `max_id`.
///
/// Entries appended or purged between calls do not shift later pages, so
/// walking the trail with the cursor of each page's last entry visits every
/// entry up to `max_id` exactly once. The filter's limit and offset are
/// ignored.
pub(crate) fn query_page(
    conn: &Connection,
    filter: &AuditFilter,
    max_id: i64,
    after: Option<&PageCursor>,
    limit: u32,
) -> Result<Vec<AuditEntry>, AuditError> {
    let mut clause = build_where(filter);
    let max_idx = clause.push(Box::new(max_id));
    clause.sql.push_str(&format!(" AND id <= ?{max_idx}"));
    if let Some(cursor) = after {
        let at_idx = clause.push(Box::new(cursor.created_at.clone()));
        let id_idx = clause.push(Box::new(cursor.id));
        clause
            .sql
            .push_str(&format!(" AND (created_at, id) < (?{at_idx}, ?{id_idx})"));
    }
    let limit_idx = clause.push(Box::new(i64::from(limit)));
    let sql = format!(
        "SELECT {ENTRY_COLUMNS}
         FROM federation_audit_log
         WHERE {}
         ORDER BY created_at DESC, id DESC
         LIMIT ?{limit_idx}",
        clause.sql
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(clause.param_refs().as_slice(), entry_from_row)?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

/// Number of entries matching `filter`, ignoring its limit and offset.
pub fn count(conn: &Connection, filter: &AuditFilter) -> Result<i64, AuditError> {
    let clause = build_where(filter);
    let sql = format!(
        "SELECT COUNT(*) FROM federation_audit_log WHERE {}",
        clause.sql
    );
    Ok(conn.query_row(&sql, clause.param_refs().as_slice(), |row| row.get(0))?)
}

/// Looks up one entry by id.
pub fn get(conn: &Connection, id: i64) -> Result<Option<AuditEntry>, AuditError> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM federation_audit_log WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], entry_from_row).optional()?)
}

/// Outcome of a retention purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub retention_days: u32,
    /// Non-critical entries older than the retention window.
    pub deleted: usize,
    /// Critical entries older than twice the retention window.
    pub deleted_critical: usize,
}

/// Deletes expired entries and appends an `audit_log_purged` entry.
///
/// Critical entries are kept for twice `retention_days`. The deletion runs
/// inside the purge window so the append-only triggers let it through.
///
/// # Errors
///
/// Returns `AuditError::InvalidFilter` for a zero retention, or
/// `AuditError::Database` if the purge transaction fails.
pub fn purge(
    conn: &Connection,
    retention_days: u32,
    actor: &ActorContext,
) -> Result<PurgeReport, AuditError> {
    if retention_days == 0 {
        return Err(AuditError::InvalidFilter(
            "retention must be at least one day".to_string(),
        ));
    }

    let standard_cutoff = format!("-{retention_days} days");
    let critical_cutoff = format!("-{} days", u64::from(retention_days) * 2);

    let tx = conn.unchecked_transaction()?;
    tx.execute("INSERT INTO federation_audit_purge_window (id) VALUES (1)", [])?;
    let deleted = tx.execute(
        "DELETE FROM federation_audit_log
         WHERE level != 'critical' AND created_at < datetime('now', ?1)",
        [&standard_cutoff],
    )?;
    let deleted_critical = tx.execute(
        "DELETE FROM federation_audit_log
         WHERE level = 'critical' AND created_at < datetime('now', ?1)",
        [&critical_cutoff],
    )?;
    tx.execute("DELETE FROM federation_audit_purge_window", [])?;
    tx.commit()?;

    let report = PurgeReport {
        retention_days,
        deleted,
        deleted_critical,
    };
    tracing::info!(
        retention_days,
        deleted,
        deleted_critical,
        "audit log purged"
    );

    crate::incident::record_or_report(
        conn,
        &NewAuditEntry::new(AuditAction::AuditLogPurged, actor.tenant_id)
            .actor(actor)
            .metadata(json!({
                "retention_days": retention_days,
                "deleted": deleted,
                "deleted_critical": deleted_critical,
            })),
    );

    Ok(report)
}
