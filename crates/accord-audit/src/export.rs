//! Tabular export of federation records.
//!
//! Every export (audit, partnerships, credential activity) goes through
//! [`CsvExport`]: one header row of human-readable labels, then one row per
//! record, with booleans rendered by [`yes_no`]. Column order is fixed by the
//! caller's header list and never depends on the data.

use std::io::Write;

use accord_types::ActorContext;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::action::AuditAction;
use crate::entry::{AuditEntry, AuditFilter, NewAuditEntry, MAX_QUERY_LIMIT};
use crate::error::AuditError;
use crate::incident::record_or_report;
use crate::store::{max_entry_id, query_page, PageCursor};

/// Renders a boolean for export.
pub fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

/// Incremental CSV writer with a fixed header.
pub struct CsvExport<W: Write> {
    writer: csv::Writer<W>,
    columns: usize,
    rows: usize,
}

impl<W: Write> CsvExport<W> {
    /// Starts an export by writing the header row.
    pub fn new(inner: W, headers: &[&str]) -> Result<Self, AuditError> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(headers)?;
        Ok(Self {
            writer,
            columns: headers.len(),
            rows: 0,
        })
    }

    /// Writes one data row. The row must have one field per header.
    pub fn write_row<I, T>(&mut self, fields: I) -> Result<(), AuditError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let record: csv::ByteRecord = fields.into_iter().collect();
        if record.len() != self.columns {
            return Err(AuditError::InvalidFilter(format!(
                "export row has {} fields, header has {}",
                record.len(),
                self.columns
            )));
        }
        self.writer.write_byte_record(&record)?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes the output and returns the number of data rows written.
    pub fn finish(mut self) -> Result<usize, AuditError> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}

/// What an export contained; recorded in the `data_exported` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Audit,
    Partnerships,
    ApiActivity,
}

impl ExportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audit => "audit",
            Self::Partnerships => "partnerships",
            Self::ApiActivity => "api_activity",
        }
    }

    /// Download file name for an export taken on `date` (`YYYY-MM-DD`).
    pub fn file_name(self, date: &str) -> String {
        format!("federation_{}_{date}.csv", self.as_str())
    }
}

/// Column labels of the audit export.
pub const AUDIT_EXPORT_HEADERS: [&str; 12] = [
    "Log ID",
    "Action",
    "Category",
    "Level",
    "Source Tenant",
    "Target Tenant",
    "Actor Name",
    "Actor Email",
    "IP Address",
    "User Agent",
    "Details",
    "Timestamp",
];

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Export fields for one entry, in [`AUDIT_EXPORT_HEADERS`] order.
pub fn audit_row(entry: &AuditEntry) -> [String; 12] {
    [
        entry.id.to_string(),
        entry.action_label(),
        entry.category.to_string(),
        entry.level.to_string(),
        optional(entry.source_tenant_id),
        optional(entry.target_tenant_id),
        entry.actor_name.clone().unwrap_or_default(),
        entry.actor_email.clone().unwrap_or_default(),
        entry.ip_address.clone().unwrap_or_default(),
        entry.user_agent.clone().unwrap_or_default(),
        entry.metadata.to_string(),
        entry.created_at.clone(),
    ]
}

/// Streams every entry matching `filter` (newest first) into `out`.
///
/// The export covers the trail as it stood when the call began: entries
/// appended while it runs are left out and none is written twice. The
/// filter's own limit and offset are ignored. Returns the number of rows
/// written.
pub fn write_audit_csv<W: Write>(
    conn: &Connection,
    filter: &AuditFilter,
    out: W,
) -> Result<usize, AuditError> {
    let mut export = CsvExport::new(out, &AUDIT_EXPORT_HEADERS)?;
    let max_id = max_entry_id(conn)?;
    let mut cursor: Option<PageCursor> = None;

    loop {
        let page = query_page(conn, filter, max_id, cursor.as_ref(), MAX_QUERY_LIMIT)?;
        for entry in &page {
            export.write_row(audit_row(entry))?;
        }
        match page.last() {
            Some(last) if page.len() == MAX_QUERY_LIMIT as usize => {
                cursor = Some(PageCursor {
                    created_at: last.created_at.clone(),
                    id: last.id,
                });
            }
            _ => break,
        }
    }

    export.finish()
}

/// Audits a completed export. Failures go to the incident log.
pub fn record_export(conn: &Connection, actor: &ActorContext, kind: ExportKind, count: usize) {
    record_or_report(
        conn,
        &NewAuditEntry::new(AuditAction::DataExported, actor.tenant_id)
            .actor(actor)
            .metadata(json!({ "type": kind.as_str(), "count": count })),
    );
}
