//! Federation audit trail for Accord.
//!
//! An append-only record of every cross-tenant action: partnership
//! transitions, credential lifecycle, external partner administration and the
//! member-facing federation features. Writers append through [`record`] (or
//! [`record_or_report`] once their own mutation has committed); dashboards
//! and compliance exports read through [`query`], the aggregate views and
//! [`write_audit_csv`].
//!
//! # Categories
//!
//! Each action type maps to one category through a fixed table:
//!
//! | Category | Example actions |
//! |----------|-----------------|
//! | `partnership` | `partnership_requested`, `partnership_counter_accepted` |
//! | `credential` | `api_key_created`, `api_key_revoked` |
//! | `external_partner` | `external_partner_created`, `external_partner_connection_tested` |
//! | `messaging` | `cross_tenant_message` |
//! | `transaction` | `cross_tenant_transaction` |
//! | `profile` | `cross_tenant_profile_view` |
//! | `listing` | `listing_federated` |
//! | `other` | `data_exported`, `audit_log_purged`, unknown types |
//!
//! # Usage
//!
//! ```rust,ignore
//! use accord_audit::{record_or_report, AuditAction, NewAuditEntry};
//!
//! record_or_report(
//!     &conn,
//!     &NewAuditEntry::new(AuditAction::PartnershipRequested, actor.tenant_id)
//!         .target(partner_tenant_id)
//!         .actor(&actor)
//!         .metadata(json!({ "partnership_id": id, "federation_level": 2 })),
//! );
//! ```

mod action;
mod aggregate;
mod entry;
mod error;
mod export;
mod incident;
mod store;

pub use action::{
    action_label, category_for_action, AuditAction, AuditCategory, AuditLevel,
    ParseAuditValueError,
};
pub use aggregate::{
    feature_usage, partner_activity, stats, timeline, ActionCount, AuditStats, FeatureUsage,
    PairCount, PartnerActivity, TimelinePoint,
};
pub use entry::{
    AuditEntry, AuditFilter, NewAuditEntry, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT,
    MAX_USER_AGENT_LEN,
};
pub use error::AuditError;
pub use export::{
    audit_row, record_export, write_audit_csv, yes_no, CsvExport, ExportKind,
    AUDIT_EXPORT_HEADERS,
};
pub use incident::{audit_incident_count, record_or_report, report_incident};
pub use store::{count, get, purge, query, record, PurgeReport};

#[cfg(test)]
mod tests;
