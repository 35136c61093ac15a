//! Action types, categories and levels for the federation audit trail.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Audit categories. Every action type maps to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Partnership,
    Credential,
    ExternalPartner,
    Messaging,
    Transaction,
    Profile,
    Listing,
    Other,
}

impl AuditCategory {
    /// Every category, in display order.
    pub const ALL: [AuditCategory; 8] = [
        Self::Partnership,
        Self::Credential,
        Self::ExternalPartner,
        Self::Messaging,
        Self::Transaction,
        Self::Profile,
        Self::Listing,
        Self::Other,
    ];

    /// Categories produced by member-facing federation features rather than
    /// administration.
    pub const FEATURES: [AuditCategory; 4] = [
        Self::Messaging,
        Self::Transaction,
        Self::Profile,
        Self::Listing,
    ];

    /// Returns the canonical string label stored in the log.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Partnership => "partnership",
            Self::Credential => "credential",
            Self::ExternalPartner => "external_partner",
            Self::Messaging => "messaging",
            Self::Transaction => "transaction",
            Self::Profile => "profile",
            Self::Listing => "listing",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditCategory {
    type Err = ParseAuditValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ParseAuditValueError::new("category", s))
    }
}

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    /// Retained twice as long as other levels by the retention purge.
    Critical,
}

impl AuditLevel {
    pub const ALL: [AuditLevel; 4] = [Self::Info, Self::Warning, Self::Error, Self::Critical];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditLevel {
    type Err = ParseAuditValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| ParseAuditValueError::new("level", s))
    }
}

/// Error returned when a stored or supplied category/level string is unknown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown audit {kind}: {value}")]
pub struct ParseAuditValueError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseAuditValueError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Known federation action types.
///
/// Entries are stored by their string form, so the log can also carry action
/// types recorded by other parts of the platform; those resolve to
/// [`AuditCategory::Other`] unless listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // ── Partnership ──────────────────────────────────────────────────
    PartnershipRequested,
    PartnershipCounterProposed,
    PartnershipCounterAccepted,
    PartnershipApproved,
    PartnershipRejected,
    PartnershipPermissionsUpdated,
    PartnershipSuspended,
    PartnershipReactivated,
    PartnershipTerminated,
    PartnershipWithdrawn,

    // ── Credential ───────────────────────────────────────────────────
    ApiKeyCreated,
    ApiKeySuspended,
    ApiKeyActivated,
    ApiKeyRevoked,
    ApiKeyRegenerated,

    // ── External partner ─────────────────────────────────────────────
    ExternalPartnerCreated,
    ExternalPartnerUpdated,
    ExternalPartnerSuspended,
    ExternalPartnerActivated,
    ExternalPartnerDeleted,
    ExternalPartnerConnectionTested,

    // ── Member-facing features ───────────────────────────────────────
    CrossTenantMessage,
    CrossTenantMessageBlocked,
    CrossTenantTransaction,
    CrossTenantTransactionFailed,
    CrossTenantProfileView,
    ProfileVisibilityChanged,
    ListingFederated,
    ListingUnfederated,

    // ── Housekeeping ─────────────────────────────────────────────────
    DataExported,
    AuditLogPurged,
}

impl AuditAction {
    pub const ALL: [AuditAction; 31] = [
        Self::PartnershipRequested,
        Self::PartnershipCounterProposed,
        Self::PartnershipCounterAccepted,
        Self::PartnershipApproved,
        Self::PartnershipRejected,
        Self::PartnershipPermissionsUpdated,
        Self::PartnershipSuspended,
        Self::PartnershipReactivated,
        Self::PartnershipTerminated,
        Self::PartnershipWithdrawn,
        Self::ApiKeyCreated,
        Self::ApiKeySuspended,
        Self::ApiKeyActivated,
        Self::ApiKeyRevoked,
        Self::ApiKeyRegenerated,
        Self::ExternalPartnerCreated,
        Self::ExternalPartnerUpdated,
        Self::ExternalPartnerSuspended,
        Self::ExternalPartnerActivated,
        Self::ExternalPartnerDeleted,
        Self::ExternalPartnerConnectionTested,
        Self::CrossTenantMessage,
        Self::CrossTenantMessageBlocked,
        Self::CrossTenantTransaction,
        Self::CrossTenantTransactionFailed,
        Self::CrossTenantProfileView,
        Self::ProfileVisibilityChanged,
        Self::ListingFederated,
        Self::ListingUnfederated,
        Self::DataExported,
        Self::AuditLogPurged,
    ];

    /// The string stored in `action_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PartnershipRequested => "partnership_requested",
            Self::PartnershipCounterProposed => "partnership_counter_proposed",
            Self::PartnershipCounterAccepted => "partnership_counter_accepted",
            Self::PartnershipApproved => "partnership_approved",
            Self::PartnershipRejected => "partnership_rejected",
            Self::PartnershipPermissionsUpdated => "partnership_permissions_updated",
            Self::PartnershipSuspended => "partnership_suspended",
            Self::PartnershipReactivated => "partnership_reactivated",
            Self::PartnershipTerminated => "partnership_terminated",
            Self::PartnershipWithdrawn => "partnership_withdrawn",
            Self::ApiKeyCreated => "api_key_created",
            Self::ApiKeySuspended => "api_key_suspended",
            Self::ApiKeyActivated => "api_key_activated",
            Self::ApiKeyRevoked => "api_key_revoked",
            Self::ApiKeyRegenerated => "api_key_regenerated",
            Self::ExternalPartnerCreated => "external_partner_created",
            Self::ExternalPartnerUpdated => "external_partner_updated",
            Self::ExternalPartnerSuspended => "external_partner_suspended",
            Self::ExternalPartnerActivated => "external_partner_activated",
            Self::ExternalPartnerDeleted => "external_partner_deleted",
            Self::ExternalPartnerConnectionTested => "external_partner_connection_tested",
            Self::CrossTenantMessage => "cross_tenant_message",
            Self::CrossTenantMessageBlocked => "cross_tenant_message_blocked",
            Self::CrossTenantTransaction => "cross_tenant_transaction",
            Self::CrossTenantTransactionFailed => "cross_tenant_transaction_failed",
            Self::CrossTenantProfileView => "cross_tenant_profile_view",
            Self::ProfileVisibilityChanged => "profile_visibility_changed",
            Self::ListingFederated => "listing_federated",
            Self::ListingUnfederated => "listing_unfederated",
            Self::DataExported => "data_exported",
            Self::AuditLogPurged => "audit_log_purged",
        }
    }

    pub fn category(self) -> AuditCategory {
        use AuditCategory as C;
        match self {
            Self::PartnershipRequested
            | Self::PartnershipCounterProposed
            | Self::PartnershipCounterAccepted
            | Self::PartnershipApproved
            | Self::PartnershipRejected
            | Self::PartnershipPermissionsUpdated
            | Self::PartnershipSuspended
            | Self::PartnershipReactivated
            | Self::PartnershipTerminated
            | Self::PartnershipWithdrawn => C::Partnership,
            Self::ApiKeyCreated
            | Self::ApiKeySuspended
            | Self::ApiKeyActivated
            | Self::ApiKeyRevoked
            | Self::ApiKeyRegenerated => C::Credential,
            Self::ExternalPartnerCreated
            | Self::ExternalPartnerUpdated
            | Self::ExternalPartnerSuspended
            | Self::ExternalPartnerActivated
            | Self::ExternalPartnerDeleted
            | Self::ExternalPartnerConnectionTested => C::ExternalPartner,
            Self::CrossTenantMessage | Self::CrossTenantMessageBlocked => C::Messaging,
            Self::CrossTenantTransaction | Self::CrossTenantTransactionFailed => C::Transaction,
            Self::CrossTenantProfileView | Self::ProfileVisibilityChanged => C::Profile,
            Self::ListingFederated | Self::ListingUnfederated => C::Listing,
            Self::DataExported | Self::AuditLogPurged => C::Other,
        }
    }

    /// Level used when nothing escalates the entry.
    pub fn default_level(self) -> AuditLevel {
        match self {
            Self::ApiKeyRevoked
            | Self::PartnershipSuspended
            | Self::PartnershipTerminated
            | Self::ExternalPartnerDeleted
            | Self::CrossTenantMessageBlocked
            | Self::CrossTenantTransactionFailed
            | Self::AuditLogPurged => AuditLevel::Warning,
            _ => AuditLevel::Info,
        }
    }

    /// Human-readable label used in exports and dashboards.
    pub fn label(self) -> &'static str {
        match self {
            Self::PartnershipRequested => "Partnership Requested",
            Self::PartnershipCounterProposed => "Counter-Proposal Sent",
            Self::PartnershipCounterAccepted => "Counter-Proposal Accepted",
            Self::PartnershipApproved => "Partnership Approved",
            Self::PartnershipRejected => "Partnership Rejected",
            Self::PartnershipPermissionsUpdated => "Partnership Permissions Updated",
            Self::PartnershipSuspended => "Partnership Suspended",
            Self::PartnershipReactivated => "Partnership Reactivated",
            Self::PartnershipTerminated => "Partnership Terminated",
            Self::PartnershipWithdrawn => "Partnership Request Withdrawn",
            Self::ApiKeyCreated => "API Key Created",
            Self::ApiKeySuspended => "API Key Suspended",
            Self::ApiKeyActivated => "API Key Activated",
            Self::ApiKeyRevoked => "API Key Revoked",
            Self::ApiKeyRegenerated => "API Key Regenerated",
            Self::ExternalPartnerCreated => "External Partner Added",
            Self::ExternalPartnerUpdated => "External Partner Updated",
            Self::ExternalPartnerSuspended => "External Partner Suspended",
            Self::ExternalPartnerActivated => "External Partner Activated",
            Self::ExternalPartnerDeleted => "External Partner Deleted",
            Self::ExternalPartnerConnectionTested => "External Partner Connection Tested",
            Self::CrossTenantMessage => "Cross-Tenant Message",
            Self::CrossTenantMessageBlocked => "Cross-Tenant Message Blocked",
            Self::CrossTenantTransaction => "Cross-Tenant Transaction",
            Self::CrossTenantTransactionFailed => "Cross-Tenant Transaction Failed",
            Self::CrossTenantProfileView => "Cross-Tenant Profile View",
            Self::ProfileVisibilityChanged => "Profile Visibility Changed",
            Self::ListingFederated => "Listing Federated",
            Self::ListingUnfederated => "Listing Unfederated",
            Self::DataExported => "Data Exported",
            Self::AuditLogPurged => "Audit Log Purged",
        }
    }

    /// Looks up a stored action type string.
    pub fn parse(action_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == action_type)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category for any action type string; unknown types are `other`.
pub fn category_for_action(action_type: &str) -> AuditCategory {
    AuditAction::parse(action_type).map_or(AuditCategory::Other, AuditAction::category)
}

/// Label for any action type string. Unknown types are title-cased from
/// their snake_case form.
pub fn action_label(action_type: &str) -> String {
    if let Some(action) = AuditAction::parse(action_type) {
        return action.label().to_string();
    }
    action_type
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
