//! Records and status enums for partnerships, API keys and external partners.

use std::fmt;
use std::str::FromStr;

use accord_types::{FederationLevel, PartnershipPermissions, PermissionsUpdate, TenantId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp format used by every federation table (`datetime('now')`).
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Error for a stored or supplied enum string that is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

fn parse_err(kind: &'static str, value: &str) -> ParseEnumError {
    ParseEnumError {
        kind,
        value: value.to_string(),
    }
}

// ── Partnerships ─────────────────────────────────────────────────────

/// Lifecycle status of a partnership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnershipStatus {
    Pending,
    Active,
    Suspended,
    /// Terminal. Covers rejected, withdrawn and terminated requests.
    Terminated,
}

impl PartnershipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }
}

impl fmt::Display for PartnershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartnershipStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "terminated" => Ok(Self::Terminated),
            _ => Err(parse_err("partnership status", s)),
        }
    }
}

/// Alternative terms offered by the receiving tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterProposal {
    pub proposed_at: String,
    pub proposed_by: Option<UserId>,
    pub level: FederationLevel,
    /// Flags to overlay on the level's defaults once accepted.
    pub permissions: PermissionsUpdate,
    pub message: Option<String>,
}

/// A bilateral trust relationship. `tenant_id` asked, `partner_tenant_id`
/// received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partnership {
    pub id: i64,
    pub tenant_id: TenantId,
    pub tenant_name: Option<String>,
    pub partner_tenant_id: TenantId,
    pub partner_tenant_name: Option<String>,
    pub status: PartnershipStatus,
    pub federation_level: FederationLevel,
    pub permissions: PartnershipPermissions,
    pub requested_by: UserId,
    pub request_message: Option<String>,
    pub counter_proposal: Option<CounterProposal>,
    pub approved_at: Option<String>,
    pub approved_by: Option<UserId>,
    pub terminated_at: Option<String>,
    pub terminated_by: Option<UserId>,
    pub termination_reason: Option<String>,
    /// Set while the partnership is suspended.
    pub suspended_at: Option<String>,
    pub suspended_by: Option<UserId>,
    pub suspension_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Partnership {
    pub fn is_party(&self, tenant_id: TenantId) -> bool {
        self.tenant_id == tenant_id || self.partner_tenant_id == tenant_id
    }

    /// The side that is not `tenant_id`.
    pub fn other_party(&self, tenant_id: TenantId) -> TenantId {
        if self.tenant_id == tenant_id {
            self.partner_tenant_id
        } else {
            self.tenant_id
        }
    }
}

/// Partnership counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnershipStats {
    pub total: i64,
    pub pending: i64,
    pub active: i64,
    pub suspended: i64,
    pub terminated: i64,
    /// Incoming requests awaiting this tenant's decision.
    pub awaiting_response: i64,
}

// ── Credentials ──────────────────────────────────────────────────────

/// How a credential or outbound connection authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Bearer API key.
    ApiKey,
    /// HMAC-SHA256 request signing.
    Hmac,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::Hmac => "hmac",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_key" => Ok(Self::ApiKey),
            "hmac" => Ok(Self::Hmac),
            _ => Err(parse_err("auth method", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Active,
    Suspended,
    /// Terminal.
    Revoked,
}

impl ApiKeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for ApiKeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiKeyStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "revoked" => Ok(Self::Revoked),
            _ => Err(parse_err("api key status", s)),
        }
    }
}

/// Federation API scopes a key may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "timebanks:read")]
    TimebanksRead,
    #[serde(rename = "members:read")]
    MembersRead,
    #[serde(rename = "listings:read")]
    ListingsRead,
    #[serde(rename = "messages:write")]
    MessagesWrite,
    #[serde(rename = "transactions:write")]
    TransactionsWrite,
    /// Wildcard; grants every scope.
    #[serde(rename = "*")]
    All,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TimebanksRead => "timebanks:read",
            Self::MembersRead => "members:read",
            Self::ListingsRead => "listings:read",
            Self::MessagesWrite => "messages:write",
            Self::TransactionsWrite => "transactions:write",
            Self::All => "*",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timebanks:read" => Ok(Self::TimebanksRead),
            "members:read" => Ok(Self::MembersRead),
            "listings:read" => Ok(Self::ListingsRead),
            "messages:write" => Ok(Self::MessagesWrite),
            "transactions:write" => Ok(Self::TransactionsWrite),
            "*" => Ok(Self::All),
            _ => Err(parse_err("scope", s)),
        }
    }
}

/// Relative lifetime of a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExpiresIn {
    #[serde(rename = "30d")]
    Days30,
    #[serde(rename = "90d")]
    Days90,
    #[serde(rename = "1y")]
    OneYear,
    #[default]
    #[serde(rename = "never")]
    Never,
}

impl ExpiresIn {
    /// Absolute expiry for a key issued at `now`.
    pub fn resolve(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = match self {
            Self::Days30 => 30,
            Self::Days90 => 90,
            Self::OneYear => 365,
            Self::Never => return None,
        };
        Some(now + Duration::days(days))
    }
}

/// Stored view of an API key. Carries neither the hash nor the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeySummary {
    pub id: i64,
    pub tenant_id: TenantId,
    pub name: String,
    /// First characters of the raw key, for recognising it in lists.
    pub key_prefix: String,
    pub signing_enabled: bool,
    pub platform_id: Option<String>,
    pub permissions: Vec<Scope>,
    pub rate_limit: u32,
    pub status: ApiKeyStatus,
    pub expires_at: Option<String>,
    pub created_by: UserId,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub request_count: i64,
    pub revoked_at: Option<String>,
}

/// Key material returned exactly once, by `issue` or `regenerate`.
#[derive(Clone, Serialize)]
pub struct IssuedCredential {
    pub key: ApiKeySummary,
    pub raw_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("key", &self.key)
            .field("raw_key", &"<redacted>")
            .field(
                "signing_secret",
                &self.signing_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

// ── External partners ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalPartnerStatus {
    Active,
    Suspended,
    /// Terminal; hidden from every read and mutation.
    Deleted,
}

impl ExternalPartnerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ExternalPartnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExternalPartnerStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deleted" => Ok(Self::Deleted),
            _ => Err(parse_err("external partner status", s)),
        }
    }
}

/// What this installation may do with an external node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalCapabilities {
    pub member_search: bool,
    pub listing_search: bool,
    pub messaging: bool,
    pub transactions: bool,
    pub events: bool,
    pub groups: bool,
}

/// A registered federation node hosted elsewhere. Outbound secrets are
/// never serialised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalPartner {
    pub id: i64,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub base_url: String,
    pub api_path: String,
    pub auth_method: AuthMethod,
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    #[serde(skip_serializing, default)]
    pub signing_secret: Option<String>,
    pub platform_id: Option<String>,
    pub capabilities: ExternalCapabilities,
    pub status: ExternalPartnerStatus,
    pub last_tested_at: Option<String>,
    pub last_test_success: Option<bool>,
    pub created_by: UserId,
    pub created_at: String,
    pub updated_at: String,
}

impl ExternalPartner {
    /// `base_url` joined with `api_path`.
    pub fn discovery_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.api_path)
    }
}

/// Outcome of a connectivity test. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTestReport {
    pub success: bool,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
