//! Validation of inbound federation API credentials.
//!
//! Two schemes are accepted:
//!
//! - **Bearer**: the raw key in `Authorization: Bearer` or `X-API-Key`.
//!   Candidates are narrowed by display prefix and the hash is compared in
//!   constant time. Keys with signing enabled refuse this scheme.
//! - **HMAC**: `X-Federation-Platform-Id`, `X-Federation-Timestamp` and
//!   `X-Federation-Signature`, where the signature is
//!   `hex(HMAC-SHA256(secret, METHOD\nPATH\nTIMESTAMP\nBODY))` and the
//!   timestamp must fall inside the replay window.
//!
//! A successful check bumps the key's usage counters and reports whether the
//! hourly rate limit is exceeded; enforcing it is the caller's decision.

use accord_types::TenantId;
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::access::conversion_error;
use crate::credentials::{hash_key, key_prefix, KEY_MARKER, KEY_PREFIX_LEN};
use crate::types::{ApiKeyStatus, AuthMethod, Scope, DB_TIMESTAMP_FORMAT};

type HmacSha256 = Hmac<Sha256>;

pub const PLATFORM_ID_HEADER: &str = "x-federation-platform-id";
pub const TIMESTAMP_HEADER: &str = "x-federation-timestamp";
pub const SIGNATURE_HEADER: &str = "x-federation-signature";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Default tolerance between the signer's clock and ours.
pub const DEFAULT_SIGNATURE_WINDOW_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing federation credentials")]
    MissingCredentials,

    #[error("invalid api key")]
    InvalidKey,

    #[error("api key is not active")]
    KeyInactive,

    #[error("api key has expired")]
    Expired,

    #[error("this api key requires hmac request signing")]
    HmacRequired,

    #[error("invalid request timestamp")]
    InvalidTimestamp,

    #[error("request timestamp is outside the allowed window")]
    TimestampOutOfWindow,

    #[error("invalid request signature")]
    InvalidSignature,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl AuthError {
    /// Stable machine-readable code for responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::InvalidKey => "invalid_key",
            Self::KeyInactive => "key_inactive",
            Self::Expired => "key_expired",
            Self::HmacRequired => "hmac_required",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::TimestampOutOfWindow => "timestamp_out_of_window",
            Self::InvalidSignature => "invalid_signature",
            Self::Database(_) => "internal_error",
        }
    }
}

/// The caller identified by a valid credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedKey {
    pub key_id: i64,
    pub tenant_id: TenantId,
    pub name: String,
    pub permissions: Vec<Scope>,
    pub auth_method: AuthMethod,
    pub platform_id: Option<String>,
    /// Requests counted in the current hour, this one included.
    pub hourly_requests: i64,
    pub rate_limit: u32,
}

impl AuthenticatedKey {
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.permissions
            .iter()
            .any(|held| *held == Scope::All || *held == scope)
    }

    pub fn rate_limited(&self) -> bool {
        self.hourly_requests > i64::from(self.rate_limit)
    }

    /// Requests left in the current hour.
    pub fn remaining(&self) -> u32 {
        let left = i64::from(self.rate_limit) - self.hourly_requests;
        u32::try_from(left.max(0)).unwrap_or(0)
    }
}

/// Headers of an HMAC-signed request.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub platform_id: &'a str,
    pub timestamp: &'a str,
    pub signature: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub body: &'a [u8],
}

struct KeyRecord {
    id: i64,
    tenant_id: TenantId,
    name: String,
    key_hash: String,
    signing_enabled: bool,
    signing_secret: Option<String>,
    platform_id: Option<String>,
    permissions: Vec<Scope>,
    status: ApiKeyStatus,
    expires_at: Option<String>,
}

const RECORD_COLUMNS: &str = "id, tenant_id, name, key_hash, signing_enabled, signing_secret,
     platform_id, permissions, status, expires_at";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<KeyRecord> {
    let permissions: String = row.get(7)?;
    let status: String = row.get(8)?;
    Ok(KeyRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        key_hash: row.get(3)?,
        signing_enabled: row.get(4)?,
        signing_secret: row.get(5)?,
        platform_id: row.get(6)?,
        permissions: serde_json::from_str(&permissions)
            .map_err(|e| conversion_error(7, Type::Text, e))?,
        status: status
            .parse()
            .map_err(|e| conversion_error(8, Type::Text, e))?,
        expires_at: row.get(9)?,
    })
}

impl KeyRecord {
    fn ensure_usable(&self, now: DateTime<Utc>) -> Result<(), AuthError> {
        if self.status != ApiKeyStatus::Active {
            return Err(AuthError::KeyInactive);
        }
        if let Some(expires_at) = &self.expires_at {
            match NaiveDateTime::parse_from_str(expires_at, DB_TIMESTAMP_FORMAT) {
                Ok(at) if at.and_utc() > now => {}
                Ok(_) => return Err(AuthError::Expired),
                Err(e) => {
                    tracing::warn!(api_key_id = self.id, error = %e, "unreadable key expiry");
                    return Err(AuthError::Expired);
                }
            }
        }
        Ok(())
    }
}

/// Checks a bearer key.
pub fn authenticate_bearer(
    conn: &Connection,
    raw_key: &str,
    now: DateTime<Utc>,
) -> Result<AuthenticatedKey, AuthError> {
    let raw_key = raw_key.trim();
    if raw_key.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    if !raw_key.starts_with(KEY_MARKER) || raw_key.len() < KEY_PREFIX_LEN {
        return Err(AuthError::InvalidKey);
    }

    let presented = hash_key(raw_key);
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM federation_api_keys WHERE key_prefix = ?1"
    ))?;
    let candidates = stmt
        .query_map([key_prefix(raw_key)], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut matched = None;
    for candidate in candidates {
        if bool::from(candidate.key_hash.as_bytes().ct_eq(presented.as_bytes())) {
            matched = Some(candidate);
        }
    }
    let record = matched.ok_or(AuthError::InvalidKey)?;

    record.ensure_usable(now)?;
    if record.signing_enabled {
        return Err(AuthError::HmacRequired);
    }
    finish(conn, record, AuthMethod::ApiKey, now)
}

/// Checks an HMAC-signed request.
pub fn authenticate_signed(
    conn: &Connection,
    request: &SignedRequest<'_>,
    now: DateTime<Utc>,
    window_secs: i64,
) -> Result<AuthenticatedKey, AuthError> {
    let platform_id = request.platform_id.trim();
    if platform_id.is_empty() || request.signature.trim().is_empty() {
        return Err(AuthError::MissingCredentials);
    }

    let record = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM federation_api_keys WHERE platform_id = ?1"),
            [platform_id],
            record_from_row,
        )
        .optional()?
        .ok_or(AuthError::InvalidKey)?;
    record.ensure_usable(now)?;
    let secret = match (&record.signing_secret, record.signing_enabled) {
        (Some(secret), true) => secret,
        _ => return Err(AuthError::InvalidSignature),
    };

    let signed_at = parse_timestamp(request.timestamp)?;
    if (now - signed_at).num_seconds().abs() > window_secs {
        return Err(AuthError::TimestampOutOfWindow);
    }

    let expected = sign_request(
        secret,
        request.method,
        request.path,
        request.timestamp.trim(),
        request.body,
    )
    .map_err(|_| AuthError::InvalidSignature)?;
    let presented = request.signature.trim().to_ascii_lowercase();
    if !bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
        tracing::debug!(api_key_id = record.id, "hmac signature mismatch");
        return Err(AuthError::InvalidSignature);
    }
    finish(conn, record, AuthMethod::Hmac, now)
}

/// Unix seconds or RFC 3339.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AuthError> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0).ok_or(AuthError::InvalidTimestamp);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| AuthError::InvalidTimestamp)
}

/// Lowercase hex HMAC-SHA256 over `METHOD\nPATH\nTIMESTAMP\nBODY`.
pub fn sign_request(
    secret: &str,
    method: &str,
    path: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(b"\n");
    mac.update(path.as_bytes());
    mac.update(b"\n");
    mac.update(timestamp.as_bytes());
    mac.update(b"\n");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn finish(
    conn: &Connection,
    record: KeyRecord,
    auth_method: AuthMethod,
    now: DateTime<Utc>,
) -> Result<AuthenticatedKey, AuthError> {
    let (hourly_requests, rate_limit) = record_usage(conn, record.id, now)?;
    Ok(AuthenticatedKey {
        key_id: record.id,
        tenant_id: record.tenant_id,
        name: record.name,
        permissions: record.permissions,
        auth_method,
        platform_id: record.platform_id,
        hourly_requests,
        rate_limit,
    })
}

/// Bumps lifetime and hourly counters, rolling the hourly window over when
/// the hour changes.
fn record_usage(conn: &Connection, key_id: i64, now: DateTime<Utc>) -> rusqlite::Result<(i64, u32)> {
    let hour = now.format("%Y-%m-%d %H").to_string();
    conn.query_row(
        "UPDATE federation_api_keys
         SET request_count = request_count + 1,
             last_used_at = ?2,
             hourly_request_count = CASE WHEN rate_limit_hour = ?3
                                         THEN hourly_request_count + 1 ELSE 1 END,
             rate_limit_hour = ?3
         WHERE id = ?1
         RETURNING hourly_request_count, rate_limit",
        params![key_id, now.format(DB_TIMESTAMP_FORMAT).to_string(), hour],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}

/// One row of `federation_api_logs`.
#[derive(Debug, Clone)]
pub struct ApiRequestLog<'a> {
    pub api_key_id: i64,
    pub endpoint: &'a str,
    pub method: &'a str,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub auth_method: AuthMethod,
    pub signature_valid: bool,
}

pub fn log_api_request(conn: &Connection, entry: &ApiRequestLog<'_>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO federation_api_logs
             (api_key_id, endpoint, method, ip_address, user_agent, auth_method, signature_valid)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.api_key_id,
            entry.endpoint,
            entry.method,
            entry.ip_address,
            entry.user_agent,
            entry.auth_method.as_str(),
            entry.signature_valid,
        ],
    )?;
    Ok(())
}
