//! Credential issuer: API keys and HMAC signing secrets for programmatic
//! federation access.
//!
//! Raw key material is generated from the OS RNG, returned once inside an
//! [`IssuedCredential`] and never stored. Only the SHA-256 hash and a short
//! display prefix are persisted.

use accord_audit::{record_or_report, AuditAction, NewAuditEntry};
use accord_types::{ActorContext, TenantId};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::access::{authorize_mutation, clean_text, conversion_error};
use crate::error::{is_unique_violation, FederationError};
use crate::gate::FeatureGate;
use crate::types::{
    ApiKeyStatus, ApiKeySummary, AuthMethod, ExpiresIn, IssuedCredential, Scope,
    DB_TIMESTAMP_FORMAT,
};

/// Marker every raw key starts with.
pub const KEY_MARKER: &str = "fed_";

/// Length of the stored display prefix, marker included.
pub const KEY_PREFIX_LEN: usize = 12;

/// Random bytes behind each key and signing secret.
const SECRET_BYTES: usize = 32;

pub const DEFAULT_RATE_LIMIT: u32 = 1000;

fn default_rate_limit() -> u32 {
    DEFAULT_RATE_LIMIT
}

fn default_auth_method() -> AuthMethod {
    AuthMethod::ApiKey
}

/// Input for [`CredentialIssuer::issue`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewApiKey {
    pub name: String,
    /// Scope names; unknown names are rejected.
    pub permissions: Vec<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default)]
    pub expires_in: ExpiresIn,
    #[serde(default)]
    pub platform_id: Option<String>,
    #[serde(default = "default_auth_method")]
    pub auth_method: AuthMethod,
}

/// Hex-encoded bytes from the OS RNG.
fn random_hex() -> String {
    let mut buf = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Generates a new raw key.
pub fn generate_raw_key() -> String {
    format!("{KEY_MARKER}{}", random_hex())
}

/// SHA-256 of the raw key, lowercase hex.
pub fn hash_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// Display prefix stored alongside the hash.
pub fn key_prefix(raw_key: &str) -> &str {
    raw_key.get(..KEY_PREFIX_LEN).unwrap_or(raw_key)
}

fn parse_scopes(names: &[String]) -> Result<Vec<Scope>, FederationError> {
    let mut scopes = names
        .iter()
        .map(|name| {
            name.trim()
                .parse::<Scope>()
                .map_err(|e| FederationError::Validation(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if scopes.is_empty() {
        return Err(FederationError::Validation(
            "at least one permission scope is required".to_string(),
        ));
    }
    scopes.sort();
    scopes.dedup();
    Ok(scopes)
}

const SUMMARY_COLUMNS: &str = "id, tenant_id, name, key_prefix, signing_enabled, platform_id,
     permissions, rate_limit, status, expires_at, created_by, created_at,
     last_used_at, request_count, revoked_at";

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ApiKeySummary> {
    let permissions: String = row.get(6)?;
    let permissions: Vec<Scope> =
        serde_json::from_str(&permissions).map_err(|e| conversion_error(6, Type::Text, e))?;
    let status: String = row.get(8)?;
    let status = status
        .parse::<ApiKeyStatus>()
        .map_err(|e| conversion_error(8, Type::Text, e))?;
    Ok(ApiKeySummary {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        key_prefix: row.get(3)?,
        signing_enabled: row.get(4)?,
        platform_id: row.get(5)?,
        permissions,
        rate_limit: row.get(7)?,
        status,
        expires_at: row.get(9)?,
        created_by: row.get(10)?,
        created_at: row.get(11)?,
        last_used_at: row.get(12)?,
        request_count: row.get(13)?,
        revoked_at: row.get(14)?,
    })
}

/// Every key owned by `tenant_id`, newest first.
pub fn list_api_keys(
    conn: &Connection,
    tenant_id: TenantId,
) -> Result<Vec<ApiKeySummary>, FederationError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM federation_api_keys
         WHERE tenant_id = ?1 ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt.query_map([tenant_id], summary_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn get_owned(
    conn: &Connection,
    id: i64,
    tenant_id: TenantId,
) -> Result<Option<ApiKeySummary>, FederationError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {SUMMARY_COLUMNS} FROM federation_api_keys
                 WHERE id = ?1 AND tenant_id = ?2"
            ),
            params![id, tenant_id],
            summary_from_row,
        )
        .optional()?)
}

/// Issues and manages a tenant's federation API keys.
pub struct CredentialIssuer<'a> {
    conn: &'a Connection,
    gate: &'a dyn FeatureGate,
}

impl<'a> CredentialIssuer<'a> {
    pub fn new(conn: &'a Connection, gate: &'a dyn FeatureGate) -> Self {
        Self { conn, gate }
    }

    /// Loads a key owned by the actor's tenant.
    pub fn get(&self, id: i64, actor: &ActorContext) -> Result<ApiKeySummary, FederationError> {
        get_owned(self.conn, id, actor.tenant_id)?.ok_or(FederationError::NotFound("api key"))
    }

    pub fn issue(
        &self,
        actor: &ActorContext,
        input: &NewApiKey,
    ) -> Result<IssuedCredential, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let name = clean_text(Some(&input.name))
            .ok_or_else(|| FederationError::Validation("name is required".to_string()))?;
        if input.rate_limit == 0 {
            return Err(FederationError::Validation(
                "rate limit must be greater than zero".to_string(),
            ));
        }
        let scopes = parse_scopes(&input.permissions)?;
        let platform_id = clean_text(input.platform_id.as_deref());
        let signing = input.auth_method == AuthMethod::Hmac;
        if signing && platform_id.is_none() {
            return Err(FederationError::Validation(
                "hmac authentication requires a platform id".to_string(),
            ));
        }

        let raw_key = generate_raw_key();
        let signing_secret = signing.then(random_hex);
        let expires_at = input
            .expires_in
            .resolve(Utc::now())
            .map(|at| at.format(DB_TIMESTAMP_FORMAT).to_string());
        let permissions = serde_json::to_string(&scopes)?;

        let inserted = self.conn.query_row(
            "INSERT INTO federation_api_keys (
                 tenant_id, name, key_hash, key_prefix, signing_enabled, signing_secret,
                 platform_id, permissions, rate_limit, expires_at, created_by
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             RETURNING id",
            params![
                actor.tenant_id,
                name,
                hash_key(&raw_key),
                key_prefix(&raw_key),
                signing,
                signing_secret,
                platform_id,
                permissions,
                input.rate_limit,
                expires_at,
                actor.user_id,
            ],
            |row| row.get::<_, i64>(0),
        );
        let id = match inserted {
            Ok(id) => id,
            Err(e) if is_unique_violation(&e) => {
                return Err(FederationError::Conflict(
                    "platform id is already registered".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let key = self.get(id, actor)?;
        tracing::info!(
            api_key_id = id,
            tenant_id = actor.tenant_id,
            key_prefix = %key.key_prefix,
            signing_enabled = signing,
            "api key issued"
        );
        self.audit(
            AuditAction::ApiKeyCreated,
            actor,
            json!({
                "api_key_id": id,
                "name": key.name,
                "key_prefix": key.key_prefix,
                "permissions": key.permissions,
                "rate_limit": key.rate_limit,
                "signing_enabled": signing,
                "expires_at": key.expires_at,
            }),
        );
        Ok(IssuedCredential {
            key,
            raw_key,
            signing_secret,
        })
    }

    /// Temporarily disables an active key.
    pub fn suspend(&self, id: i64, actor: &ActorContext) -> Result<ApiKeySummary, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        match current.status {
            ApiKeyStatus::Active => {}
            ApiKeyStatus::Suspended => return Err(conflict("api key is already suspended")),
            ApiKeyStatus::Revoked => return Err(conflict("api key has been revoked")),
        }
        let key = self.set_status(&current, ApiKeyStatus::Suspended, actor)?;
        self.audit(
            AuditAction::ApiKeySuspended,
            actor,
            json!({ "api_key_id": id, "key_prefix": key.key_prefix }),
        );
        Ok(key)
    }

    /// Re-enables a suspended key.
    pub fn activate(&self, id: i64, actor: &ActorContext) -> Result<ApiKeySummary, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        match current.status {
            ApiKeyStatus::Suspended => {}
            ApiKeyStatus::Active => return Err(conflict("api key is already active")),
            ApiKeyStatus::Revoked => return Err(conflict("api key has been revoked")),
        }
        let key = self.set_status(&current, ApiKeyStatus::Active, actor)?;
        self.audit(
            AuditAction::ApiKeyActivated,
            actor,
            json!({ "api_key_id": id, "key_prefix": key.key_prefix }),
        );
        Ok(key)
    }

    /// Permanently disables a key.
    pub fn revoke(&self, id: i64, actor: &ActorContext) -> Result<ApiKeySummary, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        if current.status == ApiKeyStatus::Revoked {
            return Err(conflict("api key has already been revoked"));
        }
        let key = self.set_status(&current, ApiKeyStatus::Revoked, actor)?;
        tracing::warn!(api_key_id = id, tenant_id = actor.tenant_id, "api key revoked");
        self.audit(
            AuditAction::ApiKeyRevoked,
            actor,
            json!({
                "api_key_id": id,
                "key_prefix": key.key_prefix,
                "previous_status": current.status,
            }),
        );
        Ok(key)
    }

    /// Replaces the key material, resetting usage counters. Permissions,
    /// rate limit, expiry and status carry over.
    pub fn regenerate(
        &self,
        id: i64,
        actor: &ActorContext,
    ) -> Result<IssuedCredential, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        if current.status == ApiKeyStatus::Revoked {
            return Err(conflict("a revoked api key cannot be regenerated"));
        }

        let raw_key = generate_raw_key();
        let signing_secret = current.signing_enabled.then(random_hex);
        let changed = self.conn.execute(
            "UPDATE federation_api_keys
             SET key_hash = ?1, key_prefix = ?2,
                 signing_secret = CASE WHEN signing_enabled = 1 THEN ?3 ELSE NULL END,
                 request_count = 0, hourly_request_count = 0, rate_limit_hour = NULL,
                 updated_at = datetime('now')
             WHERE id = ?4 AND tenant_id = ?5 AND status = ?6",
            params![
                hash_key(&raw_key),
                key_prefix(&raw_key),
                signing_secret,
                id,
                actor.tenant_id,
                current.status.as_str(),
            ],
        )?;
        ensure_changed(changed)?;

        let key = self.get(id, actor)?;
        tracing::info!(api_key_id = id, key_prefix = %key.key_prefix, "api key regenerated");
        self.audit(
            AuditAction::ApiKeyRegenerated,
            actor,
            json!({
                "api_key_id": id,
                "old_prefix": current.key_prefix,
                "new_prefix": key.key_prefix,
            }),
        );
        Ok(IssuedCredential {
            key,
            raw_key,
            signing_secret,
        })
    }

    fn set_status(
        &self,
        current: &ApiKeySummary,
        to: ApiKeyStatus,
        actor: &ActorContext,
    ) -> Result<ApiKeySummary, FederationError> {
        let changed = self.conn.execute(
            "UPDATE federation_api_keys
             SET status = ?1,
                 revoked_at = CASE WHEN ?1 = 'revoked' THEN datetime('now') ELSE revoked_at END,
                 revoked_by = CASE WHEN ?1 = 'revoked' THEN ?2 ELSE revoked_by END,
                 updated_at = datetime('now')
             WHERE id = ?3 AND tenant_id = ?4 AND status = ?5",
            params![
                to.as_str(),
                actor.user_id,
                current.id,
                actor.tenant_id,
                current.status.as_str(),
            ],
        )?;
        ensure_changed(changed)?;
        self.get(current.id, actor)
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

fn conflict(message: &str) -> FederationError {
    FederationError::Conflict(message.to_string())
}

fn ensure_changed(changed: usize) -> Result<(), FederationError> {
    if changed == 0 {
        Err(conflict("api key was modified concurrently"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::StaticFeatureGate;
    use std::collections::HashSet;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        accord_db::run_migrations(&conn).expect("migrations should succeed");
        conn.execute_batch(
            "INSERT INTO tenants (id, name, slug) VALUES (1, 'North', 'north'), (2, 'South', 'south');",
        )
        .expect("seed");
        conn
    }

    fn new_key(name: &str) -> NewApiKey {
        NewApiKey {
            name: name.to_string(),
            permissions: vec!["members:read".into(), "listings:read".into()],
            rate_limit: 500,
            expires_in: ExpiresIn::Days90,
            platform_id: None,
            auth_method: AuthMethod::ApiKey,
        }
    }

    #[test]
    fn generated_keys_are_unique_and_well_formed() {
        let keys: HashSet<String> = (0..10_000).map(|_| generate_raw_key()).collect();
        assert_eq!(keys.len(), 10_000);
        let sample = generate_raw_key();
        assert!(sample.starts_with(KEY_MARKER));
        assert_eq!(sample.len(), KEY_MARKER.len() + SECRET_BYTES * 2);
        assert_eq!(key_prefix(&sample).len(), KEY_PREFIX_LEN);
        assert_eq!(hash_key(&sample).len(), 64);
    }

    #[test]
    fn issue_stores_hash_only() {
        let conn = setup();
        let gate = StaticFeatureGate::open();
        let issuer = CredentialIssuer::new(&conn, &gate);
        let issued = issuer
            .issue(&ActorContext::admin(1, 10), &new_key("sync"))
            .expect("issue");

        assert!(issued.signing_secret.is_none());
        assert_eq!(issued.key.rate_limit, 500);
        assert_eq!(
            issued.key.permissions,
            vec![Scope::MembersRead, Scope::ListingsRead]
        );
        assert!(issued.key.expires_at.is_some());

        let (stored_hash, raw_hits): (String, i64) = conn
            .query_row(
                "SELECT key_hash,
                        (SELECT COUNT(*) FROM federation_api_keys WHERE key_hash = ?1)
                 FROM federation_api_keys WHERE id = ?2",
                params![issued.raw_key, issued.key.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("row");
        assert_eq!(stored_hash, hash_key(&issued.raw_key));
        assert_eq!(raw_hits, 0, "raw key must never be stored");
    }

    #[test]
    fn issue_validation() {
        let conn = setup();
        let gate = StaticFeatureGate::open();
        let issuer = CredentialIssuer::new(&conn, &gate);
        let actor = ActorContext::admin(1, 10);

        let mut blank = new_key("  ");
        assert!(matches!(issuer.issue(&actor, &blank), Err(FederationError::Validation(_))));
        blank.name = "ok".into();
        blank.rate_limit = 0;
        assert!(matches!(issuer.issue(&actor, &blank), Err(FederationError::Validation(_))));

        let mut bad_scope = new_key("x");
        bad_scope.permissions = vec!["admin:everything".into()];
        assert!(matches!(issuer.issue(&actor, &bad_scope), Err(FederationError::Validation(_))));

        let mut hmac = new_key("signed");
        hmac.auth_method = AuthMethod::Hmac;
        assert!(matches!(issuer.issue(&actor, &hmac), Err(FederationError::Validation(_))));
    }

    #[test]
    fn hmac_keys_get_a_secret_and_unique_platform_id() {
        let conn = setup();
        let gate = StaticFeatureGate::open();
        let issuer = CredentialIssuer::new(&conn, &gate);
        let mut input = new_key("signed");
        input.auth_method = AuthMethod::Hmac;
        input.platform_id = Some("partner-one".into());

        let issued = issuer
            .issue(&ActorContext::admin(1, 10), &input)
            .expect("issue hmac key");
        assert!(issued.key.signing_enabled);
        assert_eq!(issued.signing_secret.as_ref().map(String::len), Some(64));

        assert!(matches!(
            issuer.issue(&ActorContext::admin(2, 20), &input),
            Err(FederationError::Conflict(_))
        ));
    }

    #[test]
    fn status_transitions() {
        let conn = setup();
        let gate = StaticFeatureGate::open();
        let issuer = CredentialIssuer::new(&conn, &gate);
        let actor = ActorContext::admin(1, 10);
        let id = issuer.issue(&actor, &new_key("k")).expect("issue").key.id;

        assert!(matches!(issuer.activate(id, &actor), Err(FederationError::Conflict(_))));
        assert_eq!(
            issuer.suspend(id, &actor).expect("suspend").status,
            ApiKeyStatus::Suspended
        );
        assert!(matches!(issuer.suspend(id, &actor), Err(FederationError::Conflict(_))));
        issuer.activate(id, &actor).expect("activate");

        let revoked = issuer.revoke(id, &actor).expect("revoke");
        assert_eq!(revoked.status, ApiKeyStatus::Revoked);
        assert!(revoked.revoked_at.is_some());
        assert!(matches!(issuer.activate(id, &actor), Err(FederationError::Conflict(_))));
        assert!(matches!(issuer.revoke(id, &actor), Err(FederationError::Conflict(_))));
        assert!(matches!(issuer.regenerate(id, &actor), Err(FederationError::Conflict(_))));

        let level: String = conn
            .query_row(
                "SELECT level FROM federation_audit_log WHERE action_type = 'api_key_revoked'",
                [],
                |row| row.get(0),
            )
            .expect("audit row");
        assert_eq!(level, "warning");
    }

    #[test]
    fn regenerate_preserves_settings_and_resets_usage() {
        let conn = setup();
        let gate = StaticFeatureGate::open();
        let issuer = CredentialIssuer::new(&conn, &gate);
        let actor = ActorContext::admin(1, 10);
        let issued = issuer.issue(&actor, &new_key("k")).expect("issue");
        conn.execute(
            "UPDATE federation_api_keys SET request_count = 41 WHERE id = ?1",
            [issued.key.id],
        )
        .expect("bump usage");

        let again = issuer.regenerate(issued.key.id, &actor).expect("regenerate");
        assert_ne!(again.raw_key, issued.raw_key);
        assert_eq!(again.key.request_count, 0);
        assert_eq!(again.key.permissions, issued.key.permissions);
        assert_eq!(again.key.rate_limit, issued.key.rate_limit);
        assert_eq!(again.key.expires_at, issued.key.expires_at);
        assert_eq!(again.key.status, ApiKeyStatus::Active);
    }

    #[test]
    fn keys_are_tenant_scoped() {
        let conn = setup();
        let gate = StaticFeatureGate::open();
        let issuer = CredentialIssuer::new(&conn, &gate);
        let id = issuer
            .issue(&ActorContext::admin(1, 10), &new_key("k"))
            .expect("issue")
            .key
            .id;

        let other = ActorContext::admin(2, 20);
        assert!(matches!(issuer.get(id, &other), Err(FederationError::NotFound("api key"))));
        assert!(matches!(issuer.revoke(id, &other), Err(FederationError::NotFound(_))));
        assert_eq!(list_api_keys(&conn, 1).expect("list").len(), 1);
        assert!(list_api_keys(&conn, 2).expect("list").is_empty());
    }
}
