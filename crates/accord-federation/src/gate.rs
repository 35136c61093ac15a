//! Feature gate collaborator.
//!
//! Federation is off unless the installation enables it globally, the tenant
//! is whitelisted (when whitelist mode is on) and the tenant has opted in.
//! Every mutating operation consults the gate; a closed gate is reported as
//! `Forbidden` for the acting tenant and `Validation` for an ineligible
//! target, never as a silent no-op.

use std::collections::HashSet;

use accord_types::TenantId;
use rusqlite::{Connection, OptionalExtension};

use crate::error::FederationError;

/// Per-tenant federation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FederationFeature {
    /// Master switch for the tenant.
    TenantFederation,
    /// The tenant can be found and asked for partnerships.
    AppearInDirectory,
    Profiles,
    Messaging,
    Transactions,
    Listings,
    Events,
    Groups,
}

impl FederationFeature {
    /// Key stored in `federation_tenant_features`.
    pub fn key(self) -> &'static str {
        match self {
            Self::TenantFederation => "tenant_federation_enabled",
            Self::AppearInDirectory => "tenant_appear_in_directory",
            Self::Profiles => "tenant_profiles_enabled",
            Self::Messaging => "tenant_messaging_enabled",
            Self::Transactions => "tenant_transactions_enabled",
            Self::Listings => "tenant_listings_enabled",
            Self::Events => "tenant_events_enabled",
            Self::Groups => "tenant_groups_enabled",
        }
    }
}

/// Boolean capability answers consumed by the registries.
pub trait FeatureGate {
    fn is_globally_enabled(&self) -> bool;
    fn is_tenant_whitelisted(&self, tenant_id: TenantId) -> bool;
    fn is_tenant_feature_enabled(&self, feature: FederationFeature, tenant_id: TenantId) -> bool;
}

/// Whether `tenant_id` may take part in federation at all.
pub fn tenant_gate_open(gate: &dyn FeatureGate, tenant_id: TenantId) -> bool {
    gate.is_globally_enabled()
        && gate.is_tenant_whitelisted(tenant_id)
        && gate.is_tenant_feature_enabled(FederationFeature::TenantFederation, tenant_id)
}

/// Fails with `Forbidden` unless the acting tenant is gated in.
pub fn require_actor_enabled(
    gate: &dyn FeatureGate,
    tenant_id: TenantId,
) -> Result<(), FederationError> {
    if !gate.is_globally_enabled() {
        return Err(FederationError::Forbidden(
            "federation is disabled on this installation".to_string(),
        ));
    }
    if !tenant_gate_open(gate, tenant_id) {
        return Err(FederationError::Forbidden(
            "federation is not enabled for your tenant".to_string(),
        ));
    }
    Ok(())
}

/// Fails with `Validation` unless the target tenant accepts partnership
/// requests.
pub fn require_target_eligible(
    gate: &dyn FeatureGate,
    tenant_id: TenantId,
) -> Result<(), FederationError> {
    if tenant_gate_open(gate, tenant_id)
        && gate.is_tenant_feature_enabled(FederationFeature::AppearInDirectory, tenant_id)
    {
        Ok(())
    } else {
        Err(FederationError::Validation(
            "target tenant is not accepting federation requests".to_string(),
        ))
    }
}

/// Gate backed by the `federation_system_controls`,
/// `federation_tenant_whitelist` and `federation_tenant_features` tables.
///
/// Lookup failures are logged and answered with `false`.
pub struct SqliteFeatureGate<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteFeatureGate<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn controls(&self) -> Option<(bool, bool, bool)> {
        let row = self
            .conn
            .query_row(
                "SELECT federation_enabled, whitelist_mode_enabled, emergency_lockdown_active
                 FROM federation_system_controls WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional();
        match row {
            Ok(controls) => controls,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read federation system controls");
                None
            }
        }
    }

    fn flag(&self, sql: &str, tenant_id: TenantId, extra: Option<&str>) -> bool {
        let result = match extra {
            Some(key) => self
                .conn
                .query_row(sql, rusqlite::params![tenant_id, key], |row| row.get(0)),
            None => self.conn.query_row(sql, [tenant_id], |row| row.get(0)),
        };
        match result {
            Ok(value) => value,
            Err(rusqlite::Error::QueryReturnedNoRows) => false,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "feature gate lookup failed");
                false
            }
        }
    }
}

impl FeatureGate for SqliteFeatureGate<'_> {
    fn is_globally_enabled(&self) -> bool {
        matches!(self.controls(), Some((true, _, false)))
    }

    fn is_tenant_whitelisted(&self, tenant_id: TenantId) -> bool {
        match self.controls() {
            Some((_, false, _)) => true,
            Some((_, true, _)) => self.flag(
                "SELECT EXISTS(SELECT 1 FROM federation_tenant_whitelist WHERE tenant_id = ?1)",
                tenant_id,
                None,
            ),
            None => false,
        }
    }

    fn is_tenant_feature_enabled(&self, feature: FederationFeature, tenant_id: TenantId) -> bool {
        self.flag(
            "SELECT is_enabled FROM federation_tenant_features
             WHERE tenant_id = ?1 AND feature_key = ?2",
            tenant_id,
            Some(feature.key()),
        )
    }
}

/// Writes the gate tables. Used by installation tooling and tests.
pub mod admin {
    use super::FederationFeature;
    use accord_types::TenantId;
    use rusqlite::{params, Connection};

    pub fn set_global(conn: &Connection, enabled: bool, whitelist_mode: bool) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE federation_system_controls
             SET federation_enabled = ?1, whitelist_mode_enabled = ?2, updated_at = datetime('now')
             WHERE id = 1",
            params![enabled, whitelist_mode],
        )?;
        Ok(())
    }

    pub fn set_lockdown(conn: &Connection, active: bool, reason: Option<&str>) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE federation_system_controls
             SET emergency_lockdown_active = ?1, emergency_lockdown_reason = ?2,
                 updated_at = datetime('now')
             WHERE id = 1",
            params![active, reason],
        )?;
        if active {
            tracing::warn!(reason, "federation emergency lockdown engaged");
        }
        Ok(())
    }

    pub fn whitelist(conn: &Connection, tenant_id: TenantId) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO federation_tenant_whitelist (tenant_id) VALUES (?1)",
            [tenant_id],
        )?;
        Ok(())
    }

    pub fn set_feature(
        conn: &Connection,
        tenant_id: TenantId,
        feature: FederationFeature,
        enabled: bool,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO federation_tenant_features (tenant_id, feature_key, is_enabled)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (tenant_id, feature_key)
             DO UPDATE SET is_enabled = excluded.is_enabled, updated_at = datetime('now')",
            params![tenant_id, feature.key(), enabled],
        )?;
        Ok(())
    }

    /// Enables federation and directory listing for `tenant_id`.
    pub fn opt_in(conn: &Connection, tenant_id: TenantId) -> rusqlite::Result<()> {
        whitelist(conn, tenant_id)?;
        set_feature(conn, tenant_id, FederationFeature::TenantFederation, true)?;
        set_feature(conn, tenant_id, FederationFeature::AppearInDirectory, true)
    }
}

/// In-memory gate for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureGate {
    pub global: bool,
    /// `None` means every tenant is whitelisted.
    pub whitelist: Option<HashSet<TenantId>>,
    /// Every per-tenant feature is on for every tenant.
    pub all_features: bool,
    /// Tenants with every per-tenant feature switched on.
    pub enabled_tenants: HashSet<TenantId>,
    /// Individual (feature, tenant) switches.
    pub features: HashSet<(FederationFeature, TenantId)>,
}

impl StaticFeatureGate {
    /// Everything enabled for every tenant.
    pub fn open() -> Self {
        Self {
            global: true,
            all_features: true,
            ..Self::default()
        }
    }

    /// Everything disabled.
    pub fn closed() -> Self {
        Self::default()
    }

    /// Globally enabled, with only the listed tenants opted in.
    pub fn for_tenants(tenants: impl IntoIterator<Item = TenantId>) -> Self {
        Self {
            global: true,
            enabled_tenants: tenants.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_feature(mut self, feature: FederationFeature, tenant_id: TenantId) -> Self {
        self.features.insert((feature, tenant_id));
        self
    }
}

impl FeatureGate for StaticFeatureGate {
    fn is_globally_enabled(&self) -> bool {
        self.global
    }

    fn is_tenant_whitelisted(&self, tenant_id: TenantId) -> bool {
        self.whitelist
            .as_ref()
            .map_or(true, |set| set.contains(&tenant_id))
    }

    fn is_tenant_feature_enabled(&self, feature: FederationFeature, tenant_id: TenantId) -> bool {
        self.all_features
            || self.enabled_tenants.contains(&tenant_id)
            || self.features.contains(&(feature, tenant_id))
    }
}
