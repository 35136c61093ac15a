//! Shared types for the Accord federation core.
//!
//! This crate holds the vocabulary every other Accord crate speaks: tenant and
//! user identifiers, the explicit [`ActorContext`] passed into each operation,
//! federation levels and the capability flags they seed, the error taxonomy
//! surfaced to callers, and the `{success, error, data}` result envelope.
//!
//! Nothing in here touches storage or the network, so the crate stays a leaf
//! of the dependency graph.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod level;
mod result;

pub use level::{
    FederationLevel, FlagChange, InvalidFederationLevel, PartnershipPermissions, PermissionsUpdate,
};
pub use result::{ErrorKind, OperationResult};

/// Identifier of a tenant (an independent organisation on the installation).
pub type TenantId = i64;

/// Identifier of a user account.
pub type UserId = i64;

/// Platform roles relevant to federation administration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ordinary tenant member.
    Member,
    /// Tenant coordinator; administers the tenant day to day.
    Coordinator,
    /// Tenant administrator.
    Admin,
    /// Installation-wide administrator.
    SuperAdmin,
}

impl Role {
    /// Returns the canonical string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Coordinator => "coordinator",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    /// Whether this role may administer federation for its tenant.
    pub fn is_tenant_admin(self) -> bool {
        matches!(self, Self::Coordinator | Self::Admin | Self::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" => Ok(Self::Member),
            "coordinator" => Ok(Self::Coordinator),
            "admin" => Ok(Self::Admin),
            "super_admin" | "superadmin" => Ok(Self::SuperAdmin),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

/// Who is performing an operation, and from where.
///
/// Every mutating federation operation receives one of these explicitly.
/// The request metadata (`ip_address`, `user_agent`) is optional and only
/// used to enrich audit entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    /// The tenant the actor is acting on behalf of.
    pub tenant_id: TenantId,
    /// The acting user.
    pub user_id: UserId,
    /// Roles held by the user within `tenant_id`.
    pub roles: Vec<Role>,
    /// Client address of the originating request, if known.
    pub ip_address: Option<String>,
    /// Client user agent of the originating request, if known.
    pub user_agent: Option<String>,
}

impl ActorContext {
    /// Creates a context with no request metadata.
    pub fn new(tenant_id: TenantId, user_id: UserId, roles: Vec<Role>) -> Self {
        Self {
            tenant_id,
            user_id,
            roles,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Convenience constructor for a tenant administrator.
    pub fn admin(tenant_id: TenantId, user_id: UserId) -> Self {
        Self::new(tenant_id, user_id, vec![Role::Admin])
    }

    /// Attaches request metadata.
    pub fn with_request(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    /// Whether any held role grants federation administration.
    pub fn is_tenant_admin(&self) -> bool {
        self.roles.iter().any(|r| r.is_tenant_admin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_and_display_agree() {
        for role in [Role::Member, Role::Coordinator, Role::Admin, Role::SuperAdmin] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
            assert_eq!(role.to_string(), role.as_str());
        }
        assert_eq!("  Admin ".parse::<Role>(), Ok(Role::Admin));
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn only_admin_roles_administer_federation() {
        assert!(!Role::Member.is_tenant_admin());
        assert!(Role::Coordinator.is_tenant_admin());
        assert!(Role::Admin.is_tenant_admin());
        assert!(Role::SuperAdmin.is_tenant_admin());

        let member = ActorContext::new(1, 2, vec![Role::Member]);
        assert!(!member.is_tenant_admin());
        let mixed = ActorContext::new(1, 2, vec![Role::Member, Role::Coordinator]);
        assert!(mixed.is_tenant_admin());
    }

    #[test]
    fn request_metadata_is_attached() {
        let actor = ActorContext::admin(5, 42)
            .with_request(Some("10.0.0.1".into()), Some("curl/8".into()));
        assert_eq!(actor.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(actor.user_agent.as_deref(), Some("curl/8"));
        assert_eq!(actor.roles, vec![Role::Admin]);
    }
}
