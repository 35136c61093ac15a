//! Audit entry records, the builder used to append them, and query filters.

use accord_types::{ActorContext, TenantId, UserId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{category_for_action, AuditAction, AuditCategory, AuditLevel};

/// User agents longer than this are truncated before storage.
pub const MAX_USER_AGENT_LEN: usize = 500;

/// Default page size for [`crate::query`].
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Hard ceiling on a single query page.
pub const MAX_QUERY_LIMIT: u32 = 1000;

/// A stored audit log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action_type: String,
    pub category: AuditCategory,
    pub level: AuditLevel,
    pub source_tenant_id: Option<TenantId>,
    pub target_tenant_id: Option<TenantId>,
    pub actor_user_id: Option<UserId>,
    /// Actor's display name at the time of the action.
    pub actor_name: Option<String>,
    /// Actor's email at the time of the action.
    pub actor_email: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Value,
    pub created_at: String,
}

impl AuditEntry {
    /// Human-readable label of the action.
    pub fn action_label(&self) -> String {
        crate::action::action_label(&self.action_type)
    }
}

/// An entry waiting to be appended.
///
/// Built with [`NewAuditEntry::new`] for known actions or
/// [`NewAuditEntry::custom`] for action types recorded by other subsystems.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub action_type: String,
    pub source_tenant_id: TenantId,
    pub target_tenant_id: Option<TenantId>,
    pub actor_user_id: Option<UserId>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Value,
    /// Explicit level; when `None` the trail derives one.
    pub level: Option<AuditLevel>,
}

impl NewAuditEntry {
    pub fn new(action: AuditAction, source_tenant_id: TenantId) -> Self {
        Self::custom(action.as_str(), source_tenant_id)
    }

    pub fn custom(action_type: impl Into<String>, source_tenant_id: TenantId) -> Self {
        Self {
            action_type: action_type.into(),
            source_tenant_id,
            target_tenant_id: None,
            actor_user_id: None,
            ip_address: None,
            user_agent: None,
            metadata: Value::Object(Default::default()),
            level: None,
        }
    }

    pub fn target(mut self, tenant_id: TenantId) -> Self {
        self.target_tenant_id = Some(tenant_id);
        self
    }

    /// Captures the acting user and request context.
    pub fn actor(mut self, actor: &ActorContext) -> Self {
        self.actor_user_id = Some(actor.user_id);
        self.ip_address = actor.ip_address.clone();
        self.user_agent = actor
            .user_agent
            .as_deref()
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn level(mut self, level: AuditLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn category(&self) -> AuditCategory {
        category_for_action(&self.action_type)
    }
}

/// Filters for reading the trail. All fields are optional and combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFilter {
    /// Matches entries where the tenant is either source or target.
    pub tenant_id: Option<TenantId>,
    /// Inclusive lower bound on the entry date.
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on the entry date.
    pub date_to: Option<NaiveDate>,
    pub category: Option<AuditCategory>,
    pub action_type: Option<String>,
    pub level: Option<AuditLevel>,
    pub actor_user_id: Option<UserId>,
    /// Substring match over action type, actor snapshot and metadata.
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditFilter {
    /// Filter scoped to one tenant's side of the trail.
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Default::default()
        }
    }

    /// Effective page size after defaulting and clamping.
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT)
    }
}
