//! Partnership registry: the bilateral trust state machine.
//!
//! ```text
//!            request              approve / accept-counter
//!   (none) ──────────▶ pending ─────────────────────────▶ active ◀──┐
//!                       │  ▲ counter-propose                │       │ reactivate
//!                       │  └─────┘                  suspend ▼       │
//!                       │ reject / withdraw             suspended ──┘
//!                       ▼                                   │
//!                   terminated ◀──────── terminate ─────────┘
//! ```
//!
//! Each transition is one guarded UPDATE keyed on the status it was
//! validated against, so a lost race surfaces as `Conflict`. After the write
//! commits, one audit entry is appended and the other party's administrators
//! are notified.

use accord_audit::{record_or_report, AuditAction, NewAuditEntry};
use accord_types::{
    ActorContext, FederationLevel, PartnershipPermissions, PermissionsUpdate, TenantId,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::access::{authorize_mutation, clean_text, conversion_error};
use crate::directory;
use crate::error::{is_unique_violation, FederationError};
use crate::gate::{require_target_eligible, FeatureGate};
use crate::notify::{notify_tenant_admins, Notifier, PARTNERSHIPS_LINK};
use crate::types::{CounterProposal, Partnership, PartnershipStats, PartnershipStatus};

/// Reason stored when a rejection carries none.
pub const DEFAULT_REJECTION_REASON: &str = "Request rejected";

/// Reason stored when a withdrawal carries none.
pub const DEFAULT_WITHDRAWAL_REASON: &str = "Request withdrawn";

/// Input for [`PartnershipRegistry::request`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewPartnershipRequest {
    pub target_tenant_id: TenantId,
    /// Raw tier; validated against `1..=4`.
    pub federation_level: i64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Input for [`PartnershipRegistry::counter_propose`].
#[derive(Debug, Clone, Deserialize)]
pub struct CounterProposalInput {
    pub federation_level: i64,
    #[serde(default)]
    pub permissions: PermissionsUpdate,
    #[serde(default)]
    pub message: Option<String>,
}

const PARTNERSHIP_COLUMNS: &str = "p.id, p.tenant_id, t.name, p.partner_tenant_id, pt.name,
     p.status, p.federation_level,
     p.profiles_enabled, p.messaging_enabled, p.transactions_enabled,
     p.listings_enabled, p.events_enabled, p.groups_enabled,
     p.requested_by, p.request_message,
     p.counter_proposed_at, p.counter_proposed_by, p.counter_proposed_level,
     p.counter_proposed_permissions, p.counter_message,
     p.approved_at, p.approved_by, p.terminated_at, p.terminated_by, p.termination_reason,
     p.created_at, p.updated_at, p.suspended_at, p.suspended_by, p.suspension_reason";

const PARTNERSHIP_FROM: &str = "FROM federation_partnerships p
     LEFT JOIN tenants t ON t.id = p.tenant_id
     LEFT JOIN tenants pt ON pt.id = p.partner_tenant_id";

fn level_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<FederationLevel> {
    let raw: i64 = row.get(idx)?;
    FederationLevel::from_i64(raw).map_err(|e| conversion_error(idx, Type::Integer, e))
}

fn partnership_from_row(row: &Row<'_>) -> rusqlite::Result<Partnership> {
    let status: String = row.get(5)?;
    let status = status
        .parse::<PartnershipStatus>()
        .map_err(|e| conversion_error(5, Type::Text, e))?;

    let counter_at: Option<String> = row.get(15)?;
    let counter_level: Option<i64> = row.get(17)?;
    let counter_proposal = match (counter_at, counter_level) {
        (Some(proposed_at), Some(level)) => {
            let level =
                FederationLevel::from_i64(level).map_err(|e| conversion_error(17, Type::Integer, e))?;
            let permissions: Option<String> = row.get(18)?;
            let permissions = match permissions {
                Some(text) => serde_json::from_str(&text)
                    .map_err(|e| conversion_error(18, Type::Text, e))?,
                None => PermissionsUpdate::default(),
            };
            Some(CounterProposal {
                proposed_at,
                proposed_by: row.get(16)?,
                level,
                permissions,
                message: row.get(19)?,
            })
        }
        _ => None,
    };

    Ok(Partnership {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        tenant_name: row.get(2)?,
        partner_tenant_id: row.get(3)?,
        partner_tenant_name: row.get(4)?,
        status,
        federation_level: level_from_row(row, 6)?,
        permissions: PartnershipPermissions {
            profiles: row.get(7)?,
            messaging: row.get(8)?,
            transactions: row.get(9)?,
            listings: row.get(10)?,
            events: row.get(11)?,
            groups: row.get(12)?,
        },
        requested_by: row.get(13)?,
        request_message: row.get(14)?,
        counter_proposal,
        approved_at: row.get(20)?,
        approved_by: row.get(21)?,
        terminated_at: row.get(22)?,
        terminated_by: row.get(23)?,
        termination_reason: row.get(24)?,
        suspended_at: row.get(27)?,
        suspended_by: row.get(28)?,
        suspension_reason: row.get(29)?,
        created_at: row.get(25)?,
        updated_at: row.get(26)?,
    })
}

fn query_partnerships(
    conn: &Connection,
    where_sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Partnership>, FederationError> {
    let sql = format!(
        "SELECT {PARTNERSHIP_COLUMNS} {PARTNERSHIP_FROM} WHERE {where_sql}
         ORDER BY p.updated_at DESC, p.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, partnership_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ── Queries ──────────────────────────────────────────────────────────

/// Loads a partnership by id regardless of who is asking.
pub fn get_partnership(conn: &Connection, id: i64) -> Result<Option<Partnership>, FederationError> {
    let sql = format!("SELECT {PARTNERSHIP_COLUMNS} {PARTNERSHIP_FROM} WHERE p.id = ?1");
    Ok(conn.query_row(&sql, [id], partnership_from_row).optional()?)
}

/// Every partnership `tenant_id` is a party to, optionally filtered by status.
pub fn list_for_tenant(
    conn: &Connection,
    tenant_id: TenantId,
    status: Option<PartnershipStatus>,
) -> Result<Vec<Partnership>, FederationError> {
    query_partnerships(
        conn,
        "(p.tenant_id = ?1 OR p.partner_tenant_id = ?1) AND (?2 IS NULL OR p.status = ?2)",
        &[&tenant_id, &status.map(PartnershipStatus::as_str)],
    )
}

/// Pending requests addressed to `tenant_id`.
pub fn pending_incoming(
    conn: &Connection,
    tenant_id: TenantId,
) -> Result<Vec<Partnership>, FederationError> {
    query_partnerships(
        conn,
        "p.partner_tenant_id = ?1 AND p.status = 'pending'",
        &[&tenant_id],
    )
}

/// Pending requests `tenant_id` has sent.
pub fn outgoing(conn: &Connection, tenant_id: TenantId) -> Result<Vec<Partnership>, FederationError> {
    query_partnerships(
        conn,
        "p.tenant_id = ?1 AND p.status = 'pending'",
        &[&tenant_id],
    )
}

/// `tenant_id`'s own requests that came back with a counter-proposal.
pub fn counter_proposals(
    conn: &Connection,
    tenant_id: TenantId,
) -> Result<Vec<Partnership>, FederationError> {
    query_partnerships(
        conn,
        "p.tenant_id = ?1 AND p.status = 'pending' AND p.counter_proposed_level IS NOT NULL",
        &[&tenant_id],
    )
}

/// Counts per status, across the installation or for one tenant.
pub fn stats(
    conn: &Connection,
    tenant_id: Option<TenantId>,
) -> Result<PartnershipStats, FederationError> {
    let stats = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(status = 'pending'), 0),
                COALESCE(SUM(status = 'active'), 0),
                COALESCE(SUM(status = 'suspended'), 0),
                COALESCE(SUM(status = 'terminated'), 0),
                COALESCE(SUM(status = 'pending'
                    AND counter_proposed_level IS NULL
                    AND (?1 IS NULL OR partner_tenant_id = ?1)), 0)
         FROM federation_partnerships
         WHERE ?1 IS NULL OR tenant_id = ?1 OR partner_tenant_id = ?1",
        [tenant_id],
        |row| {
            Ok(PartnershipStats {
                total: row.get(0)?,
                pending: row.get(1)?,
                active: row.get(2)?,
                suspended: row.get(3)?,
                terminated: row.get(4)?,
                awaiting_response: row.get(5)?,
            })
        },
    )?;
    Ok(stats)
}

// ── Registry ─────────────────────────────────────────────────────────

/// Mutating partnership operations for one request.
pub struct PartnershipRegistry<'a> {
    conn: &'a Connection,
    gate: &'a dyn FeatureGate,
    notifier: &'a dyn Notifier,
}

impl<'a> PartnershipRegistry<'a> {
    pub fn new(conn: &'a Connection, gate: &'a dyn FeatureGate, notifier: &'a dyn Notifier) -> Self {
        Self {
            conn,
            gate,
            notifier,
        }
    }

    /// Loads a partnership the actor's tenant is a party to. Unknown and
    /// foreign ids both read as `NotFound`.
    pub fn get(&self, id: i64, actor: &ActorContext) -> Result<Partnership, FederationError> {
        get_partnership(self.conn, id)?
            .filter(|p| p.is_party(actor.tenant_id))
            .ok_or(FederationError::NotFound("partnership"))
    }

    /// Opens a pending request from the actor's tenant to `target_tenant_id`.
    pub fn request(
        &self,
        actor: &ActorContext,
        input: &NewPartnershipRequest,
    ) -> Result<Partnership, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let level = parse_level(input.federation_level)?;
        let target = input.target_tenant_id;
        if target == actor.tenant_id {
            return Err(FederationError::Validation(
                "cannot request a partnership with your own tenant".to_string(),
            ));
        }
        if !directory::tenant_exists(self.conn, target)? {
            return Err(FederationError::Validation(
                "target tenant does not exist".to_string(),
            ));
        }
        require_target_eligible(self.gate, target)?;

        let message = clean_text(input.message.as_deref());
        let perms = level.default_permissions();
        let inserted = self.conn.query_row(
            "INSERT INTO federation_partnerships (
                 tenant_id, partner_tenant_id, status, federation_level,
                 profiles_enabled, messaging_enabled, transactions_enabled,
                 listings_enabled, events_enabled, groups_enabled,
                 requested_by, request_message
             ) VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             RETURNING id",
            params![
                actor.tenant_id,
                target,
                level.as_u8(),
                perms.profiles,
                perms.messaging,
                perms.transactions,
                perms.listings,
                perms.events,
                perms.groups,
                actor.user_id,
                message,
            ],
            |row| row.get::<_, i64>(0),
        );
        let id = match inserted {
            Ok(id) => id,
            Err(e) if is_unique_violation(&e) => {
                return Err(FederationError::Conflict(
                    "a partnership between these tenants already exists".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let partnership = self.reload(id)?;
        tracing::info!(
            partnership_id = id,
            tenant_id = actor.tenant_id,
            partner_tenant_id = target,
            level = level.as_u8(),
            "partnership requested"
        );
        self.finish(
            AuditAction::PartnershipRequested,
            &partnership,
            actor,
            json!({
                "partnership_id": id,
                "federation_level": level.as_u8(),
                "message": message,
            }),
            format!(
                "{} has requested a {} federation partnership",
                party_name(&partnership, actor.tenant_id),
                level.label()
            ),
        );
        Ok(partnership)
    }

    /// Offers different terms on a pending request. Receiver only; replaces
    /// any earlier counter-proposal.
    pub fn counter_propose(
        &self,
        id: i64,
        actor: &ActorContext,
        input: &CounterProposalInput,
    ) -> Result<Partnership, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let level = parse_level(input.federation_level)?;
        let current = self.get(id, actor)?;
        require_receiver(&current, actor, "counter-propose")?;
        require_status(&current, PartnershipStatus::Pending)?;

        let message = clean_text(input.message.as_deref());
        let permissions = serde_json::to_string(&input.permissions)?;
        let changed = self.conn.execute(
            "UPDATE federation_partnerships
             SET counter_proposed_at = datetime('now'), counter_proposed_by = ?1,
                 counter_proposed_level = ?2, counter_proposed_permissions = ?3,
                 counter_message = ?4, updated_at = datetime('now')
             WHERE id = ?5 AND status = 'pending'",
            params![actor.user_id, level.as_u8(), permissions, message, id],
        )?;
        ensure_changed(changed)?;

        let partnership = self.reload(id)?;
        self.finish(
            AuditAction::PartnershipCounterProposed,
            &partnership,
            actor,
            json!({
                "partnership_id": id,
                "original_level": current.federation_level.as_u8(),
                "proposed_level": level.as_u8(),
                "proposed_permissions": input.permissions,
                "message": message,
            }),
            format!(
                "{} has proposed different terms for your federation request",
                party_name(&partnership, actor.tenant_id)
            ),
        );
        Ok(partnership)
    }

    /// Accepts the receiver's counter-proposal. Requester only.
    pub fn accept_counter_proposal(
        &self,
        id: i64,
        actor: &ActorContext,
    ) -> Result<Partnership, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        if current.tenant_id != actor.tenant_id {
            return Err(FederationError::Forbidden(
                "only the requesting tenant can accept a counter-proposal".to_string(),
            ));
        }
        require_status(&current, PartnershipStatus::Pending)?;
        let counter = current.counter_proposal.as_ref().ok_or_else(|| {
            FederationError::Conflict("there is no counter-proposal to accept".to_string())
        })?;

        let level = counter.level;
        let perms = level.default_permissions().apply(&counter.permissions);
        let changed = self.conn.execute(
            "UPDATE federation_partnerships
             SET status = 'active', federation_level = ?1,
                 profiles_enabled = ?2, messaging_enabled = ?3, transactions_enabled = ?4,
                 listings_enabled = ?5, events_enabled = ?6, groups_enabled = ?7,
                 approved_at = datetime('now'), approved_by = ?8,
                 counter_proposed_at = NULL, counter_proposed_by = NULL,
                 counter_proposed_level = NULL, counter_proposed_permissions = NULL,
                 counter_message = NULL, updated_at = datetime('now')
             WHERE id = ?9 AND status = 'pending' AND counter_proposed_level IS NOT NULL",
            params![
                level.as_u8(),
                perms.profiles,
                perms.messaging,
                perms.transactions,
                perms.listings,
                perms.events,
                perms.groups,
                actor.user_id,
                id,
            ],
        )?;
        ensure_changed(changed)?;

        let partnership = self.reload(id)?;
        tracing::info!(partnership_id = id, level = level.as_u8(), "counter-proposal accepted");
        self.finish(
            AuditAction::PartnershipCounterAccepted,
            &partnership,
            actor,
            json!({
                "partnership_id": id,
                "federation_level": level.as_u8(),
                "permissions": perms,
            }),
            format!(
                "{} accepted your counter-proposal; the partnership is now active",
                party_name(&partnership, actor.tenant_id)
            ),
        );
        Ok(partnership)
    }

    /// Approves a pending request. Receiver only. Flags not given in
    /// `permissions` take the level's defaults.
    pub fn approve(
        &self,
        id: i64,
        actor: &ActorContext,
        permissions: Option<&PermissionsUpdate>,
    ) -> Result<Partnership, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        require_receiver(&current, actor, "approve")?;
        require_status(&current, PartnershipStatus::Pending)?;

        let perms = current
            .federation_level
            .default_permissions()
            .apply(&permissions.copied().unwrap_or_default());
        let changed = self.conn.execute(
            "UPDATE federation_partnerships
             SET status = 'active',
                 profiles_enabled = ?1, messaging_enabled = ?2, transactions_enabled = ?3,
                 listings_enabled = ?4, events_enabled = ?5, groups_enabled = ?6,
                 approved_at = datetime('now'), approved_by = ?7,
                 counter_proposed_at = NULL, counter_proposed_by = NULL,
                 counter_proposed_level = NULL, counter_proposed_permissions = NULL,
                 counter_message = NULL, updated_at = datetime('now')
             WHERE id = ?8 AND status = 'pending'",
            params![
                perms.profiles,
                perms.messaging,
                perms.transactions,
                perms.listings,
                perms.events,
                perms.groups,
                actor.user_id,
                id,
            ],
        )?;
        ensure_changed(changed)?;

        let partnership = self.reload(id)?;
        tracing::info!(partnership_id = id, "partnership approved");
        self.finish(
            AuditAction::PartnershipApproved,
            &partnership,
            actor,
            json!({
                "partnership_id": id,
                "federation_level": partnership.federation_level.as_u8(),
                "permissions": perms,
            }),
            format!(
                "{} approved your federation request",
                party_name(&partnership, actor.tenant_id)
            ),
        );
        Ok(partnership)
    }

    /// Declines a pending request. Receiver only.
    pub fn reject(
        &self,
        id: i64,
        actor: &ActorContext,
        reason: Option<&str>,
    ) -> Result<Partnership, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        require_receiver(&current, actor, "reject")?;
        require_status(&current, PartnershipStatus::Pending)?;

        let reason = clean_text(reason).unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string());
        let partnership = self.set_status(
            &current,
            PartnershipStatus::Terminated,
            actor,
            Some(&reason),
        )?;
        self.finish(
            AuditAction::PartnershipRejected,
            &partnership,
            actor,
            json!({ "partnership_id": id, "reason": reason }),
            format!(
                "{} declined your federation request",
                party_name(&partnership, actor.tenant_id)
            ),
        );
        Ok(partnership)
    }

    /// Changes individual capability flags. Either party, while active or
    /// suspended.
    pub fn update_permissions(
        &self,
        id: i64,
        actor: &ActorContext,
        update: &PermissionsUpdate,
    ) -> Result<Partnership, FederationError> {
        authorize_mutation(actor, self.gate)?;
        if update.is_empty() {
            return Err(FederationError::Validation(
                "no permission changes supplied".to_string(),
            ));
        }
        let current = self.get(id, actor)?;
        if !matches!(
            current.status,
            PartnershipStatus::Active | PartnershipStatus::Suspended
        ) {
            return Err(FederationError::Conflict(format!(
                "permissions cannot be changed on a {} partnership",
                current.status
            )));
        }

        let after = current.permissions.apply(update);
        let changes = current.permissions.diff(&after);
        let changed = self.conn.execute(
            "UPDATE federation_partnerships
             SET profiles_enabled = ?1, messaging_enabled = ?2, transactions_enabled = ?3,
                 listings_enabled = ?4, events_enabled = ?5, groups_enabled = ?6,
                 updated_at = datetime('now')
             WHERE id = ?7 AND status = ?8",
            params![
                after.profiles,
                after.messaging,
                after.transactions,
                after.listings,
                after.events,
                after.groups,
                id,
                current.status.as_str(),
            ],
        )?;
        ensure_changed(changed)?;

        let partnership = self.reload(id)?;
        tracing::debug!(partnership_id = id, changed = changes.len(), "partnership permissions updated");
        self.finish(
            AuditAction::PartnershipPermissionsUpdated,
            &partnership,
            actor,
            json!({ "partnership_id": id, "changes": changes }),
            format!(
                "{} changed the permissions of your federation partnership",
                party_name(&partnership, actor.tenant_id)
            ),
        );
        Ok(partnership)
    }

    /// Ends a partnership in any non-terminal state. Either party.
    pub fn terminate(
        &self,
        id: i64,
        actor: &ActorContext,
        reason: Option<&str>,
    ) -> Result<Partnership, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        if current.status.is_terminal() {
            return Err(FederationError::Conflict(
                "partnership is already terminated".to_string(),
            ));
        }

        let reason = clean_text(reason);
        let partnership = self.set_status(
            &current,
            PartnershipStatus::Terminated,
            actor,
            reason.as_deref(),
        )?;
        tracing::info!(partnership_id = id, tenant_id = actor.tenant_id, "partnership terminated");
        self.finish(
            AuditAction::PartnershipTerminated,
            &partnership,
            actor,
            json!({
                "partnership_id": id,
                "previous_status": current.status,
                "reason": reason,
            }),
            format!(
                "{} ended your federation partnership",
                party_name(&partnership, actor.tenant_id)
            ),
        );
        Ok(partnership)
    }

    /// Cancels the actor's own pending request.
    pub fn withdraw(
        &self,
        id: i64,
        actor: &ActorContext,
        reason: Option<&str>,
    ) -> Result<Partnership, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        if current.tenant_id != actor.tenant_id {
            return Err(FederationError::Forbidden(
                "only the requesting tenant can withdraw a request".to_string(),
            ));
        }
        require_status(&current, PartnershipStatus::Pending)?;

        let reason = clean_text(reason).unwrap_or_else(|| DEFAULT_WITHDRAWAL_REASON.to_string());
        let partnership = self.set_status(
            &current,
            PartnershipStatus::Terminated,
            actor,
            Some(&reason),
        )?;
        self.finish(
            AuditAction::PartnershipWithdrawn,
            &partnership,
            actor,
            json!({ "partnership_id": id, "reason": reason }),
            format!(
                "{} withdrew its federation request",
                party_name(&partnership, actor.tenant_id)
            ),
        );
        Ok(partnership)
    }

    /// Pauses an active partnership. Either party.
    pub fn suspend(
        &self,
        id: i64,
        actor: &ActorContext,
        reason: Option<&str>,
    ) -> Result<Partnership, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        require_status(&current, PartnershipStatus::Active)?;

        let reason = clean_text(reason);
        let partnership = self.set_status(
            &current,
            PartnershipStatus::Suspended,
            actor,
            reason.as_deref(),
        )?;
        tracing::warn!(partnership_id = id, tenant_id = actor.tenant_id, "partnership suspended");
        self.finish(
            AuditAction::PartnershipSuspended,
            &partnership,
            actor,
            json!({ "partnership_id": id, "reason": reason }),
            format!(
                "{} suspended your federation partnership",
                party_name(&partnership, actor.tenant_id)
            ),
        );
        Ok(partnership)
    }

    /// Resumes a suspended partnership. Either party.
    pub fn reactivate(&self, id: i64, actor: &ActorContext) -> Result<Partnership, FederationError> {
        authorize_mutation(actor, self.gate)?;
        let current = self.get(id, actor)?;
        require_status(&current, PartnershipStatus::Suspended)?;

        let partnership = self.set_status(&current, PartnershipStatus::Active, actor, None)?;
        self.finish(
            AuditAction::PartnershipReactivated,
            &partnership,
            actor,
            json!({ "partnership_id": id }),
            format!(
                "{} reactivated your federation partnership",
                party_name(&partnership, actor.tenant_id)
            ),
        );
        Ok(partnership)
    }

    fn reload(&self, id: i64) -> Result<Partnership, FederationError> {
        get_partnership(self.conn, id)?.ok_or_else(|| {
            FederationError::Internal(format!("partnership {id} vanished after write"))
        })
    }

    /// Guarded status change. Moving to `terminated` or `suspended` also
    /// stamps who, when and why; leaving `suspended` clears that stamp.
    fn set_status(
        &self,
        current: &Partnership,
        to: PartnershipStatus,
        actor: &ActorContext,
        reason: Option<&str>,
    ) -> Result<Partnership, FederationError> {
        let changed = self.conn.execute(
            "UPDATE federation_partnerships
             SET status = ?1,
                 terminated_at = CASE WHEN ?1 = 'terminated' THEN datetime('now') ELSE terminated_at END,
                 terminated_by = CASE WHEN ?1 = 'terminated' THEN ?2 ELSE terminated_by END,
                 termination_reason = CASE WHEN ?1 = 'terminated' THEN ?3 ELSE termination_reason END,
                 suspended_at = CASE WHEN ?1 = 'suspended' THEN datetime('now') ELSE NULL END,
                 suspended_by = CASE WHEN ?1 = 'suspended' THEN ?2 ELSE NULL END,
                 suspension_reason = CASE WHEN ?1 = 'suspended' THEN ?3 ELSE NULL END,
                 updated_at = datetime('now')
             WHERE id = ?4 AND status = ?5",
            params![
                to.as_str(),
                actor.user_id,
                reason,
                current.id,
                current.status.as_str(),
            ],
        )?;
        ensure_changed(changed)?;
        self.reload(current.id)
    }

    /// Audit and notification once a transition has committed.
    fn finish(
        &self,
        action: AuditAction,
        partnership: &Partnership,
        actor: &ActorContext,
        metadata: Value,
        message: String,
    ) {
        let other = partnership.other_party(actor.tenant_id);
        record_or_report(
            self.conn,
            &NewAuditEntry::new(action, actor.tenant_id)
                .target(other)
                .actor(actor)
                .metadata(metadata),
        );
        notify_tenant_admins(
            self.conn,
            self.notifier,
            other,
            &message,
            Some(PARTNERSHIPS_LINK),
        );
    }
}

fn parse_level(raw: i64) -> Result<FederationLevel, FederationError> {
    FederationLevel::from_i64(raw).map_err(|e| FederationError::Validation(e.to_string()))
}

fn require_receiver(
    partnership: &Partnership,
    actor: &ActorContext,
    verb: &str,
) -> Result<(), FederationError> {
    if partnership.partner_tenant_id == actor.tenant_id {
        Ok(())
    } else {
        Err(FederationError::Forbidden(format!(
            "only the receiving tenant can {verb} this request"
        )))
    }
}

fn require_status(
    partnership: &Partnership,
    expected: PartnershipStatus,
) -> Result<(), FederationError> {
    if partnership.status == expected {
        Ok(())
    } else {
        Err(FederationError::Conflict(format!(
            "partnership is {}, expected {}",
            partnership.status, expected
        )))
    }
}

/// Zero rows from a guarded UPDATE means another request got there first.
fn ensure_changed(changed: usize) -> Result<(), FederationError> {
    if changed == 0 {
        Err(FederationError::Conflict(
            "partnership was modified concurrently".to_string(),
        ))
    } else {
        Ok(())
    }
}

fn party_name(partnership: &Partnership, tenant_id: TenantId) -> String {
    let name = if partnership.tenant_id == tenant_id {
        partnership.tenant_name.as_deref()
    } else {
        partnership.partner_tenant_name.as_deref()
    };
    name.map_or_else(|| format!("Tenant {tenant_id}"), str::to_string)
}
