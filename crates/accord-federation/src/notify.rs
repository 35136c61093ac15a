//! Best-effort notification of tenant administrators.
//!
//! Delivery belongs to the wider platform. The registries only hand a
//! message to a [`Notifier`]; a failure is logged and never changes the
//! outcome of the operation that triggered it.

use accord_types::{TenantId, UserId};
use rusqlite::Connection;
use thiserror::Error;

use crate::directory;

/// Admin page linked from partnership notifications.
pub const PARTNERSHIPS_LINK: &str = "/admin/federation/partnerships";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

pub trait Notifier {
    fn notify(&self, user_id: UserId, message: &str, link: Option<&str>) -> Result<(), NotifyError>;
}

/// Writes notifications to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, user_id: UserId, message: &str, link: Option<&str>) -> Result<(), NotifyError> {
        tracing::info!(user_id, link, text = message, "federation notification");
        Ok(())
    }
}

/// Appends to the `notifications` outbox table.
pub struct OutboxNotifier<'a> {
    conn: &'a Connection,
}

impl<'a> OutboxNotifier<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl Notifier for OutboxNotifier<'_> {
    fn notify(&self, user_id: UserId, message: &str, link: Option<&str>) -> Result<(), NotifyError> {
        self.conn.execute(
            "INSERT INTO notifications (user_id, message, link) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, message, link],
        )?;
        Ok(())
    }
}

/// Sends `message` to every administrator of `tenant_id`. Returns how many
/// notifications were handed off.
pub fn notify_tenant_admins(
    conn: &Connection,
    notifier: &dyn Notifier,
    tenant_id: TenantId,
    message: &str,
    link: Option<&str>,
) -> usize {
    let admins = match directory::tenant_admins(conn, tenant_id) {
        Ok(admins) => admins,
        Err(e) => {
            tracing::warn!(tenant_id, error = %e, "failed to look up tenant admins");
            return 0;
        }
    };

    let mut sent = 0;
    for user_id in admins {
        match notifier.notify(user_id, message, link) {
            Ok(()) => sent += 1,
            Err(e) => tracing::warn!(tenant_id, user_id, error = %e, "notification failed"),
        }
    }
    sent
}
