//! Read-only lookups against the platform's tenant and user tables.

use accord_types::{TenantId, UserId};
use rusqlite::{Connection, OptionalExtension};

pub fn tenant_exists(conn: &Connection, tenant_id: TenantId) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tenants WHERE id = ?1)",
        [tenant_id],
        |row| row.get(0),
    )
}

pub fn tenant_name(conn: &Connection, tenant_id: TenantId) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT name FROM tenants WHERE id = ?1", [tenant_id], |row| {
        row.get(0)
    })
    .optional()
}

/// Users of `tenant_id` holding a federation-administering role.
pub fn tenant_admins(conn: &Connection, tenant_id: TenantId) -> rusqlite::Result<Vec<UserId>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM users
         WHERE tenant_id = ?1 AND role IN ('admin', 'coordinator', 'super_admin')
         ORDER BY id",
    )?;
    let rows = stmt.query_map([tenant_id], |row| row.get(0))?;
    rows.collect()
}
