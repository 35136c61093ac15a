//! Embedded SQL migration runner.
//!
//! Migrations are SQL files embedded at compile time. They run sequentially
//! on startup, tracked by the `_accord_migrations` table. Each migration
//! runs exactly once inside its own transaction; applied migrations are
//! skipped.

use rusqlite::Connection;
use thiserror::Error;

/// A single embedded migration.
struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        name: "001_tenants_users",
        sql: include_str!("migrations/001_tenants_users.sql"),
    },
    Migration {
        name: "002_federation_partnerships",
        sql: include_str!("migrations/002_federation_partnerships.sql"),
    },
    Migration {
        name: "003_federation_api_keys",
        sql: include_str!("migrations/003_federation_api_keys.sql"),
    },
    Migration {
        name: "004_federation_external_partners",
        sql: include_str!("migrations/004_federation_external_partners.sql"),
    },
    Migration {
        name: "005_federation_audit_log",
        sql: include_str!("migrations/005_federation_audit_log.sql"),
    },
    Migration {
        name: "006_federation_feature_gate",
        sql: include_str!("migrations/006_federation_feature_gate.sql"),
    },
    Migration {
        name: "007_notifications",
        sql: include_str!("migrations/007_notifications.sql"),
    },
    Migration {
        name: "008_partnership_suspension",
        sql: include_str!("migrations/008_partnership_suspension.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Applies every pending embedded migration, returning how many ran.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// tracking table cannot be queried. A failed migration leaves no partial
/// schema behind.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

/// Names of the migrations recorded as applied, oldest first.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<String>, MigrationError> {
    let mut stmt = conn
        .prepare("SELECT name FROM _accord_migrations ORDER BY id ASC")
        .map_err(MigrationError::StateQuery)?;
    let names = stmt
        .query_map([], |row| row.get(0))
        .map_err(MigrationError::StateQuery)?
        .collect::<Result<Vec<String>, _>>()
        .map_err(MigrationError::StateQuery)?;
    Ok(names)
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _accord_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|source| MigrationError::ExecutionFailed {
        name: "_accord_migrations_bootstrap".to_string(),
        source,
    })?;

    let mut applied = 0;

    for migration in migrations {
        let done: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM _accord_migrations WHERE name = ?1)",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if done {
            tracing::debug!(migration = migration.name, "migration already applied");
            continue;
        }

        apply_one(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
        tracing::info!(migration = migration.name, "applied migration");
        applied += 1;
    }

    Ok(applied)
}

fn apply_one(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _accord_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}
