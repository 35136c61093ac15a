//! Database layer for Accord.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and the embedded, versioned schema migrations for every federation table.
//!
//! # Schema notes
//!
//! - `federation_partnerships` carries generated `pair_low` / `pair_high`
//!   columns and a partial unique index over them, so two tenants cannot
//!   hold more than one live partnership regardless of who asked first.
//! - `federation_audit_log` rejects UPDATE and DELETE through triggers. The
//!   retention purge opens `federation_audit_purge_window` inside its own
//!   transaction to delete expired rows.
//! - `tenants` and `users` are reference data owned by the wider platform;
//!   they exist here so foreign keys and actor snapshots resolve.

mod migrations;
mod pool;

pub use migrations::{applied_migrations, run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
