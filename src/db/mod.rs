//! Database layer for nanopack
//!
//! Handles SQLite persistence of the small amount of state that must survive
//! a restart: the fingerprint of the last initialized package version and
//! one finished flag per group.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: database lifecycle, schema migrations
//! - [`state`]: runtime state key/value access

use sqlx::sqlite::SqlitePool;

mod migrations;
mod state;

/// Database handle for nanopack
pub struct Database {
    pool: SqlitePool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
