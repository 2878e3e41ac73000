//! # Schema Migrations
//!
//! SQL files under `migrations/` named `YYYYMMDDHHMMSS_description.sql`,
//! embedded at compile time. `sqlx` serializes concurrent runners with a
//! Postgres advisory lock and records applied versions in
//! `_sqlx_migrations`, so running them from several processes is safe.

use crate::error::{GatekeeperError, GatekeeperResult};
use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Embedded migrator for the gatekeeper schema
pub fn migrator() -> &'static Migrator {
    &MIGRATOR
}

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply every outstanding migration
    pub async fn run_all(pool: &PgPool) -> GatekeeperResult<()> {
        MIGRATOR
            .run(pool)
            .await
            .map_err(|e| GatekeeperError::Persistence(format!("migration failed: {e}")))?;

        info!(migrations = MIGRATOR.iter().count(), "Database schema is up to date");
        Ok(())
    }
}
