use crate::config::DatabaseConfig;
use crate::error::{GatekeeperError, GatekeeperResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// Connect using the `database` section of the configuration. `url`
    /// placeholders such as `${DATABASE_URL}` are expanded first, and pending
    /// migrations run when `run_migrations` is set.
    pub async fn connect(config: &DatabaseConfig) -> GatekeeperResult<Self> {
        let database_url = config.database_url().ok_or_else(|| {
            GatekeeperError::Configuration("database.url is not set".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.pool)
            .acquire_timeout(config.connect_timeout())
            .connect(&database_url)
            .await?;

        info!(max_connections = config.pool, "Database pool created");

        if config.run_migrations {
            super::migrations::DatabaseMigrations::run_all(&pool).await?;
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> GatekeeperResult<bool> {
        let row = sqlx::query("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;

        let health: i32 = row.try_get("health")?;
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
