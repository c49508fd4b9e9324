use std::time::Duration;

use moto_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::listing_repository::ListingRepository;

/// Owns the connection pool, runs migrations and hands out repositories.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    statement_timeout: Duration,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    ///
    /// Every session is opened with `statement_timeout` set, so no query or
    /// lock wait outlives `config.statement_timeout`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let options = config
            .url
            .parse::<PgConnectOptions>()
            .map_err(|e| AppError::ConfigError(format!("Invalid DATABASE_URL: {e}")))?
            .options([(
                "statement_timeout",
                format!("{}ms", config.statement_timeout.as_millis()),
            )]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::debug!(
            max_connections = config.max_connections,
            statement_timeout_secs = config.statement_timeout.as_secs(),
            "Database pool ready"
        );
        Ok(Self {
            pool,
            statement_timeout: config.statement_timeout,
        })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: Duration::ZERO,
        }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get a [`ListingRepository`] backed by this pool.
    pub fn listing_repo(&self) -> ListingRepository {
        ListingRepository::new(self.pool.clone()).with_statement_timeout(self.statement_timeout)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
