use std::time::Duration;

use moto_core::AppError;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Server-side limit on each statement, lock waits included. Zero
    /// disables it.
    pub statement_timeout: Duration,
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `DATABASE_ACQUIRE_TIMEOUT_SECS` (optional, defaults to 10)
    /// - `DATABASE_STATEMENT_TIMEOUT_SECS` (optional, defaults to 30, 0 disables)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let url = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()).ok_or_else(|| {
            AppError::ConfigError("DATABASE_URL not set. Required for database operations.".into())
        })?;

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            None => 5,
            Some(raw) => {
                let parsed: u32 = raw.trim().parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
                    ))
                })?;
                if parsed == 0 {
                    return Err(AppError::ConfigError(
                        "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
                    ));
                }
                parsed
            }
        };

        let acquire_timeout = seconds(&lookup, "DATABASE_ACQUIRE_TIMEOUT_SECS", 10)?;
        let statement_timeout = seconds(&lookup, "DATABASE_STATEMENT_TIMEOUT_SECS", 30)?;

        Ok(Self {
            url,
            max_connections,
            acquire_timeout,
            statement_timeout,
        })
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, AppError> {
    match lookup(key) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw.trim().parse().map(Duration::from_secs).map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid {key} '{raw}': must be a whole number of seconds"
            ))
        }),
    }
}
