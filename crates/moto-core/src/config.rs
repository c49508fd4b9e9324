use std::collections::HashSet;
use std::time::Duration;

use url::Url;

use crate::error::AppError;
use crate::models::OperatorId;
use crate::retry::RetryPolicy;

/// Settings for the ingestion pipeline and the operator bot.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    /// Origin used to absolutise relative image paths.
    pub vendor_origin: String,
    /// Hosts whose pages the bot accepts as listing sources.
    pub vendor_hosts: Vec<String>,
    pub currency: String,
    /// Limit on the arrival-date reply, in characters.
    pub max_arrival_date_len: usize,
    pub fetch_timeout: Duration,
    pub image_timeout: Duration,
    pub retry: RetryPolicy,
    /// Operators allowed to add listings.
    pub admin_ids: HashSet<OperatorId>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            vendor_origin: "https://jmmoto.ru".into(),
            vendor_hosts: vec!["jmmoto.ru".into(), "www.jmmoto.ru".into()],
            currency: "RUB".into(),
            max_arrival_date_len: 200,
            fetch_timeout: Duration::from_secs(30),
            image_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            admin_ids: HashSet::new(),
        }
    }
}

impl IngestConfig {
    /// Read configuration from environment variables.
    ///
    /// - `MOTO_VENDOR_ORIGIN` (defaults to `https://jmmoto.ru`)
    /// - `MOTO_VENDOR_HOSTS` (comma separated, defaults to `jmmoto.ru,www.jmmoto.ru`)
    /// - `MOTO_CURRENCY` (defaults to `RUB`)
    /// - `MOTO_FETCH_TIMEOUT_SECS` (defaults to 30)
    /// - `MOTO_IMAGE_TIMEOUT_SECS` (defaults to 60)
    /// - `MOTO_FETCH_RETRIES` (total attempts, defaults to 3)
    /// - `MOTO_ADMIN_IDS` (comma separated operator ids)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = Self::default();

        if let Some(origin) = lookup("MOTO_VENDOR_ORIGIN") {
            let parsed = Url::parse(&origin).map_err(|e| {
                AppError::ConfigError(format!("Invalid MOTO_VENDOR_ORIGIN '{origin}': {e}"))
            })?;
            config.vendor_origin = parsed.origin().ascii_serialization();
        }
        if let Some(hosts) = lookup("MOTO_VENDOR_HOSTS") {
            config.vendor_hosts = split_list(&hosts)
                .map(|h| h.to_ascii_lowercase())
                .collect();
            if config.vendor_hosts.is_empty() {
                return Err(AppError::ConfigError(
                    "MOTO_VENDOR_HOSTS must name at least one host".into(),
                ));
            }
        }
        if let Some(currency) = lookup("MOTO_CURRENCY") {
            config.currency = currency.trim().to_uppercase();
        }
        if let Some(secs) = positive(&lookup, "MOTO_FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = positive(&lookup, "MOTO_IMAGE_TIMEOUT_SECS")? {
            config.image_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = positive(&lookup, "MOTO_FETCH_RETRIES")? {
            config.retry.max_attempts = u32::try_from(attempts).map_err(|_| {
                AppError::ConfigError(format!("MOTO_FETCH_RETRIES too large: {attempts}"))
            })?;
        }
        if let Some(ids) = lookup("MOTO_ADMIN_IDS") {
            config.admin_ids = split_list(&ids)
                .map(|id| {
                    id.parse::<i64>().map(OperatorId).map_err(|_| {
                        AppError::ConfigError(format!(
                            "Invalid MOTO_ADMIN_IDS entry '{id}': must be an integer"
                        ))
                    })
                })
                .collect::<Result<_, _>>()?;
        }

        Ok(config)
    }

    pub fn is_admin(&self, operator: OperatorId) -> bool {
        self.admin_ids.contains(&operator)
    }

    /// Whether `url` is an http(s) link to one of the vendor hosts.
    pub fn is_vendor_url(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && url.host_str().is_some_and(|host| {
                self.vendor_hosts
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(host))
            })
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>, AppError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(AppError::ConfigError(format!(
            "Invalid {key} '{raw}': must be a positive integer"
        ))),
        Ok(value) => Ok(Some(value)),
    }
}
