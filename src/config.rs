use std::{str::FromStr, time::Duration};

use crate::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    /// Private in-memory database on a single connection. Used by tests.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_owned(),
            max_connections: 1,
            busy_timeout: Duration::from_millis(500),
            acquire_timeout: Duration::from_secs(5),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database: DatabaseConfig,
    /// Attempts for a store call that hits a busy database.
    pub store_retry_attempts: u32,
    pub page_limit_default: u32,
    pub page_limit_max: u32,
    pub push_webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_owned(),
            database: DatabaseConfig {
                url: "sqlite://parley.db".to_owned(),
                max_connections: 16,
                busy_timeout: Duration::from_millis(2000),
                acquire_timeout: Duration::from_secs(3),
            },
            store_retry_attempts: 3,
            page_limit_default: 50,
            page_limit_max: 200,
            push_webhook_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();
        let defaults = Config::default();

        Ok(Config {
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database: DatabaseConfig {
                url: dotenv::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parsed("DATABASE_MAX_CONNECTIONS")?
                    .unwrap_or(defaults.database.max_connections),
                busy_timeout: parsed("DATABASE_BUSY_TIMEOUT_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.database.busy_timeout),
                acquire_timeout: parsed("DATABASE_ACQUIRE_TIMEOUT_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.database.acquire_timeout),
            },
            store_retry_attempts: parsed("STORE_RETRY_ATTEMPTS")?
                .unwrap_or(defaults.store_retry_attempts),
            page_limit_default: parsed("PAGE_LIMIT_DEFAULT")?
                .unwrap_or(defaults.page_limit_default),
            page_limit_max: parsed("PAGE_LIMIT_MAX")?.unwrap_or(defaults.page_limit_max),
            push_webhook_url: dotenv::var("PUSH_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        })
    }
}

fn parsed<T: FromStr>(key: &str) -> AppResult<Option<T>> {
    match dotenv::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{key} has invalid value {raw:?}"))),
        Err(_) => Ok(None),
    }
}
