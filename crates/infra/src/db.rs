//! Postgres connection pool wiring.

use std::time::Duration;

use serde::Deserialize;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database url is empty")]
    MissingUrl,

    #[error("failed to connect to database: {0}")]
    Connect(#[from] sqlx::Error),
}

/// Pool settings, usually the `[database]` section of the worker config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

impl DatabaseSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }

    fn options(&self) -> Result<PgPoolOptions, DbError> {
        if self.url.trim().is_empty() {
            return Err(DbError::MissingUrl);
        }
        Ok(PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs)))
    }

    /// Open the pool and verify one connection.
    pub async fn connect(&self) -> Result<PgPool, DbError> {
        let pool = self.options()?.connect(&self.url).await?;
        info!(max_connections = self.max_connections, "database pool ready");
        Ok(pool)
    }

    /// Build the pool without connecting; connections open on first use.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect_lazy(&self) -> Result<PgPool, DbError> {
        Ok(self.options()?.connect_lazy(&self.url)?)
    }
}
