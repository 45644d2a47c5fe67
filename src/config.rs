//! Service configuration, read from the environment (and `.env` via dotenvy).

use std::time::Duration;

use anyhow::Context;

/// Runtime configuration for the sync service.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL (`sqlite://path.db` or `sqlite::memory:`)
    pub database_url: String,
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Externally reachable base URL, used to build webhook URLs for merchants
    pub public_base_url: String,
    /// Tenant used when a request carries no `X-Tenant-Id` header
    pub default_tenant: String,
    /// Timeout applied to every outbound platform request
    pub platform_http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://order_channel_sync.db".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            public_base_url: "http://localhost:3000".to_string(),
            default_tenant: "default".to_string(),
            platform_http_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let timeout_secs = match std::env::var("PLATFORM_HTTP_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("PLATFORM_HTTP_TIMEOUT_SECS is not a number: {raw}"))?,
            Err(_) => defaults.platform_http_timeout.as_secs(),
        };
        if timeout_secs == 0 {
            anyhow::bail!("PLATFORM_HTTP_TIMEOUT_SECS must be at least 1");
        }

        Ok(Self {
            database_url: env_or("DATABASE_URL", defaults.database_url),
            bind_addr: env_or("BIND_ADDR", defaults.bind_addr),
            public_base_url: env_or("PUBLIC_BASE_URL", defaults.public_base_url)
                .trim_end_matches('/')
                .to_string(),
            default_tenant: env_or("DEFAULT_TENANT", defaults.default_tenant),
            platform_http_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn env_or(name: &str, fallback: String) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(fallback)
}
