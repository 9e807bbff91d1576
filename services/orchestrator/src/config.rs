//! Configuration for the orchestrator.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nodeshare_reconcile::{DEFAULT_MAINTENANCE_INTERVAL, DEFAULT_RECONCILE_INTERVAL};

use crate::repo::DEFAULT_FETCH_TIMEOUT;

/// Environment variable holding the config repository location.
pub const CONFIG_REPO_ENV: &str = "NODESHARE_CONFIG_REPO";

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address for the protocol endpoints.
    pub listen_addr: SocketAddr,

    /// Config repository URL or local path. `None` leaves the pool inactive.
    pub config_repo: Option<String>,

    /// Interval between reconciliation passes.
    pub reconcile_interval: Duration,

    /// Interval between reservation maintenance cycles.
    pub maintenance_interval: Duration,

    /// Longest a repository clone may take.
    pub fetch_timeout: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("NODESHARE_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let config_repo = std::env::var(CONFIG_REPO_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let reconcile_interval = period(
            "NODESHARE_RECONCILE_INTERVAL",
            std::env::var("NODESHARE_RECONCILE_INTERVAL").ok(),
            Duration::from_secs,
            DEFAULT_RECONCILE_INTERVAL,
        )?;

        let maintenance_interval = period(
            "NODESHARE_MATCH_INTERVAL",
            std::env::var("NODESHARE_MATCH_INTERVAL").ok(),
            Duration::from_millis,
            DEFAULT_MAINTENANCE_INTERVAL,
        )?;

        let fetch_timeout = period(
            "NODESHARE_FETCH_TIMEOUT",
            std::env::var("NODESHARE_FETCH_TIMEOUT").ok(),
            Duration::from_secs,
            DEFAULT_FETCH_TIMEOUT,
        )?;

        let log_level =
            std::env::var("NODESHARE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            config_repo,
            reconcile_interval,
            maintenance_interval,
            fetch_timeout,
            log_level,
        })
    }
}

/// Parse a positive period from `raw`, falling back to `default` when unset.
/// Zero is rejected: a worker ticking every zero seconds never yields.
fn period(
    key: &str,
    raw: Option<String>,
    unit: fn(u64) -> Duration,
    default: Duration,
) -> Result<Duration> {
    let Some(raw) = raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(default);
    };
    let value: u64 = raw
        .parse()
        .with_context(|| format!("{key} must be a whole number, got '{raw}'"))?;
    if value == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(unit(value))
}
