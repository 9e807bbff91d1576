//! Configuration for a client party.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use nodeshare_id::PartyName;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for reading a response.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between workload reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Client party configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Config repository URL shared with the orchestrator.
    pub config_repo: String,

    /// Orchestrator base URL.
    pub orchestrator_url: String,

    /// Name this party is declared under in the config repository.
    pub party_name: PartyName,

    pub connect_timeout: Duration,

    pub read_timeout: Duration,

    pub report_interval: Duration,
}

impl Config {
    pub fn new(
        config_repo: impl Into<String>,
        orchestrator_url: impl Into<String>,
        party_name: PartyName,
    ) -> Self {
        Self {
            config_repo: config_repo.into(),
            orchestrator_url: orchestrator_url.into(),
            party_name,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let config_repo = required("NODESHARE_CONFIG_REPO")?;
        let orchestrator_url = required("NODESHARE_ORCHESTRATOR_URL")?;
        let party_name = PartyName::parse(&required("NODESHARE_PARTY_NAME")?)
            .context("NODESHARE_PARTY_NAME is not a valid party name")?;

        let secs =
            |key: &str, default: Duration| seconds(key, std::env::var(key).ok(), default);

        Ok(Self {
            config_repo,
            orchestrator_url,
            party_name,
            connect_timeout: secs("NODESHARE_CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT)?,
            read_timeout: secs("NODESHARE_READ_TIMEOUT", DEFAULT_READ_TIMEOUT)?,
            report_interval: secs("NODESHARE_REPORT_INTERVAL", DEFAULT_REPORT_INTERVAL)?,
        })
    }
}

/// A positive number of seconds, or `default` when unset.
fn seconds(key: &str, raw: Option<String>, default: Duration) -> Result<Duration> {
    let Some(raw) = raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(default);
    };
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("{key} must be a number of seconds, got '{raw}'"))?;
    if secs == 0 {
        bail!("{key} must be at least one second");
    }
    Ok(Duration::from_secs(secs))
}

fn required(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .with_context(|| format!("{key} must be set"))
}
