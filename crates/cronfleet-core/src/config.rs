use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// How long a `Running` job may go without a heartbeat before any
/// instance may reclaim it. All instances sharing a store must agree.
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 180;
/// Heartbeat cadence for claimed jobs — must stay well below the lease timeout.
pub const DEFAULT_RENEW_INTERVAL_SECS: u64 = 60;
/// Per-process ceiling on concurrently executing jobs.
pub const DEFAULT_MAX_CONCURRENT: usize = 200;
/// Budget for a single claim call against the store.
pub const DEFAULT_CLAIM_TIMEOUT_MS: u64 = 1_000;
/// Sleep between polls when no job is eligible.
pub const DEFAULT_IDLE_BACKOFF_MS: u64 = 500;

/// Top-level config (cronfleet.toml + CRONFLEET_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CronfleetConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Job names the daemon serves with its built-in shell runner: each
    /// listed name gets a local function executing the job's config
    /// payload as `sh -c <payload>`. Embedders register their own
    /// functions instead.
    #[serde(default)]
    pub shell_tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduler tunables. Reference values follow the module constants;
/// override per deployment via the `[scheduler]` TOML table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    #[serde(default = "default_renew_interval_secs")]
    pub renew_interval_secs: u64,
    #[serde(default = "default_claim_timeout_ms")]
    pub claim_timeout_ms: u64,
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            lease_timeout_secs: DEFAULT_LEASE_TIMEOUT_SECS,
            renew_interval_secs: DEFAULT_RENEW_INTERVAL_SECS,
            claim_timeout_ms: DEFAULT_CLAIM_TIMEOUT_MS,
            idle_backoff_ms: DEFAULT_IDLE_BACKOFF_MS,
        }
    }
}

impl CronfleetConfig {
    /// Load config, trying in order:
    ///   1. explicit `config_path` argument
    ///   2. ~/.cronfleet/cronfleet.toml
    /// Env vars prefixed CRONFLEET_ override file values either way.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CronfleetConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONFLEET_").split("_"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        if config.scheduler.renew_interval_secs >= config.scheduler.lease_timeout_secs {
            return Err(CoreError::Config(format!(
                "renew_interval_secs ({}) must be below lease_timeout_secs ({})",
                config.scheduler.renew_interval_secs, config.scheduler.lease_timeout_secs
            )));
        }
        if config.scheduler.max_concurrent == 0 {
            return Err(CoreError::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronfleet/cronfleet.toml", home)
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronfleet/cronfleet.db", home)
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_lease_timeout_secs() -> u64 {
    DEFAULT_LEASE_TIMEOUT_SECS
}

fn default_renew_interval_secs() -> u64 {
    DEFAULT_RENEW_INTERVAL_SECS
}

fn default_claim_timeout_ms() -> u64 {
    DEFAULT_CLAIM_TIMEOUT_MS
}

fn default_idle_backoff_ms() -> u64 {
    DEFAULT_IDLE_BACKOFF_MS
}
