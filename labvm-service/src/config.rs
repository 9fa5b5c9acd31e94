use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Name of the cloud control plane. Required; there is no safe default.
    pub provider: String,

    #[serde(default = "default_location")]
    pub location: String,

    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    #[serde(default)]
    pub profile_overrides: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let provider = std::env::var("LABVM_PROVIDER")
            .context("LABVM_PROVIDER must be set; the daemon has no default control plane")?;

        Ok(Self {
            db_path: default_db_path(),
            provider,
            location: default_location(),
            ttl_secs: default_ttl_secs(),
            max_concurrency: default_max_concurrency(),
            reaper_interval_secs: default_reaper_interval(),
            profile_overrides: std::env::var("LABVM_PROFILE_OVERRIDES")
                .ok()
                .map(PathBuf::from),
        })
    }
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("LABVM_DB_PATH") {
        return PathBuf::from(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".labvm").join("labvm.db")
}

fn default_location() -> String {
    std::env::var("LABVM_LOCATION").unwrap_or_else(|_| "southeastasia".to_string())
}

fn default_ttl_secs() -> i64 {
    std::env::var("LABVM_TTL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3 * 60 * 60) // 3 hours
}

fn default_max_concurrency() -> usize {
    std::env::var("LABVM_MAX_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(4)
}

fn default_reaper_interval() -> u64 {
    std::env::var("LABVM_REAPER_INTERVAL")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60) // 1 minute
}
