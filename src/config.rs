use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

const DEFAULT_DATABASE_URL: &str = "sqlite://classroom.db?mode=rwc";
const DEFAULT_BLOB_ROOT: &str = "media";
const DEFAULT_BLOB_BASE_URL: &str = "http://localhost:8000/api/0/media";
const DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Settings read once at start-up and handed to each component.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub profile: String,
    pub database_url: String,
    pub blob_root: PathBuf,
    pub blob_base_url: String,
    /// `None` disables the background orphan blob sweep.
    pub orphan_sweep_interval: Option<Duration>,
    pub honeycomb_api_key: Option<String>,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let sweep_secs = match std::env::var("ORPHAN_SWEEP_INTERVAL_SECS") {
            Ok(raw) if !raw.is_empty() => raw.trim().parse::<u64>().with_context(|| {
                format!(
                    "ORPHAN_SWEEP_INTERVAL_SECS must be a whole number of seconds (got '{}')",
                    raw
                )
            })?,
            _ => DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS,
        };

        Ok(Self {
            profile: var_or("APP_PROFILE", "development"),
            database_url: var_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            blob_root: PathBuf::from(var_or("BLOB_ROOT", DEFAULT_BLOB_ROOT)),
            blob_base_url: var_or("BLOB_BASE_URL", DEFAULT_BLOB_BASE_URL),
            orphan_sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            honeycomb_api_key: std::env::var("HONEYCOMB_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.profile == "production"
    }
}
