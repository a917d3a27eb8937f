use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Required unless running with `--dry-run`.
    pub db_url: Option<String>,
    pub discovery_url: String,
    pub boundary_url: String,
    pub work_dir: PathBuf,
    pub code_tables_path: PathBuf,
    pub http_timeout: Duration,
    pub db_max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let http_timeout_secs = match lookup("HTTP_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("HTTP_TIMEOUT_SECS is not a number: {}", raw))?,
            None => 120,
        };
        let db_max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("DB_MAX_CONNECTIONS is not a number: {}", raw))?,
            None => 5,
        };

        Ok(Self {
            db_url: lookup("DB_URL").filter(|v| !v.trim().is_empty()),
            discovery_url: lookup("FEED_DISCOVERY_URL")
                .unwrap_or_else(|| collector::DEFAULT_DISCOVERY_URL.to_string()),
            boundary_url: lookup("BOUNDARY_URL")
                .unwrap_or_else(|| collector::DEFAULT_BOUNDARY_URL.to_string()),
            work_dir: PathBuf::from(
                lookup("WORK_DIR").unwrap_or_else(|| "./data/work".to_string()),
            ),
            code_tables_path: PathBuf::from(
                lookup("CODE_TABLES_PATH").unwrap_or_else(|| "config/code_tables.json".to_string()),
            ),
            http_timeout: Duration::from_secs(http_timeout_secs),
            db_max_connections,
        })
    }

    pub fn require_db_url(&self) -> Result<&str> {
        self.db_url
            .as_deref()
            .context("DB_URL env var missing (use --dry-run to skip persistence)")
    }
}
