use std::{path::PathBuf, time::Duration};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Tunables for duplicate detection, sessions and artifact cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_max_entries: Option<usize>,
    #[serde(default = "Config::default_session_timeout_seconds")]
    pub session_timeout_seconds: u64,
    #[serde(default = "Config::default_slow_query_threshold_ms")]
    pub slow_query_threshold_ms: u64,
    /// Amounts closer than this are considered equal.
    #[serde(default = "Config::default_amount_tolerance")]
    pub amount_tolerance: Decimal,
    #[serde(default = "Config::default_lookback_years")]
    pub lookback_years: u32,
    #[serde(default = "Config::default_audit_retention_days")]
    pub audit_retention_days: u32,

    /// Managed storage for ledgers, the decision log and uploads. Defaults to
    /// `<base>/storage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,
    #[serde(default = "Config::default_ledger_table")]
    pub ledger_table: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_api_base_url: Option<String>,
    #[serde(default)]
    pub owned_artifact_hosts: Vec<String>,
    #[serde(default = "Config::default_cleanup_max_attempts")]
    pub cleanup_max_attempts: u32,
    #[serde(default = "Config::default_cleanup_backoff_ms")]
    pub cleanup_backoff_ms: u64,
    #[serde(default = "Config::default_artifact_api_timeout_seconds")]
    pub artifact_api_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: Self::default_cache_ttl_seconds(),
            cache_max_entries: None,
            session_timeout_seconds: Self::default_session_timeout_seconds(),
            slow_query_threshold_ms: Self::default_slow_query_threshold_ms(),
            amount_tolerance: Self::default_amount_tolerance(),
            lookback_years: Self::default_lookback_years(),
            audit_retention_days: Self::default_audit_retention_days(),
            storage_root: None,
            ledger_table: Self::default_ledger_table(),
            artifact_api_base_url: None,
            owned_artifact_hosts: Vec::new(),
            cleanup_max_attempts: Self::default_cleanup_max_attempts(),
            cleanup_backoff_ms: Self::default_cleanup_backoff_ms(),
            artifact_api_timeout_seconds: Self::default_artifact_api_timeout_seconds(),
        }
    }
}

impl Config {
    pub fn default_cache_ttl_seconds() -> u64 {
        300
    }

    pub fn default_session_timeout_seconds() -> u64 {
        300
    }

    pub fn default_slow_query_threshold_ms() -> u64 {
        2_000
    }

    pub fn default_amount_tolerance() -> Decimal {
        Decimal::new(1, 2)
    }

    pub fn default_lookback_years() -> u32 {
        2
    }

    pub fn default_audit_retention_days() -> u32 {
        730
    }

    pub fn default_ledger_table() -> String {
        "ledger".into()
    }

    pub fn default_cleanup_max_attempts() -> u32 {
        2
    }

    pub fn default_cleanup_backoff_ms() -> u64 {
        250
    }

    pub fn default_artifact_api_timeout_seconds() -> u64 {
        10
    }

    pub fn resolve_storage_root(&self, base: &std::path::Path) -> PathBuf {
        match &self.storage_root {
            Some(path) => path.clone(),
            None => base.join("storage"),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }

    pub fn cleanup_backoff(&self) -> Duration {
        Duration::from_millis(self.cleanup_backoff_ms)
    }

    pub fn artifact_api_timeout(&self) -> Duration {
        Duration::from_secs(self.artifact_api_timeout_seconds)
    }

    /// Hosts owned by this system, including the artifact API's own host.
    pub fn owned_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .owned_artifact_hosts
            .iter()
            .map(|host| host.trim().to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        if let Some(host) = self.artifact_api_base_url.as_deref().and_then(url_host) {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
        hosts
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.amount_tolerance <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "amount_tolerance must be positive (got {})",
                self.amount_tolerance
            )));
        }
        if self.ledger_table.trim().is_empty() {
            return Err(ConfigError::Invalid("ledger_table must not be empty".into()));
        }
        if !self
            .ledger_table
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ConfigError::Invalid(
                "ledger_table may only contain lowercase letters, digits and underscores".into(),
            ));
        }
        if self.cache_ttl_seconds == 0 {
            return Err(ConfigError::Invalid("cache_ttl_seconds must be at least 1".into()));
        }
        if self.session_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "session_timeout_seconds must be at least 1".into(),
            ));
        }
        if self.cache_max_entries == Some(0) {
            return Err(ConfigError::Invalid("cache_max_entries must be at least 1".into()));
        }
        if let Some(url) = &self.artifact_api_base_url {
            if url_host(url).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "artifact_api_base_url `{url}` is not an http(s) URL"
                )));
            }
        }
        Ok(())
    }
}

fn url_host(url: &str) -> Option<String> {
    let (scheme, rest) = url.trim().split_once("://")?;
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return None;
    }
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}
