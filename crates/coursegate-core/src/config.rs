//! ============================================================================
//! Gate Configuration - RPC endpoint, staleness bound and retry policy
//! ============================================================================
//! Defaults are usable as-is; every field can be overridden from the
//! environment (the CLI loads a `.env` file first).
//! ============================================================================

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::access::{EvaluationMode, RetryConfig, DEFAULT_RPC_TIMEOUT_MS, DEFAULT_STALENESS_SECS};

pub const ENV_RPC_URL: &str = "COURSEGATE_RPC_URL";
pub const ENV_RPC_TIMEOUT_MS: &str = "COURSEGATE_RPC_TIMEOUT_MS";
pub const ENV_STALENESS_SECS: &str = "COURSEGATE_STALENESS_SECS";
pub const ENV_MAX_RETRIES: &str = "COURSEGATE_MAX_RETRIES";
pub const ENV_DB_PATH: &str = "COURSEGATE_DB_PATH";
pub const ENV_CONCURRENT_EITHER: &str = "COURSEGATE_CONCURRENT_EITHER";

/// Public Ethereum mainnet endpoint used when none is configured
pub const DEFAULT_RPC_URL: &str = "https://cloudflare-eth.com";

/// Access gate configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Chain JSON-RPC endpoint
    pub rpc_url: String,
    /// Bound on a single chain call
    pub rpc_timeout_ms: u64,
    /// Cached balances older than this are refetched
    pub staleness_secs: i64,
    pub retry: RetryConfig,
    /// Persistent snapshot store; in-memory cache only when unset
    pub db_path: Option<String>,
    /// Query EITHER options concurrently instead of one by one
    pub concurrent_either: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            staleness_secs: DEFAULT_STALENESS_SECS,
            retry: RetryConfig::default(),
            db_path: None,
            concurrent_either: false,
        }
    }
}

impl GateConfig {
    /// Defaults overridden by COURSEGATE_* environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = get(ENV_RPC_URL) {
            config.rpc_url = url;
        }
        if let Some(raw) = get(ENV_RPC_TIMEOUT_MS) {
            config.rpc_timeout_ms = parse_var(ENV_RPC_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_STALENESS_SECS) {
            config.staleness_secs = parse_var(ENV_STALENESS_SECS, &raw)?;
            if config.staleness_secs < 0 {
                return Err(anyhow!("{} must be non-negative, got {}", ENV_STALENESS_SECS, raw));
            }
        }
        if let Some(raw) = get(ENV_MAX_RETRIES) {
            let retries: u32 = parse_var(ENV_MAX_RETRIES, &raw)?;
            config.retry.max_attempts = retries.saturating_add(1);
        }
        if let Some(path) = get(ENV_DB_PATH) {
            config.db_path = Some(path);
        }
        if let Some(raw) = get(ENV_CONCURRENT_EITHER) {
            config.concurrent_either = parse_bool(ENV_CONCURRENT_EITHER, &raw)?;
        }

        Ok(config)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn evaluation_mode(&self) -> EvaluationMode {
        if self.concurrent_either {
            EvaluationMode::Concurrent
        } else {
            EvaluationMode::Sequential
        }
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| anyhow!("Invalid value '{}' for {}: {}", raw, key, e))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("Invalid boolean '{}' for {}", raw, key)),
    }
}
