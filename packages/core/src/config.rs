//! Core Configuration
//!
//! Defaults suit tests and the dev tools; `CoreConfig::from_env` lets a host
//! override them:
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `DOCUTREE_QUEUE_CAPACITY` | `normalization.queue_capacity` | 64 |
//! | `DOCUTREE_NORMALIZE_RETRIES` | `normalization.max_retries` | 3 |
//! | `DOCUTREE_RETRY_BACKOFF_MS` | `normalization.retry_backoff_ms` | 10 |
//! | `DOCUTREE_SNAPSHOT_PATH` | `snapshot_path` | unset |
//!
//! Unparsable values fall back to the default.

use crate::models::SearchConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const QUEUE_CAPACITY_VAR: &str = "DOCUTREE_QUEUE_CAPACITY";
pub const NORMALIZE_RETRIES_VAR: &str = "DOCUTREE_NORMALIZE_RETRIES";
pub const RETRY_BACKOFF_VAR: &str = "DOCUTREE_RETRY_BACKOFF_MS";
pub const SNAPSHOT_PATH_VAR: &str = "DOCUTREE_SNAPSHOT_PATH";

/// Configuration for the background normalization processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationConfig {
    /// Pending jobs held before new submissions are dropped (default: 64)
    pub queue_capacity: usize,
    /// Retry attempts after a retryable failure (default: 3)
    pub max_retries: usize,
    /// Base delay of the exponential retry backoff (default: 10ms)
    pub retry_backoff_ms: u64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_retries: 3,
            retry_backoff_ms: 10,
        }
    }
}

impl NormalizationConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Top-level configuration of the core services
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreConfig {
    pub normalization: NormalizationConfig,
    pub search: SearchConfig,
    /// Where the dev tools persist a JSON snapshot of the store, if anywhere
    pub snapshot_path: Option<PathBuf>,
}

impl CoreConfig {
    /// Defaults overridden by `DOCUTREE_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = NormalizationConfig::default();
        let normalization = NormalizationConfig {
            queue_capacity: parse_or(&lookup, QUEUE_CAPACITY_VAR, defaults.queue_capacity),
            max_retries: parse_or(&lookup, NORMALIZE_RETRIES_VAR, defaults.max_retries),
            retry_backoff_ms: parse_or(&lookup, RETRY_BACKOFF_VAR, defaults.retry_backoff_ms),
        };

        let snapshot_path = lookup(SNAPSHOT_PATH_VAR)
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Self {
            normalization,
            search: SearchConfig::default(),
            snapshot_path,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.normalization.queue_capacity, 64);
        assert_eq!(config.normalization.max_retries, 3);
        assert_eq!(config.normalization.retry_backoff(), Duration::from_millis(10));
        assert!(config.snapshot_path.is_none());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = CoreConfig::from_lookup(lookup_from(&[
            (QUEUE_CAPACITY_VAR, "8"),
            (NORMALIZE_RETRIES_VAR, " 5 "),
            (SNAPSHOT_PATH_VAR, "/tmp/docutree.json"),
        ]));
        assert_eq!(config.normalization.queue_capacity, 8);
        assert_eq!(config.normalization.max_retries, 5);
        assert_eq!(config.normalization.retry_backoff_ms, 10);
        assert_eq!(config.snapshot_path, Some(PathBuf::from("/tmp/docutree.json")));
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = CoreConfig::from_lookup(lookup_from(&[
            (QUEUE_CAPACITY_VAR, "lots"),
            (RETRY_BACKOFF_VAR, "-1"),
            (SNAPSHOT_PATH_VAR, "  "),
        ]));
        assert_eq!(config.normalization, NormalizationConfig::default());
        assert!(config.snapshot_path.is_none());
    }
}
