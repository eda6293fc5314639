//! Registry configuration
//!
//! Defaults are layered in this order: built-in defaults, an optional TOML
//! document, then `MLVAULT_*` environment variables.
//!
//! ```rust
//! use mlvault::config::RegistryConfig;
//!
//! let config = RegistryConfig::from_toml_str(r#"
//!     bucket = "team-a"
//!
//!     [tracking]
//!     max_buffer = 50
//! "#)?;
//! assert_eq!(config.bucket, "team-a");
//! assert_eq!(config.tracking.max_buffer, 50);
//! # Ok::<(), mlvault::Error>(())
//! ```

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration owned by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Bucket every store of this registry writes into.
    pub bucket: String,
    /// User id stamped onto tracking events.
    pub userid: String,
    /// Node name stamped onto tracking events.
    pub node: String,
    /// Store prefixes whose objects are versioned on every put.
    pub versioned_prefixes: Vec<String>,
    /// Tracking provider settings.
    pub tracking: TrackingConfig,
    /// Statistics engine defaults.
    pub stats: StatsOptions,
}

/// Tracking provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Buffered events before a bulk write is forced.
    pub max_buffer: usize,
    /// Profiler sampling interval in milliseconds.
    pub profile_interval_ms: u64,
    /// System metrics the profiler collects (`cpu`, `memory`, `disk`).
    pub profile_metrics: Vec<String>,
}

/// Defaults for the statistics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsOptions {
    /// Percentiles reported by every summary, in `[0, 1]`.
    pub percentiles: Vec<f64>,
    /// Throughput unit in seconds (60 = events per minute).
    pub tp_unit: f64,
    /// Events bracketing a run for latency calculations.
    pub time_events: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bucket: "default".to_string(),
            userid: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            node: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            versioned_prefixes: vec!["models/".to_string()],
            tracking: TrackingConfig::default(),
            stats: StatsOptions::default(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_buffer: 10,
            profile_interval_ms: 10_000,
            profile_metrics: vec!["cpu".into(), "memory".into(), "disk".into()],
        }
    }
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            percentiles: vec![0.25, 0.5, 0.75],
            tp_unit: 60.0,
            time_events: vec!["start".into(), "stop".into()],
        }
    }
}

impl RegistryConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the document is not valid TOML or has
    /// mistyped values.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `MLVAULT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup (the environment in production).
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a numeric variable does not parse.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bucket) = lookup("MLVAULT_BUCKET") {
            self.bucket = bucket;
        }
        if let Some(userid) = lookup("MLVAULT_USERID") {
            self.userid = userid;
        }
        if let Some(node) = lookup("MLVAULT_NODE") {
            self.node = node;
        }
        if let Some(raw) = lookup("MLVAULT_MAX_BUFFER") {
            self.tracking.max_buffer = raw
                .parse()
                .map_err(|e| Error::Config(format!("MLVAULT_MAX_BUFFER={raw}: {e}")))?;
        }
        if let Some(raw) = lookup("MLVAULT_PROFILE_INTERVAL_MS") {
            self.tracking.profile_interval_ms = raw
                .parse()
                .map_err(|e| Error::Config(format!("MLVAULT_PROFILE_INTERVAL_MS={raw}: {e}")))?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(Error::Config("bucket must not be empty".to_string()));
        }
        if self.tracking.profile_interval_ms == 0 {
            return Err(Error::Config("profile_interval_ms must be positive".to_string()));
        }
        if let Some(p) = self
            .stats
            .percentiles
            .iter()
            .find(|p| !(0.0..=1.0).contains(*p))
        {
            return Err(Error::Config(format!("percentile {p} outside [0, 1]")));
        }
        if self.stats.tp_unit <= 0.0 {
            return Err(Error::Config("tp_unit must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.bucket, "default");
        assert_eq!(config.tracking.max_buffer, 10);
        assert_eq!(config.stats.percentiles, vec![0.25, 0.5, 0.75]);
        assert_eq!(config.versioned_prefixes, vec!["models/".to_string()]);
    }

    #[test]
    fn test_toml_partial_override() {
        let config = RegistryConfig::from_toml_str(
            r#"
            bucket = "research"
            [stats]
            tp_unit = 3600.0
            "#,
        )
        .unwrap();
        assert_eq!(config.bucket, "research");
        assert!((config.stats.tp_unit - 3600.0).abs() < f64::EPSILON);
        assert_eq!(config.tracking, TrackingConfig::default());
    }

    #[test]
    fn test_toml_rejects_bad_percentile() {
        let err = RegistryConfig::from_toml_str("[stats]\npercentiles = [1.5]").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> =
            HashMap::from([("MLVAULT_BUCKET", "ci"), ("MLVAULT_MAX_BUFFER", "3")]);
        let config = RegistryConfig::default()
            .with_env_overrides(|k| vars.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.bucket, "ci");
        assert_eq!(config.tracking.max_buffer, 3);
    }

    #[test]
    fn test_env_override_parse_failure() {
        let err = RegistryConfig::default()
            .with_env_overrides(|k| (k == "MLVAULT_MAX_BUFFER").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MLVAULT_MAX_BUFFER"));
    }
}
