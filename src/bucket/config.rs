//! Configuration for bucket setup
//!
//! One [`BucketConfig`] drives the decorator stack built by the
//! [`BucketManager`](super::BucketManager) and the staging-object lifecycle.
//! It deserializes from TOML; every field has a default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for one mounted bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Project billed for requester-pays buckets (empty for none)
    pub billing_project: String,
    /// Restrict the bucket to this directory (empty for the whole bucket)
    pub only_dir: String,
    /// Read+write byte rate limit; zero means unlimited
    pub egress_bandwidth_limit_bytes_per_second: f64,
    /// Operation rate limit; zero means unlimited
    pub op_rate_limit_hz: f64,
    pub stat_cache_capacity: usize,
    #[serde(with = "duration_millis")]
    pub stat_cache_ttl: Duration,
    pub enable_monitoring: bool,
    /// Log every bucket request at debug level
    pub debug_gcs: bool,
    /// Objects smaller than this are always rewritten in full
    pub append_threshold: u64,
    pub tmp_object_prefix: String,
    #[serde(with = "duration_millis")]
    pub gc_interval: Duration,
    /// Age after which a staging object is considered orphaned
    #[serde(with = "duration_millis")]
    pub tmp_object_grace_period: Duration,
}

impl Default for BucketConfig {
    fn default() -> Self {
        BucketConfig {
            billing_project: String::new(),
            only_dir: String::new(),
            egress_bandwidth_limit_bytes_per_second: 0.0,
            op_rate_limit_hz: 0.0,
            stat_cache_capacity: 4096,
            stat_cache_ttl: Duration::from_secs(60),
            enable_monitoring: false,
            debug_gcs: false,
            append_threshold: 2 * 1024 * 1024, // 2MB
            tmp_object_prefix: ".gcsfuse_tmp/".to_string(),
            gc_interval: Duration::from_secs(10 * 60),
            tmp_object_grace_period: Duration::from_secs(30 * 60),
        }
    }
}

impl BucketConfig {
    /// Configuration for tests (no limits, small cache, append everything)
    pub fn test() -> Self {
        BucketConfig {
            stat_cache_capacity: 64,
            stat_cache_ttl: Duration::from_secs(1),
            append_threshold: 0,
            gc_interval: Duration::from_millis(100),
            tmp_object_grace_period: Duration::from_millis(500),
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: BucketConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            (
                "egress_bandwidth_limit_bytes_per_second",
                self.egress_bandwidth_limit_bytes_per_second,
            ),
            ("op_rate_limit_hz", self.op_rate_limit_hz),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.tmp_object_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "tmp_object_prefix must not be empty".to_string(),
            ));
        }
        if self.gc_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "gc_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the stat cache decorator is enabled
    pub fn stat_cache_enabled(&self) -> bool {
        !self.stat_cache_ttl.is_zero() && self.stat_cache_capacity > 0
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BucketConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.stat_cache_enabled());
        assert_eq!(config.tmp_object_prefix, ".gcsfuse_tmp/");
        assert_eq!(config.gc_interval, Duration::from_secs(600));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BucketConfig::from_toml_str(
            r#"
            only_dir = "logs"
            op_rate_limit_hz = 50.0
            stat_cache_ttl = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.only_dir, "logs");
        assert_eq!(config.op_rate_limit_hz, 50.0);
        assert!(!config.stat_cache_enabled());
        assert_eq!(config.append_threshold, BucketConfig::default().append_threshold);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = BucketConfig::test();
        let text = toml::to_string(&config).unwrap();
        let parsed = BucketConfig::from_toml_str(&text).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_json_serialization() {
        let config = BucketConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BucketConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.stat_cache_ttl, parsed.stat_cache_ttl);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            BucketConfig {
                op_rate_limit_hz: -1.0,
                ..BucketConfig::default()
            },
            BucketConfig {
                egress_bandwidth_limit_bytes_per_second: f64::NAN,
                ..BucketConfig::default()
            },
            BucketConfig {
                tmp_object_prefix: String::new(),
                ..BucketConfig::default()
            },
            BucketConfig {
                gc_interval: Duration::ZERO,
                ..BucketConfig::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }

        assert!(matches!(
            BucketConfig::from_toml_str("op_rate_limit_hz = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "debug_gcs = true").unwrap();
        let config = BucketConfig::from_toml_file(file.path()).unwrap();
        assert!(config.debug_gcs);

        let err = BucketConfig::from_toml_file("/nonexistent/objsync.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
