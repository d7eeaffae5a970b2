//! pinroll.toml configuration parser.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::location::{LocationError, S3Location, normalize_prefix};
use crate::types::{DEFAULT_VERSION_AT_DATE_ENV, DeploymentTargetRef, parse_marker};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinrollConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub rollout: RolloutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    /// Only consider object versions written at or before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_at_date: Option<DateTime<Utc>>,
    /// Environment variable consulted when `version_at_date` is unset.
    #[serde(
        default = "default_version_at_date_env",
        skip_serializing_if = "Option::is_none"
    )]
    pub version_at_date_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    #[serde(default)]
    pub targets: Vec<DeploymentTargetRef>,
    /// Container environment variable carrying the version marker.
    #[serde(default = "default_marker_env")]
    pub marker_env: String,
    /// Stagger between launching consecutive target updates.
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_version_at_date_env() -> Option<String> {
    Some(DEFAULT_VERSION_AT_DATE_ENV.to_string())
}

fn default_marker_env() -> String {
    DEFAULT_VERSION_AT_DATE_ENV.to_string()
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            marker_env: default_marker_env(),
            delay_ms: 0,
        }
    }
}

impl SourceConfig {
    pub fn new(bucket: &str, prefix: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            version_at_date: None,
            version_at_date_env: default_version_at_date_env(),
        }
    }

    /// Bucket and normalized prefix. Fails on a blank bucket.
    pub fn location(&self) -> ConfigResult<S3Location> {
        let bucket = self.bucket.trim();
        if bucket.is_empty() {
            return Err(ConfigError::Invalid("source.bucket is empty".to_string()));
        }
        Ok(S3Location {
            bucket: bucket.to_string(),
            prefix: normalize_prefix(&self.prefix),
        })
    }

    /// Replace bucket and prefix with those of an `s3://bucket/prefix` URI.
    pub fn override_location(&mut self, uri: &str) -> Result<(), LocationError> {
        let location = S3Location::parse(uri)?;
        debug!(%location, "overriding configured source location");
        self.bucket = location.bucket;
        self.prefix = location.prefix;
        Ok(())
    }

    /// Resolve the cutoff from the process environment.
    pub fn resolve_cutoff(&self) -> Option<DateTime<Utc>> {
        self.resolve_cutoff_with(|name| std::env::var(name).ok())
    }

    /// Resolve the cutoff: explicit value, else the fallback variable looked
    /// up through `lookup`, else none (latest).
    pub fn resolve_cutoff_with<F>(&self, lookup: F) -> Option<DateTime<Utc>>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(at) = self.version_at_date {
            debug!(version_at_date = %at, "using configured cutoff");
            return Some(at);
        }

        let var = self
            .version_at_date_env
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())?;
        let raw = lookup(var)?;
        if raw.trim().is_empty() {
            return None;
        }
        match parse_marker(&raw) {
            Some(at) => {
                debug!(env = var, version_at_date = %at, "using cutoff from environment");
                Some(at)
            }
            None => {
                warn!(env = var, value = %raw, "ignoring unparsable cutoff");
                None
            }
        }
    }
}

impl PinrollConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: PinrollConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal pinroll.toml for one bucket and one service.
    pub fn scaffold(bucket: &str, cluster: &str, service: &str) -> Self {
        PinrollConfig {
            source: SourceConfig::new(bucket, "libraries/"),
            rollout: RolloutConfig {
                targets: vec![DeploymentTargetRef::new(cluster, service)],
                ..Default::default()
            },
        }
    }
}
