//! Shared types used across pinroll crates.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Key suffix of an artifact's code object.
///
/// Producers publish against these literals; they must not change on
/// their own.
pub const CODE_SUFFIX: &str = "-code.zip";

/// Key suffix of an artifact's config object.
pub const CONFIG_SUFFIX: &str = "-config.json";

/// Environment variable read as the cutoff fallback, and injected into
/// containers as the version marker, unless configured otherwise.
pub const DEFAULT_VERSION_AT_DATE_ENV: &str = "VERSION_AT_DATE";

/// One entry of an object store's version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersionEvent {
    pub key: String,
    pub version_id: String,
    pub last_modified: DateTime<Utc>,
    pub is_delete_marker: bool,
}

impl ObjectVersionEvent {
    /// A regular (non-deleted) object version.
    pub fn version(key: &str, version_id: &str, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            version_id: version_id.to_string(),
            last_modified,
            is_delete_marker: false,
        }
    }

    /// A delete marker.
    pub fn delete_marker(key: &str, version_id: &str, last_modified: DateTime<Utc>) -> Self {
        Self {
            is_delete_marker: true,
            ..Self::version(key, version_id, last_modified)
        }
    }
}

/// Name of a deployable artifact: the key stem shared by its code and
/// config objects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactName(String);

impl ArtifactName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which half of an artifact an object key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Code,
    Config,
}

impl ArtifactRole {
    pub fn suffix(self) -> &'static str {
        match self {
            ArtifactRole::Code => CODE_SUFFIX,
            ArtifactRole::Config => CONFIG_SUFFIX,
        }
    }
}

/// A mutually consistent (code, config) version pair for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: ArtifactName,
    pub code_version: ObjectVersionEvent,
    pub config_version: ObjectVersionEvent,
}

impl Snapshot {
    /// The snapshot's timestamp: when its config version was written.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.config_version.last_modified
    }
}

/// A (cluster, service) pair to roll forward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentTargetRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl DeploymentTargetRef {
    pub fn new(cluster: &str, service: &str) -> Self {
        Self {
            cluster: Some(cluster.to_string()),
            service: Some(service.to_string()),
        }
    }

    /// Trimmed `(cluster, service)` if both parts are present and non-blank.
    pub fn parts(&self) -> Option<(&str, &str)> {
        let cluster = self.cluster.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
        let service = self.service.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some((cluster, service))
    }
}

impl fmt::Display for DeploymentTargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.cluster.as_deref().unwrap_or("<none>"),
            self.service.as_deref().unwrap_or("<none>")
        )
    }
}

/// Render a timestamp the way it is stored in version-marker variables.
pub fn format_marker(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a version-marker value. Any RFC 3339 offset is accepted.
pub fn parse_marker(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
