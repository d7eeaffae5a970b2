//! `s3://bucket/prefix` location parsing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A bucket plus a key prefix inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Location {
    pub bucket: String,
    pub prefix: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum LocationError {
    #[error("unsupported location scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid location: {0}")]
    InvalidUri(String),
}

impl S3Location {
    /// Parse `s3://bucket` or `s3://bucket/some/prefix/`.
    pub fn parse(uri: &str) -> Result<Self, LocationError> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| LocationError::UnsupportedScheme(uri.to_string()))?;
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.trim().is_empty() {
            return Err(LocationError::InvalidUri(uri.to_string()));
        }
        Ok(S3Location {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }

    /// The prefix with surrounding whitespace removed and a trailing `/`
    /// appended when non-empty.
    pub fn normalized_prefix(&self) -> String {
        normalize_prefix(&self.prefix)
    }
}

impl std::fmt::Display for S3Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.normalized_prefix())
    }
}

/// Normalize a key prefix so that names can be appended directly.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim();
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}
