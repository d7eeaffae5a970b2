//! S3 backend for the versioned object store contract.
//!
//! Maps `list_versions` to `ListObjectVersions` (versions and delete markers
//! merged into one page) and `get_object` to `GetObject` with an explicit
//! `versionId`. Requires bucket versioning to be enabled.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use pinroll_core::ObjectVersionEvent;
use tracing::debug;

use crate::error::{SourceError, SourceResult};
use crate::store::{ObjectStore, VersionCursor, VersionPage};

/// Version id S3 reports for objects written before versioning was enabled.
const NULL_VERSION_ID: &str = "null";

/// Versioned S3 bucket.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a store with a pre-built S3 client.
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Create a store using the standard AWS SDK config chain.
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn to_utc(ts: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}

fn event(
    key: Option<&str>,
    version_id: Option<&str>,
    last_modified: Option<&aws_sdk_s3::primitives::DateTime>,
    is_delete_marker: bool,
) -> Option<ObjectVersionEvent> {
    Some(ObjectVersionEvent {
        key: key?.to_string(),
        version_id: version_id.unwrap_or(NULL_VERSION_ID).to_string(),
        last_modified: to_utc(last_modified?)?,
        is_delete_marker,
    })
}

/// Restore per-key newest-first order after versions and delete markers
/// arrive as separate lists. A delete marker sorts ahead of a version
/// written in the same second.
fn newest_first(events: &mut [ObjectVersionEvent]) {
    events.sort_by(|a, b| {
        a.key
            .cmp(&b.key)
            .then_with(|| b.last_modified.cmp(&a.last_modified))
            .then_with(|| b.is_delete_marker.cmp(&a.is_delete_marker))
    });
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_versions(
        &self,
        prefix: &str,
        cursor: Option<&VersionCursor>,
    ) -> SourceResult<VersionPage> {
        let mut request = self
            .client
            .list_object_versions()
            .bucket(&self.bucket)
            .prefix(prefix);
        if let Some(cursor) = cursor {
            request = request
                .set_key_marker(cursor.key_marker.clone())
                .set_version_id_marker(cursor.version_id_marker.clone());
        }

        let output = request.send().await.map_err(|e| {
            SourceError::Store(format!(
                "list versions under s3://{}/{prefix}: {}",
                self.bucket,
                DisplayErrorContext(e)
            ))
        })?;

        let mut events: Vec<ObjectVersionEvent> = output
            .versions()
            .iter()
            .filter_map(|v| event(v.key(), v.version_id(), v.last_modified(), false))
            .collect();
        events.extend(
            output
                .delete_markers()
                .iter()
                .filter_map(|m| event(m.key(), m.version_id(), m.last_modified(), true)),
        );
        newest_first(&mut events);

        let next = if output.is_truncated().unwrap_or(false) {
            Some(VersionCursor {
                key_marker: output.next_key_marker().map(str::to_string),
                version_id_marker: output.next_version_id_marker().map(str::to_string),
            })
        } else {
            None
        };

        debug!(
            bucket = %self.bucket,
            %prefix,
            count = events.len(),
            truncated = next.is_some(),
            "listed object versions"
        );
        Ok(VersionPage { events, next })
    }

    async fn get_object(&self, key: &str, version_id: &str) -> SourceResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| {
                let no_such_key = e
                    .as_service_error()
                    .is_some_and(|se| se.is_no_such_key());
                let location = format!("s3://{}/{key}@{version_id}", self.bucket);
                if no_such_key {
                    SourceError::NotFound(location)
                } else {
                    SourceError::Store(format!("get {location}: {}", DisplayErrorContext(e)))
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| SourceError::Store(format!("read s3://{}/{key}: {e}", self.bucket)))?;
        Ok(body.into_bytes())
    }
}
