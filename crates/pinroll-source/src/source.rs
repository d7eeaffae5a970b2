//! Artifact source backed by a versioned object store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use pinroll_core::{
    ArtifactName, ArtifactRole, ObjectVersionEvent, S3Location, Snapshot, SourceConfig,
    cancellable,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{SourceError, SourceResult};
use crate::resolver::{KeyLayout, resolve};
use crate::store::ObjectStore;
use crate::stream::VersionStream;

/// Lists artifact names and fetches their payloads.
#[async_trait]
pub trait LibrarySource: Send + Sync {
    /// Stable display name, also used as a cache key.
    fn name(&self) -> &str;

    async fn list_names(&self, cancel: &CancellationToken) -> SourceResult<BTreeSet<ArtifactName>>;

    async fn fetch_code(&self, name: &ArtifactName, cancel: &CancellationToken)
    -> SourceResult<Bytes>;

    async fn fetch_config(
        &self,
        name: &ArtifactName,
        cancel: &CancellationToken,
    ) -> SourceResult<Bytes>;

    /// The current snapshot of `name`, if one resolves.
    async fn snapshot(
        &self,
        name: &ArtifactName,
        cancel: &CancellationToken,
    ) -> SourceResult<Option<Snapshot>>;

    /// Read one exact object version.
    async fn fetch_version(
        &self,
        version: &ObjectVersionEvent,
        cancel: &CancellationToken,
    ) -> SourceResult<Bytes>;

    /// Code and config of an already resolved snapshot.
    async fn fetch_snapshot(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationToken,
    ) -> SourceResult<(Bytes, Bytes)> {
        let code = self.fetch_version(&snapshot.code_version, cancel).await?;
        let config = self.fetch_version(&snapshot.config_version, cancel).await?;
        Ok((code, config))
    }

    /// Code and config of `name`, both taken from one resolution.
    async fn fetch_pair(
        &self,
        name: &ArtifactName,
        cancel: &CancellationToken,
    ) -> SourceResult<(Bytes, Bytes)> {
        let snapshot = self.snapshot(name, cancel).await?.ok_or_else(|| {
            SourceError::ArtifactIncomplete(format!("{}{}", self.name(), name))
        })?;
        self.fetch_snapshot(&snapshot, cancel).await
    }
}

/// Supplies the version marker for a rollout.
#[async_trait]
pub trait TimestampProvider: Send + Sync {
    /// Newest snapshot timestamp, or `None` when nothing resolves.
    async fn timestamp(&self, cancel: &CancellationToken) -> SourceResult<Option<DateTime<Utc>>>;
}

/// Snapshots of every artifact under one bucket prefix.
///
/// Every call lists the store afresh; nothing is cached here.
pub struct ArtifactSource {
    store: Arc<dyn ObjectStore>,
    location: S3Location,
    layout: KeyLayout,
    cutoff: Option<DateTime<Utc>>,
    name: String,
}

impl ArtifactSource {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        location: S3Location,
        cutoff: Option<DateTime<Utc>>,
    ) -> Self {
        let layout = KeyLayout::new(&location.prefix);
        let name = location.to_string();
        Self {
            store,
            location,
            layout,
            cutoff,
            name,
        }
    }

    /// Build from config. The cutoff is resolved once, here.
    pub fn from_config(store: Arc<dyn ObjectStore>, config: &SourceConfig) -> SourceResult<Self> {
        let location = config.location()?;
        let cutoff = config.resolve_cutoff();
        let source = Self::new(store, location, cutoff);
        info!(source = %source.name, cutoff = ?source.cutoff, "artifact source ready");
        Ok(source)
    }

    /// `s3://{bucket}/{prefix}`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &S3Location {
        &self.location
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.cutoff
    }

    /// Resolve every artifact under the prefix.
    pub async fn snapshots(
        &self,
        cancel: &CancellationToken,
    ) -> SourceResult<BTreeMap<ArtifactName, Snapshot>> {
        self.resolve_under(self.layout.prefix(), cancel).await
    }

    /// Resolve one artifact with a listing narrowed to its keys.
    pub async fn snapshot(
        &self,
        name: &ArtifactName,
        cancel: &CancellationToken,
    ) -> SourceResult<Option<Snapshot>> {
        let mut snapshots = self
            .resolve_under(&self.layout.name_prefix(name), cancel)
            .await?;
        Ok(snapshots.remove(name))
    }

    pub async fn list_names(
        &self,
        cancel: &CancellationToken,
    ) -> SourceResult<BTreeSet<ArtifactName>> {
        Ok(self.snapshots(cancel).await?.into_keys().collect())
    }

    pub async fn fetch_code(
        &self,
        name: &ArtifactName,
        cancel: &CancellationToken,
    ) -> SourceResult<Bytes> {
        self.fetch(name, ArtifactRole::Code, cancel).await
    }

    pub async fn fetch_config(
        &self,
        name: &ArtifactName,
        cancel: &CancellationToken,
    ) -> SourceResult<Bytes> {
        self.fetch(name, ArtifactRole::Config, cancel).await
    }

    pub async fn timestamp(
        &self,
        cancel: &CancellationToken,
    ) -> SourceResult<Option<DateTime<Utc>>> {
        let latest = self
            .snapshots(cancel)
            .await?
            .values()
            .map(Snapshot::timestamp)
            .max();
        debug!(source = %self.name, timestamp = ?latest, "resolved source timestamp");
        Ok(latest)
    }

    async fn resolve_under(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> SourceResult<BTreeMap<ArtifactName, Snapshot>> {
        let events = VersionStream::open(self.store.clone(), prefix, self.cutoff, cancel)
            .collect()
            .await?;
        let snapshots = resolve(events, &self.layout);
        debug!(source = %self.name, %prefix, count = snapshots.len(), "resolved snapshots");
        Ok(snapshots)
    }

    async fn fetch(
        &self,
        name: &ArtifactName,
        role: ArtifactRole,
        cancel: &CancellationToken,
    ) -> SourceResult<Bytes> {
        let snapshot = self.snapshot(name, cancel).await?.ok_or_else(|| {
            SourceError::ArtifactIncomplete(format!("{}{}", self.name, name))
        })?;
        let version = match role {
            ArtifactRole::Code => &snapshot.code_version,
            ArtifactRole::Config => &snapshot.config_version,
        };
        self.fetch_version(version, cancel).await
    }

    /// Read one exact object version from the store.
    pub async fn fetch_version(
        &self,
        version: &ObjectVersionEvent,
        cancel: &CancellationToken,
    ) -> SourceResult<Bytes> {
        debug!(
            source = %self.name,
            key = %version.key,
            version_id = %version.version_id,
            "fetching artifact object"
        );
        cancellable(cancel, self.store.get_object(&version.key, &version.version_id)).await
    }
}

impl std::fmt::Debug for ArtifactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactSource")
            .field("name", &self.name)
            .field("cutoff", &self.cutoff)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LibrarySource for ArtifactSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_names(&self, cancel: &CancellationToken) -> SourceResult<BTreeSet<ArtifactName>> {
        ArtifactSource::list_names(self, cancel).await
    }

    async fn fetch_code(
        &self,
        name: &ArtifactName,
        cancel: &CancellationToken,
    ) -> SourceResult<Bytes> {
        ArtifactSource::fetch_code(self, name, cancel).await
    }

    async fn fetch_config(
        &self,
        name: &ArtifactName,
        cancel: &CancellationToken,
    ) -> SourceResult<Bytes> {
        ArtifactSource::fetch_config(self, name, cancel).await
    }

    async fn snapshot(
        &self,
        name: &ArtifactName,
        cancel: &CancellationToken,
    ) -> SourceResult<Option<Snapshot>> {
        ArtifactSource::snapshot(self, name, cancel).await
    }

    async fn fetch_version(
        &self,
        version: &ObjectVersionEvent,
        cancel: &CancellationToken,
    ) -> SourceResult<Bytes> {
        ArtifactSource::fetch_version(self, version, cancel).await
    }
}

#[async_trait]
impl TimestampProvider for ArtifactSource {
    async fn timestamp(&self, cancel: &CancellationToken) -> SourceResult<Option<DateTime<Utc>>> {
        ArtifactSource::timestamp(self, cancel).await
    }
}
