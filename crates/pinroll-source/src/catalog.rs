//! Memoized artifact listing across sources.
//!
//! The first caller for a source lists it; concurrent and later callers
//! share that result. A cancelled listing is dropped so the next caller
//! lists again.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use pinroll_core::{ArtifactName, Snapshot};
use pinroll_flight::{EvictionPolicy, SingleFlight};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{SourceError, SourceResult};
use crate::source::LibrarySource;

/// One artifact name within one source.
#[derive(Clone)]
pub struct ArtifactRef {
    source: Arc<dyn LibrarySource>,
    name: ArtifactName,
}

impl ArtifactRef {
    pub fn new(source: Arc<dyn LibrarySource>, name: ArtifactName) -> Self {
        Self { source, name }
    }

    pub fn source(&self) -> &Arc<dyn LibrarySource> {
        &self.source
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn name(&self) -> &ArtifactName {
        &self.name
    }

    pub async fn fetch_code(&self, cancel: &CancellationToken) -> SourceResult<Bytes> {
        self.source.fetch_code(&self.name, cancel).await
    }

    pub async fn fetch_config(&self, cancel: &CancellationToken) -> SourceResult<Bytes> {
        self.source.fetch_config(&self.name, cancel).await
    }

    pub async fn snapshot(&self, cancel: &CancellationToken) -> SourceResult<Option<Snapshot>> {
        self.source.snapshot(&self.name, cancel).await
    }

    /// Code and config from a single resolution.
    pub async fn fetch_pair(&self, cancel: &CancellationToken) -> SourceResult<(Bytes, Bytes)> {
        self.source.fetch_pair(&self.name, cancel).await
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.source.name(), self.name)
    }
}

impl fmt::Debug for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactRef")
            .field("source", &self.source.name())
            .field("name", &self.name)
            .finish()
    }
}

impl PartialEq for ArtifactRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.source.name() == other.source.name()
    }
}

impl Eq for ArtifactRef {}

type Listing = Arc<Vec<ArtifactRef>>;

/// Artifact listings for a fixed set of sources.
pub struct ArtifactCatalog {
    sources: Vec<Arc<dyn LibrarySource>>,
    listings: SingleFlight<String, Listing, SourceError>,
}

impl ArtifactCatalog {
    pub fn new(sources: Vec<Arc<dyn LibrarySource>>) -> Self {
        Self {
            sources,
            listings: SingleFlight::with_policy(EvictionPolicy::OnCancellation),
        }
    }

    pub fn sources(&self) -> &[Arc<dyn LibrarySource>] {
        &self.sources
    }

    /// Artifacts of one source, listed at most once per catalog.
    pub async fn artifacts_for(
        &self,
        source: &Arc<dyn LibrarySource>,
        cancel: &CancellationToken,
    ) -> SourceResult<Listing> {
        let source = source.clone();
        let cancel = cancel.clone();
        self.listings
            .get_or_compute(source.name().to_string(), move |key| async move {
                let names = source.list_names(&cancel).await?;
                info!(source = %key, count = names.len(), "listed artifacts");
                let refs: Vec<ArtifactRef> = names
                    .into_iter()
                    .map(|name| ArtifactRef::new(source.clone(), name))
                    .collect();
                Ok(Arc::new(refs))
            })
            .await
    }

    /// Artifacts of every source, in source order.
    pub async fn artifacts(&self, cancel: &CancellationToken) -> SourceResult<Vec<ArtifactRef>> {
        let mut all = Vec::new();
        for source in &self.sources {
            let listing = self.artifacts_for(source, cancel).await?;
            all.extend(listing.iter().cloned());
        }
        Ok(all)
    }

    /// First artifact called `name` across the sources.
    pub async fn find(
        &self,
        name: &ArtifactName,
        cancel: &CancellationToken,
    ) -> SourceResult<Option<ArtifactRef>> {
        for source in &self.sources {
            let listing = self.artifacts_for(source, cancel).await?;
            if let Some(found) = listing.iter().find(|a| a.name() == name) {
                return Ok(Some(found.clone()));
            }
        }
        Ok(None)
    }
}
