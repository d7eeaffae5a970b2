//! Object store contract consumed by the artifact source.
//!
//! A store exposes two operations: a paginated listing of every version
//! (and delete marker) under a key prefix, and a read of one exact
//! `(key, version_id)`. Listing order is store-defined; the resolver does
//! not depend on it.

use async_trait::async_trait;
use bytes::Bytes;
use pinroll_core::ObjectVersionEvent;

use crate::error::SourceResult;

pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

/// Opaque continuation position for a version listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionCursor {
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
}

/// One page of a version listing.
#[derive(Debug, Clone, Default)]
pub struct VersionPage {
    pub events: Vec<ObjectVersionEvent>,
    /// Where the next page starts, or `None` when the listing is complete.
    pub next: Option<VersionCursor>,
}

/// A blob store that keeps full version history per key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of versions under `prefix`, starting at `cursor`
    /// (`None` for the first page).
    async fn list_versions(
        &self,
        prefix: &str,
        cursor: Option<&VersionCursor>,
    ) -> SourceResult<VersionPage>;

    /// Read the bytes of one exact object version.
    async fn get_object(&self, key: &str, version_id: &str) -> SourceResult<Bytes>;
}
