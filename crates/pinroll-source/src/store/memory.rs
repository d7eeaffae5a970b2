//! In-memory versioned object store (for testing and dry runs).
//!
//! Mirrors the listing shape of a real versioned bucket: keys in
//! lexicographic order, newest version first within a key, delete markers
//! interleaved with regular versions, fixed-size pages.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pinroll_core::ObjectVersionEvent;
use tracing::debug;

use crate::error::{SourceError, SourceResult};
use crate::store::{ObjectStore, VersionCursor, VersionPage};

/// Default number of versions per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredVersion {
    event: ObjectVersionEvent,
    body: Option<Bytes>,
}

/// Thread-safe in-memory store with per-key version history.
#[derive(Debug)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<StoredVersion>>>,
    page_size: usize,
    next_version: AtomicU64,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    failure: RwLock<Option<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create a store that returns at most `page_size` versions per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            next_version: AtomicU64::new(1),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            failure: RwLock::new(None),
        }
    }

    /// Write a new version of `key`. Returns its version id.
    pub fn put(&self, key: &str, body: impl Into<Bytes>, at: DateTime<Utc>) -> String {
        let version_id = self.allocate_version_id();
        self.insert(
            ObjectVersionEvent::version(key, &version_id, at),
            Some(body.into()),
        );
        version_id
    }

    /// Write a delete marker for `key`. Returns its version id.
    pub fn delete(&self, key: &str, at: DateTime<Utc>) -> String {
        let version_id = self.allocate_version_id();
        self.insert(ObjectVersionEvent::delete_marker(key, &version_id, at), None);
        version_id
    }

    /// Make every subsequent call fail with a store error (`None` clears).
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.write() = message.map(str::to_string);
    }

    /// Number of `list_versions` calls served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Number of `get_object` calls served so far.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::Relaxed)
    }

    fn allocate_version_id(&self) -> String {
        format!("v{:06}", self.next_version.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, event: ObjectVersionEvent, body: Option<Bytes>) {
        let mut objects = self.objects.write();
        let versions = objects.entry(event.key.clone()).or_default();
        versions.insert(0, StoredVersion { event, body });
        // Newest first; the stable sort keeps later writes ahead on ties.
        versions.sort_by(|a, b| b.event.last_modified.cmp(&a.event.last_modified));
    }

    fn check_failure(&self) -> SourceResult<()> {
        match self.failure.read().as_ref() {
            Some(message) => Err(SourceError::Store(message.clone())),
            None => Ok(()),
        }
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_versions(
        &self,
        prefix: &str,
        cursor: Option<&VersionCursor>,
    ) -> SourceResult<VersionPage> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        self.check_failure()?;

        let objects = self.objects.read();
        let listing: Vec<&ObjectVersionEvent> = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .flat_map(|(_, versions)| versions.iter().map(|v| &v.event))
            .collect();

        let start = match cursor {
            None => 0,
            Some(cursor) => listing
                .iter()
                .position(|e| {
                    Some(e.key.as_str()) == cursor.key_marker.as_deref()
                        && Some(e.version_id.as_str()) == cursor.version_id_marker.as_deref()
                })
                .map(|i| i + 1)
                .ok_or_else(|| SourceError::Store("stale listing cursor".to_string()))?,
        };

        let end = (start + self.page_size).min(listing.len());
        let events: Vec<ObjectVersionEvent> =
            listing[start..end].iter().map(|e| (*e).clone()).collect();
        let next = if end < listing.len() {
            events.last().map(|last| VersionCursor {
                key_marker: Some(last.key.clone()),
                version_id_marker: Some(last.version_id.clone()),
            })
        } else {
            None
        };

        debug!(%prefix, start, count = events.len(), truncated = next.is_some(), "listed versions");
        Ok(VersionPage { events, next })
    }

    async fn get_object(&self, key: &str, version_id: &str) -> SourceResult<Bytes> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        self.check_failure()?;

        let objects = self.objects.read();
        objects
            .get(key)
            .and_then(|versions| versions.iter().find(|v| v.event.version_id == version_id))
            .and_then(|v| v.body.clone())
            .ok_or_else(|| SourceError::NotFound(format!("{key}@{version_id}")))
    }
}
