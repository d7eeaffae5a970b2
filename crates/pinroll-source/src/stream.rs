//! Lazy, paginated version listing.
//!
//! A [`VersionStream`] re-issues the listing from the first page every time
//! it is consumed. Each page request is raced against the cancellation
//! token; events newer than the cutoff are dropped page by page.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use pinroll_core::{ObjectVersionEvent, cancellable};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SourceError, SourceResult};
use crate::store::{ObjectStore, VersionCursor};

/// Version events under a key prefix, optionally bounded by a cutoff.
pub struct VersionStream {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    cutoff: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

impl VersionStream {
    /// Prepare a listing of `prefix`. No request is made until the stream
    /// is polled.
    pub fn open(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        cutoff: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            cutoff,
            cancel: cancel.clone(),
        }
    }

    /// One item per listing page, already filtered by the cutoff.
    pub fn pages(self) -> BoxStream<'static, SourceResult<Vec<ObjectVersionEvent>>> {
        let Self {
            store,
            prefix,
            cutoff,
            cancel,
        } = self;

        // `None` once the store reports no continuation.
        let start: Option<Option<VersionCursor>> = Some(None);
        stream::try_unfold(start, move |state| {
            let store = store.clone();
            let prefix = prefix.clone();
            let cancel = cancel.clone();
            async move {
                let Some(cursor) = state else {
                    return Ok::<_, SourceError>(None);
                };
                let page =
                    cancellable(&cancel, store.list_versions(&prefix, cursor.as_ref())).await?;
                let listed = page.events.len();
                let events: Vec<ObjectVersionEvent> = page
                    .events
                    .into_iter()
                    .filter(|e| within_cutoff(cutoff, e))
                    .collect();
                debug!(
                    %prefix,
                    listed,
                    kept = events.len(),
                    more = page.next.is_some(),
                    "version page"
                );
                Ok(Some((events, page.next.map(Some))))
            }
        })
        .boxed()
    }

    /// Individual events across all pages.
    pub fn events(self) -> BoxStream<'static, SourceResult<ObjectVersionEvent>> {
        self.pages()
            .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    /// Drain the whole listing.
    pub async fn collect(self) -> SourceResult<Vec<ObjectVersionEvent>> {
        self.events().try_collect().await
    }
}

fn within_cutoff(cutoff: Option<DateTime<Utc>>, event: &ObjectVersionEvent) -> bool {
    cutoff.is_none_or(|c| event.last_modified <= c)
}
