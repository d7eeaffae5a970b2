//! End-to-end snapshot resolution against the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use pinroll_core::{ArtifactName, ObjectVersionEvent, S3Location, SourceConfig};
use pinroll_source::{
    ArtifactSource, KeyLayout, MemoryObjectStore, SourceError, VersionStream, resolve,
};
use tokio_util::sync::CancellationToken;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn source_over(store: &Arc<MemoryObjectStore>, cutoff: Option<DateTime<Utc>>) -> ArtifactSource {
    ArtifactSource::new(
        store.clone(),
        S3Location {
            bucket: "plugins".to_string(),
            prefix: "libraries".to_string(),
        },
        cutoff,
    )
}

fn names(list: &[&str]) -> BTreeSet<ArtifactName> {
    list.iter().map(|n| ArtifactName::from(*n)).collect()
}

#[tokio::test]
async fn publish_then_delete_code() {
    let store = Arc::new(MemoryObjectStore::new());
    store.put("libraries/lib-code.zip", "code", at(10));
    store.put("libraries/lib-config.json", "cfg", at(12));
    let source = source_over(&store, None);
    let cancel = CancellationToken::new();

    assert_eq!(source.list_names(&cancel).await.unwrap(), names(&["lib"]));
    assert_eq!(source.timestamp(&cancel).await.unwrap(), Some(at(12)));

    store.delete("libraries/lib-code.zip", at(11));
    assert!(source.list_names(&cancel).await.unwrap().is_empty());
    assert_eq!(source.timestamp(&cancel).await.unwrap(), None);
    assert!(matches!(
        source.fetch_code(&ArtifactName::from("lib"), &cancel).await,
        Err(SourceError::ArtifactIncomplete(_))
    ));
}

#[tokio::test]
async fn delete_marker_only_affects_its_name() {
    let store = Arc::new(MemoryObjectStore::new());
    for name in ["a", "b"] {
        store.put(&format!("libraries/{name}-code.zip"), "code", at(1));
        store.put(&format!("libraries/{name}-config.json"), "cfg", at(2));
    }
    store.delete("libraries/b-config.json", at(3));

    let source = source_over(&store, None);
    let listed = source.list_names(&CancellationToken::new()).await.unwrap();
    assert_eq!(listed, names(&["a"]));
}

#[tokio::test]
async fn cutoff_equals_pre_filtered_history() {
    let store = Arc::new(MemoryObjectStore::with_page_size(2));
    store.put("libraries/a-code.zip", "a1", at(1));
    store.put("libraries/a-config.json", "a1", at(2));
    store.put("libraries/a-code.zip", "a2", at(5));
    store.put("libraries/a-config.json", "a2", at(6));
    store.put("libraries/b-code.zip", "b1", at(3));
    store.delete("libraries/b-code.zip", at(7));
    store.put("libraries/b-config.json", "b1", at(4));

    let cutoff = at(4);
    let cancel = CancellationToken::new();
    let layout = KeyLayout::new("libraries");

    let all = VersionStream::open(store.clone(), "libraries/", None, &cancel)
        .collect()
        .await
        .unwrap();
    let prefiltered: Vec<ObjectVersionEvent> = all
        .into_iter()
        .filter(|e| e.last_modified <= cutoff)
        .collect();
    let expected = resolve(prefiltered, &layout);

    let pinned = source_over(&store, Some(cutoff));
    assert_eq!(pinned.snapshots(&cancel).await.unwrap(), expected);
    assert_eq!(expected.len(), 2);
    assert_eq!(pinned.timestamp(&cancel).await.unwrap(), Some(at(4)));
}

#[tokio::test]
async fn timestamp_is_max_over_names() {
    let store = Arc::new(MemoryObjectStore::new());
    store.put("libraries/old-code.zip", "c", at(1));
    store.put("libraries/old-config.json", "f", at(2));
    store.put("libraries/new-code.zip", "c", at(8));
    store.put("libraries/new-config.json", "f", at(9));
    // Unpaired, newer than everything else: must not move the marker.
    store.put("libraries/orphan-config.json", "f", at(50));

    let source = source_over(&store, None);
    assert_eq!(
        source.timestamp(&CancellationToken::new()).await.unwrap(),
        Some(at(9))
    );
}

#[tokio::test]
async fn empty_bucket_has_no_timestamp() {
    let store = Arc::new(MemoryObjectStore::new());
    let source = source_over(&store, None);
    assert_eq!(source.timestamp(&CancellationToken::new()).await.unwrap(), None);
}

#[tokio::test]
async fn many_pages_resolve_like_one() {
    let paged = Arc::new(MemoryObjectStore::with_page_size(1));
    let single = Arc::new(MemoryObjectStore::new());
    for store in [&paged, &single] {
        for i in 0..6 {
            store.put(&format!("libraries/n{i}-code.zip"), "c", at(i));
            store.put(&format!("libraries/n{i}-config.json"), "f", at(i + 1));
        }
    }
    let cancel = CancellationToken::new();

    let a = source_over(&paged, None).snapshots(&cancel).await.unwrap();
    let b = source_over(&single, None).snapshots(&cancel).await.unwrap();
    assert_eq!(a.len(), 6);
    assert_eq!(a.keys().collect::<Vec<_>>(), b.keys().collect::<Vec<_>>());
    assert!(paged.list_calls() >= 12);
}

#[tokio::test]
async fn fetch_returns_paired_versions() {
    let store = Arc::new(MemoryObjectStore::new());
    store.put("libraries/svc-code.zip", "v1 code", at(10));
    store.put("libraries/svc-config.json", "v1 cfg", at(11));
    // Code published after the config: not yet paired.
    store.put("libraries/svc-code.zip", "v2 code", at(20));

    let source = source_over(&store, None);
    let cancel = CancellationToken::new();
    let name = ArtifactName::from("svc");
    assert_eq!(source.fetch_code(&name, &cancel).await.unwrap(), Bytes::from("v1 code"));
    assert_eq!(source.fetch_config(&name, &cancel).await.unwrap(), Bytes::from("v1 cfg"));

    store.put("libraries/svc-config.json", "v2 cfg", at(21));
    assert_eq!(source.fetch_code(&name, &cancel).await.unwrap(), Bytes::from("v2 code"));
}

#[tokio::test]
async fn from_config_reads_cutoff_once() {
    let store = Arc::new(MemoryObjectStore::new());
    store.put("libraries/a-code.zip", "c", at(1));
    store.put("libraries/a-config.json", "f", at(2));

    let config = SourceConfig {
        version_at_date: Some(at(1)),
        ..SourceConfig::new("plugins", "libraries")
    };
    let source = ArtifactSource::from_config(store, &config).unwrap();
    assert_eq!(source.cutoff(), Some(at(1)));
    assert_eq!(source.name(), "s3://plugins/libraries/");
    assert_eq!(source.timestamp(&CancellationToken::new()).await.unwrap(), None);
}
