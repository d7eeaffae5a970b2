//! Snapshot resolution over raw version history.
//!
//! Events are grouped by artifact name and each group is scanned newest
//! first. The newest config version is paired with the newest code version
//! written at or before it. A delete marker met before the pair is complete
//! invalidates the whole name.
//!
//! ```text
//! t=12 config  <- fixed
//! t=11 config     ignored
//! t=10 code    <- paired, done
//! t=05 code       never reached
//! ```

use std::collections::BTreeMap;

use pinroll_core::location::normalize_prefix;
use pinroll_core::{ArtifactName, ArtifactRole, ObjectVersionEvent, Snapshot};
use tracing::{debug, trace};

/// Maps object keys to artifact names and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    /// Layout rooted at `prefix` (normalized to end in `/` when non-empty).
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: normalize_prefix(prefix),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Split a key into its artifact name and role.
    ///
    /// Keys outside the prefix, keys nested below it, keys without a
    /// recognized suffix, and keys whose name would be empty yield `None`.
    pub fn parse(&self, key: &str) -> Option<(ArtifactName, ArtifactRole)> {
        let rest = key.strip_prefix(self.prefix.as_str())?;
        if rest.contains('/') {
            return None;
        }
        [ArtifactRole::Code, ArtifactRole::Config]
            .into_iter()
            .find_map(|role| {
                rest.strip_suffix(role.suffix())
                    .filter(|stem| !stem.is_empty())
                    .map(|stem| (ArtifactName::new(stem), role))
            })
    }

    /// Full object key of one half of an artifact.
    pub fn key_for(&self, name: &ArtifactName, role: ArtifactRole) -> String {
        format!("{}{}{}", self.prefix, name, role.suffix())
    }

    /// Listing prefix that covers every key of `name`.
    pub fn name_prefix(&self, name: &ArtifactName) -> String {
        format!("{}{}", self.prefix, name)
    }
}

/// Reduce version events to at most one snapshot per artifact name.
///
/// Input order does not matter. Keys the layout does not recognize are
/// skipped.
pub fn resolve<I>(events: I, layout: &KeyLayout) -> BTreeMap<ArtifactName, Snapshot>
where
    I: IntoIterator<Item = ObjectVersionEvent>,
{
    let mut groups: BTreeMap<ArtifactName, Vec<(ArtifactRole, ObjectVersionEvent)>> =
        BTreeMap::new();
    for event in events {
        match layout.parse(&event.key) {
            Some((name, role)) => groups.entry(name).or_default().push((role, event)),
            None => trace!(key = %event.key, "ignoring unrecognized key"),
        }
    }

    groups
        .into_iter()
        .filter_map(|(name, group)| resolve_group(&name, group).map(|s| (name, s)))
        .collect()
}

fn resolve_group(
    name: &ArtifactName,
    mut group: Vec<(ArtifactRole, ObjectVersionEvent)>,
) -> Option<Snapshot> {
    // Newest first. On equal timestamps config sorts ahead of code, and a
    // delete marker ahead of the version it shares a second with.
    group.sort_by(|(role_a, a), (role_b, b)| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| tie_rank(*role_a).cmp(&tie_rank(*role_b)))
            .then_with(|| b.is_delete_marker.cmp(&a.is_delete_marker))
    });

    let mut config = None;
    for (role, event) in group {
        if event.is_delete_marker {
            debug!(%name, key = %event.key, "delete marker invalidates artifact");
            return None;
        }
        match role {
            ArtifactRole::Config if config.is_none() => config = Some(event),
            ArtifactRole::Code => {
                if let Some(config_version) = config.take() {
                    return Some(Snapshot {
                        name: name.clone(),
                        code_version: event,
                        config_version,
                    });
                }
            }
            _ => {}
        }
    }

    debug!(%name, "no consistent code/config pair");
    None
}

fn tie_rank(role: ArtifactRole) -> u8 {
    match role {
        ArtifactRole::Config => 0,
        ArtifactRole::Code => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn put(key: &str, v: &str, secs: i64) -> ObjectVersionEvent {
        ObjectVersionEvent::version(key, v, at(secs))
    }

    fn del(key: &str, v: &str, secs: i64) -> ObjectVersionEvent {
        ObjectVersionEvent::delete_marker(key, v, at(secs))
    }

    #[test]
    fn parse_keys() {
        let layout = KeyLayout::new("libs");
        assert_eq!(
            layout.parse("libs/auth-code.zip"),
            Some((ArtifactName::from("auth"), ArtifactRole::Code))
        );
        assert_eq!(
            layout.parse("libs/auth-config.json"),
            Some((ArtifactName::from("auth"), ArtifactRole::Config))
        );
        assert_eq!(layout.parse("libs/nested/auth-code.zip"), None);
        assert_eq!(layout.parse("libs/readme.md"), None);
        assert_eq!(layout.parse("libs/-code.zip"), None);
        assert_eq!(layout.parse("other/auth-code.zip"), None);
    }

    #[test]
    fn key_for_round_trips_through_parse() {
        let layout = KeyLayout::new("libs/");
        let name = ArtifactName::from("billing");
        let key = layout.key_for(&name, ArtifactRole::Config);
        assert_eq!(key, "libs/billing-config.json");
        assert_eq!(layout.parse(&key), Some((name.clone(), ArtifactRole::Config)));
        assert_eq!(layout.name_prefix(&name), "libs/billing");
    }

    #[test]
    fn pairs_newest_config_with_older_code() {
        let layout = KeyLayout::new("");
        let events = vec![
            put("lib-code.zip", "c1", 5),
            put("lib-code.zip", "c2", 10),
            put("lib-code.zip", "c3", 13),
            put("lib-config.json", "f1", 11),
            put("lib-config.json", "f2", 12),
        ];
        let snapshots = resolve(events, &layout);
        let snap = &snapshots[&ArtifactName::from("lib")];
        assert_eq!(snap.config_version.version_id, "f2");
        assert_eq!(snap.code_version.version_id, "c2");
        assert_eq!(snap.timestamp(), at(12));
    }

    #[test]
    fn equal_timestamps_pair_up() {
        let layout = KeyLayout::new("");
        let events = vec![put("lib-code.zip", "c", 7), put("lib-config.json", "f", 7)];
        let snap = resolve(events, &layout).remove(&ArtifactName::from("lib")).unwrap();
        assert_eq!(snap.code_version.version_id, "c");
    }

    #[test]
    fn code_only_or_config_only_yields_nothing() {
        let layout = KeyLayout::new("");
        assert!(resolve(vec![put("a-code.zip", "c", 1)], &layout).is_empty());
        assert!(resolve(vec![put("a-config.json", "f", 1)], &layout).is_empty());
        // Config exists, but all code is newer.
        let events = vec![put("a-config.json", "f", 1), put("a-code.zip", "c", 2)];
        assert!(resolve(events, &layout).is_empty());
    }

    #[test]
    fn delete_marker_before_pair_invalidates() {
        let layout = KeyLayout::new("");
        let events = vec![
            put("lib-code.zip", "c", 10),
            del("lib-code.zip", "d", 11),
            put("lib-config.json", "f", 12),
        ];
        assert!(resolve(events, &layout).is_empty());
    }

    #[test]
    fn delete_marker_in_same_second_wins_over_version() {
        let layout = KeyLayout::new("");
        // Listed version first, as a merged S3 page would have it.
        let events = vec![
            put("lib-code.zip", "c", 10),
            put("lib-config.json", "f", 12),
            del("lib-code.zip", "d", 10),
        ];
        assert!(resolve(events, &layout).is_empty());

        let events = vec![
            put("lib-code.zip", "c", 10),
            put("lib-config.json", "f", 12),
            del("lib-config.json", "d", 12),
        ];
        assert!(resolve(events, &layout).is_empty());
    }

    #[test]
    fn delete_marker_older_than_pair_is_irrelevant() {
        let layout = KeyLayout::new("");
        let events = vec![
            del("lib-config.json", "d", 1),
            put("lib-code.zip", "c", 10),
            put("lib-config.json", "f", 12),
        ];
        assert_eq!(resolve(events, &layout).len(), 1);
    }

    #[test]
    fn names_resolve_independently() {
        let layout = KeyLayout::new("p/");
        let events = vec![
            put("p/a-code.zip", "ac", 1),
            put("p/a-config.json", "af", 2),
            put("p/b-code.zip", "bc", 1),
            put("p/b-config.json", "bf", 2),
            del("p/b-config.json", "bd", 3),
            put("p/x/c-code.zip", "ignored", 1),
        ];
        let snapshots = resolve(events, &layout);
        let names: Vec<&str> = snapshots.keys().map(ArtifactName::as_str).collect();
        assert_eq!(names, vec!["a"]);
    }
}
