//! Version-marker checks and injection.
//!
//! A definition is current when every container carries exactly one marker
//! variable, its value parses as a timestamp, and (for a fixed marker) that
//! timestamp equals the marker. Anything else triggers a new revision.

use chrono::{DateTime, Utc};
use pinroll_core::{format_marker, parse_marker};

use crate::definition::{EnvVar, TaskDefinitionState};

/// The version a run rolls out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Shared timestamp from the artifact source.
    Fixed(DateTime<Utc>),
    /// No source timestamp; each registration stamps its own clock.
    AdHoc,
}

impl Marker {
    pub fn from_timestamp(ts: Option<DateTime<Utc>>) -> Self {
        ts.map_or(Marker::AdHoc, Marker::Fixed)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Marker::Fixed(ts) => Some(*ts),
            Marker::AdHoc => None,
        }
    }

    /// Value to write at registration time.
    pub fn value_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp().unwrap_or(now)
    }

    fn accepts(&self, value: &str) -> bool {
        match (parse_marker(value), self) {
            (None, _) => false,
            (Some(found), Marker::Fixed(expected)) => found == *expected,
            (Some(_), Marker::AdHoc) => true,
        }
    }
}

/// Whether `definition` must be re-registered to carry `marker` in `env`.
pub fn needs_update(definition: &TaskDefinitionState, env: &str, marker: &Marker) -> bool {
    definition.containers.iter().any(|container| {
        let mut values = container.env_values(env);
        match (values.next(), values.next()) {
            (Some(only), None) => !marker.accepts(only),
            _ => true,
        }
    })
}

/// Copy of `definition` with every container's `env` set to `value`.
///
/// Existing `env` entries are dropped and one entry is appended; other
/// variables keep their order.
pub fn with_marker(
    definition: &TaskDefinitionState,
    env: &str,
    value: &DateTime<Utc>,
) -> TaskDefinitionState {
    let rendered = format_marker(value);
    let mut updated = definition.clone();
    for container in &mut updated.containers {
        container.environment.retain(|v| v.name != env);
        container.environment.push(EnvVar::new(env, &rendered));
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ContainerDefinition, DefinitionId};
    use chrono::TimeZone;

    const ENV: &str = "VERSION_AT_DATE";

    fn marker_at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn definition(containers: Vec<Vec<(&str, &str)>>) -> TaskDefinitionState {
        TaskDefinitionState {
            id: DefinitionId::new("api", 1),
            containers: containers
                .into_iter()
                .enumerate()
                .map(|(i, env)| {
                    ContainerDefinition::new(
                        &format!("c{i}"),
                        env.into_iter().map(|(k, v)| EnvVar::new(k, v)).collect(),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn current_marker_needs_nothing() {
        let ts = marker_at(1_700_000_000);
        let value = format_marker(&ts);
        let def = definition(vec![
            vec![(ENV, value.as_str())],
            vec![("X", "1"), (ENV, value.as_str())],
        ]);
        assert!(!needs_update(&def, ENV, &Marker::Fixed(ts)));
    }

    #[test]
    fn equal_instant_in_other_offset_is_current() {
        let ts = marker_at(1_700_000_000);
        let shifted = ts
            .with_timezone(&chrono::FixedOffset::east_opt(3600).unwrap())
            .to_rfc3339();
        let def = definition(vec![vec![(ENV, shifted.as_str())]]);
        assert!(!needs_update(&def, ENV, &Marker::Fixed(ts)));
    }

    #[test]
    fn stale_missing_duplicate_or_garbage_needs_update() {
        let ts = marker_at(1_700_000_000);
        let old = format_marker(&marker_at(1));
        let now = format_marker(&ts);
        let fixed = Marker::Fixed(ts);

        assert!(needs_update(&definition(vec![vec![(ENV, old.as_str())]]), ENV, &fixed));
        assert!(needs_update(&definition(vec![vec![("X", "1")]]), ENV, &fixed));
        assert!(needs_update(
            &definition(vec![vec![(ENV, now.as_str()), (ENV, now.as_str())]]),
            ENV,
            &fixed
        ));
        assert!(needs_update(&definition(vec![vec![(ENV, "tuesday")]]), ENV, &fixed));
        // One stale container is enough.
        assert!(needs_update(
            &definition(vec![vec![(ENV, now.as_str())], vec![(ENV, old.as_str())]]),
            ENV,
            &fixed
        ));
    }

    #[test]
    fn ad_hoc_accepts_any_valid_timestamp() {
        let any = format_marker(&marker_at(42));
        let def = definition(vec![vec![(ENV, any.as_str())]]);
        assert!(!needs_update(&def, ENV, &Marker::AdHoc));
        assert!(needs_update(&definition(vec![vec![(ENV, "x")]]), ENV, &Marker::AdHoc));
        assert!(needs_update(&definition(vec![vec![]]), ENV, &Marker::AdHoc));
    }

    #[test]
    fn with_marker_replaces_only_marker_vars() {
        let ts = marker_at(1_700_000_000);
        let def = definition(vec![
            vec![("A", "1"), (ENV, "old"), ("B", "2"), (ENV, "older")],
            vec![],
        ]);
        let updated = with_marker(&def, ENV, &ts);

        let first: Vec<(&str, &str)> = updated.containers[0]
            .environment
            .iter()
            .map(|v| (v.name.as_str(), v.value.as_str()))
            .collect();
        assert_eq!(
            first,
            vec![("A", "1"), ("B", "2"), (ENV, "2023-11-14T22:13:20Z")]
        );
        assert_eq!(
            updated.containers[1].environment,
            vec![EnvVar::new(ENV, "2023-11-14T22:13:20Z")]
        );
        assert!(!needs_update(&updated, ENV, &Marker::Fixed(ts)));
        assert_eq!(updated.id, def.id);
    }

    #[test]
    fn marker_value_at() {
        let now = marker_at(99);
        assert_eq!(Marker::AdHoc.value_at(now), now);
        assert_eq!(Marker::Fixed(marker_at(5)).value_at(now), marker_at(5));
        assert_eq!(Marker::from_timestamp(None), Marker::AdHoc);
    }
}
