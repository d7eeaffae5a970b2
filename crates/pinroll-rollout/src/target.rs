//! Deployment target validation.

use std::fmt;

use pinroll_core::DeploymentTargetRef;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A (cluster, service) pair with both parts present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub cluster: String,
    pub service: String,
}

impl ResolvedTarget {
    pub fn new(cluster: &str, service: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            service: service.to_string(),
        }
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.service)
    }
}

/// Keep the well-formed targets, in order. Malformed entries are logged
/// with their position and dropped.
pub fn resolve_targets(targets: &[DeploymentTargetRef]) -> Vec<ResolvedTarget> {
    targets
        .iter()
        .enumerate()
        .filter_map(|(index, target)| match target.parts() {
            Some((cluster, service)) => Some(ResolvedTarget::new(cluster, service)),
            None => {
                warn!(index, target = %target, "skipping target with empty cluster or service");
                None
            }
        })
        .collect()
}
