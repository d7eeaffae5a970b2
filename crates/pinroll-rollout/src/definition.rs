//! Deployable-unit definitions as the rollout sees them.
//!
//! Only the parts the rollout reads or rewrites are modelled: the
//! `(family, revision)` identity and each container's environment. Backends
//! carry every other field through registration unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Immutable identity of one definition revision (`family:revision`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefinitionId {
    pub family: String,
    pub revision: i32,
}

impl DefinitionId {
    pub fn new(family: &str, revision: i32) -> Self {
        Self {
            family: family.to_string(),
            revision,
        }
    }

    /// Parse `family:revision`, optionally prefixed by an ARN
    /// (`arn:...:task-definition/family:revision`).
    pub fn parse(value: &str) -> Option<Self> {
        let tail = value.rsplit_once('/').map_or(value, |(_, tail)| tail);
        let (family, revision) = tail.rsplit_once(':')?;
        if family.is_empty() {
            return None;
        }
        Some(Self {
            family: family.to_string(),
            revision: revision.parse().ok()?,
        })
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.revision)
    }
}

/// One environment variable of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    pub name: String,
    /// Ordered as declared in the definition.
    pub environment: Vec<EnvVar>,
}

impl ContainerDefinition {
    pub fn new(name: &str, environment: Vec<EnvVar>) -> Self {
        Self {
            name: name.to_string(),
            environment,
        }
    }

    /// Values of every variable called `name`, in order.
    pub fn env_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.environment
            .iter()
            .filter(move |v| v.name == name)
            .map(|v| v.value.as_str())
    }
}

/// A definition revision with its containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinitionState {
    pub id: DefinitionId,
    pub containers: Vec<ContainerDefinition>,
}

impl TaskDefinitionState {
    pub fn family(&self) -> &str {
        &self.id.family
    }

    pub fn revision(&self) -> i32 {
        self.id.revision
    }
}
