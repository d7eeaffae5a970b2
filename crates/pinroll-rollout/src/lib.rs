//! pinroll-rollout — rolling version-marker updates across container services.
//!
//! A run takes the newest artifact timestamp as its version marker and makes
//! every configured (cluster, service) run a definition revision whose
//! containers carry that marker in an environment variable. Services that
//! already carry it are left alone; services sharing a definition family
//! share one new revision.
//!
//! # Components
//!
//! - **`backend`** — `ContainerOrchestrator` trait plus in-memory and ECS backends
//! - **`definition`** — definition identity and container environments
//! - **`marker`** — marker comparison and injection
//! - **`target`** — target validation
//! - **`orchestrator`** — `RolloutOrchestrator::run` and its report

pub mod backend;
pub mod definition;
pub mod error;
pub mod marker;
pub mod orchestrator;
pub mod target;

pub use backend::ContainerOrchestrator;
pub use backend::memory::{Call, MemoryOrchestrator};
pub use definition::{ContainerDefinition, DefinitionId, EnvVar, TaskDefinitionState};
pub use error::{RolloutError, RolloutResult};
pub use marker::Marker;
pub use orchestrator::{RolloutOrchestrator, RunReport, TargetOutcome, TargetReport};
pub use target::{ResolvedTarget, resolve_targets};

#[cfg(feature = "ecs")]
pub use backend::ecs::EcsOrchestrator;
