//! Container orchestration API consumed by the rollout.
//!
//! Implementations map "cluster not found" and "service not found" to
//! [`RolloutError::ClusterNotFound`](crate::RolloutError::ClusterNotFound) and
//! [`RolloutError::ServiceNotFound`](crate::RolloutError::ServiceNotFound) so
//! the orchestrator can skip the target instead of failing it.

use async_trait::async_trait;

use crate::definition::{DefinitionId, TaskDefinitionState};
use crate::error::RolloutResult;

pub mod memory;
#[cfg(feature = "ecs")]
pub mod ecs;

#[async_trait]
pub trait ContainerOrchestrator: Send + Sync {
    /// Definition revision the service currently runs.
    async fn describe_service(&self, cluster: &str, service: &str) -> RolloutResult<DefinitionId>;

    async fn describe_definition(&self, id: &DefinitionId) -> RolloutResult<TaskDefinitionState>;

    /// Register `definition` as the next revision of its family. Only the
    /// container environments may differ from the revision named by
    /// `definition.id`; every other field is carried over from it.
    async fn register_definition(
        &self,
        definition: &TaskDefinitionState,
    ) -> RolloutResult<DefinitionId>;

    async fn deregister_definition(&self, id: &DefinitionId) -> RolloutResult<()>;

    /// Point the service at `definition`.
    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        definition: &DefinitionId,
    ) -> RolloutResult<()>;
}
