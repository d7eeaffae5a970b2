//! Amazon ECS backend.
//!
//! Services map to ECS services, definitions to task definitions. A new
//! revision is registered from a fresh describe of the source revision so
//! that every field other than the container environments (cpu, memory,
//! roles, volumes, network mode, placement, ...) is carried over as is.

use async_trait::async_trait;
use aws_sdk_ecs::Client;
use aws_sdk_ecs::error::DisplayErrorContext;
use aws_sdk_ecs::types::{KeyValuePair, TaskDefinition};
use tracing::debug;

use crate::backend::ContainerOrchestrator;
use crate::definition::{ContainerDefinition, DefinitionId, EnvVar, TaskDefinitionState};
use crate::error::{RolloutError, RolloutResult};

/// Failure reason ECS reports for a service that does not exist.
const MISSING: &str = "MISSING";
const INACTIVE: &str = "INACTIVE";

#[derive(Debug, Clone)]
pub struct EcsOrchestrator {
    client: Client,
}

impl EcsOrchestrator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create an orchestrator using the standard AWS SDK config chain.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }

    async fn describe_raw(&self, id: &DefinitionId) -> RolloutResult<TaskDefinition> {
        let output = self
            .client
            .describe_task_definition()
            .task_definition(id.to_string())
            .send()
            .await
            .map_err(|e| RolloutError::Describe(format!("{id}: {}", DisplayErrorContext(e))))?;
        output
            .task_definition()
            .cloned()
            .ok_or_else(|| RolloutError::Describe(format!("{id}: empty response")))
    }
}

fn definition_id(td: &TaskDefinition) -> Option<DefinitionId> {
    Some(DefinitionId::new(td.family()?, td.revision()))
}

fn to_state(td: &TaskDefinition) -> Option<TaskDefinitionState> {
    let containers = td
        .container_definitions()
        .iter()
        .map(|c| {
            let environment = c
                .environment()
                .iter()
                .filter_map(|kv| Some(EnvVar::new(kv.name()?, kv.value().unwrap_or_default())))
                .collect();
            ContainerDefinition::new(c.name().unwrap_or_default(), environment)
        })
        .collect();
    Some(TaskDefinitionState {
        id: definition_id(td)?,
        containers,
    })
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    (!items.is_empty()).then(|| items.to_vec())
}

#[async_trait]
impl ContainerOrchestrator for EcsOrchestrator {
    async fn describe_service(&self, cluster: &str, service: &str) -> RolloutResult<DefinitionId> {
        let output = self
            .client
            .describe_services()
            .cluster(cluster)
            .services(service)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|se| se.is_cluster_not_found_exception())
                {
                    RolloutError::ClusterNotFound(cluster.to_string())
                } else {
                    RolloutError::Describe(format!(
                        "service {cluster}/{service}: {}",
                        DisplayErrorContext(e)
                    ))
                }
            })?;

        let not_found = || RolloutError::ServiceNotFound {
            cluster: cluster.to_string(),
            service: service.to_string(),
        };
        if output.failures().iter().any(|f| f.reason() == Some(MISSING)) {
            return Err(not_found());
        }
        let found = output
            .services()
            .iter()
            .find(|s| s.status() != Some(INACTIVE))
            .ok_or_else(not_found)?;
        let task_definition = found.task_definition().ok_or_else(|| {
            RolloutError::Describe(format!("service {cluster}/{service} has no task definition"))
        })?;
        DefinitionId::parse(task_definition).ok_or_else(|| {
            RolloutError::Describe(format!("unrecognized task definition {task_definition}"))
        })
    }

    async fn describe_definition(&self, id: &DefinitionId) -> RolloutResult<TaskDefinitionState> {
        let td = self.describe_raw(id).await?;
        to_state(&td).ok_or_else(|| RolloutError::Describe(format!("{id}: missing family")))
    }

    async fn register_definition(
        &self,
        definition: &TaskDefinitionState,
    ) -> RolloutResult<DefinitionId> {
        let source = self.describe_raw(&definition.id).await?;

        let containers = source
            .container_definitions()
            .iter()
            .map(|c| {
                let mut c = c.clone();
                if let Some(ours) = definition
                    .containers
                    .iter()
                    .find(|d| Some(d.name.as_str()) == c.name())
                {
                    c.environment = Some(
                        ours.environment
                            .iter()
                            .map(|v| KeyValuePair::builder().name(&v.name).value(&v.value).build())
                            .collect(),
                    );
                }
                c
            })
            .collect();

        let output = self
            .client
            .register_task_definition()
            .family(definition.family())
            .set_container_definitions(Some(containers))
            .set_cpu(source.cpu().map(str::to_string))
            .set_memory(source.memory().map(str::to_string))
            .set_task_role_arn(source.task_role_arn().map(str::to_string))
            .set_execution_role_arn(source.execution_role_arn().map(str::to_string))
            .set_network_mode(source.network_mode().cloned())
            .set_volumes(non_empty(source.volumes()))
            .set_placement_constraints(non_empty(source.placement_constraints()))
            .set_requires_compatibilities(non_empty(source.requires_compatibilities()))
            .set_runtime_platform(source.runtime_platform().cloned())
            .set_ephemeral_storage(source.ephemeral_storage().cloned())
            .set_pid_mode(source.pid_mode().cloned())
            .set_ipc_mode(source.ipc_mode().cloned())
            .set_proxy_configuration(source.proxy_configuration().cloned())
            .set_inference_accelerators(non_empty(source.inference_accelerators()))
            .send()
            .await
            .map_err(|e| {
                RolloutError::Registration(format!(
                    "{}: {}",
                    definition.family(),
                    DisplayErrorContext(e)
                ))
            })?;

        let id = output
            .task_definition()
            .and_then(definition_id)
            .ok_or_else(|| {
                RolloutError::Registration(format!("{}: empty response", definition.family()))
            })?;
        debug!(%id, source = %definition.id, "registered task definition");
        Ok(id)
    }

    async fn deregister_definition(&self, id: &DefinitionId) -> RolloutResult<()> {
        self.client
            .deregister_task_definition()
            .task_definition(id.to_string())
            .send()
            .await
            .map_err(|e| RolloutError::Deregistration(format!("{id}: {}", DisplayErrorContext(e))))?;
        Ok(())
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        definition: &DefinitionId,
    ) -> RolloutResult<()> {
        self.client
            .update_service()
            .cluster(cluster)
            .service(service)
            .task_definition(definition.to_string())
            .send()
            .await
            .map_err(|e| {
                let missing = e.as_service_error().map(|se| {
                    (
                        se.is_cluster_not_found_exception(),
                        se.is_service_not_found_exception(),
                    )
                });
                match missing {
                    Some((true, _)) => RolloutError::ClusterNotFound(cluster.to_string()),
                    Some((_, true)) => RolloutError::ServiceNotFound {
                        cluster: cluster.to_string(),
                        service: service.to_string(),
                    },
                    _ => RolloutError::ServiceUpdate(format!(
                        "{cluster}/{service} -> {definition}: {}",
                        DisplayErrorContext(e)
                    )),
                }
            })?;
        Ok(())
    }
}
