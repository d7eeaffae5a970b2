//! In-memory orchestrator (for testing and dry runs).
//!
//! Keeps clusters, services, and definition revisions in a map and records
//! every call so tests can assert on exactly which API calls a run made.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::backend::ContainerOrchestrator;
use crate::definition::{ContainerDefinition, DefinitionId, TaskDefinitionState};
use crate::error::{RolloutError, RolloutResult};

/// One recorded orchestrator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DescribeService { cluster: String, service: String },
    DescribeDefinition(DefinitionId),
    Register(String),
    Deregister(DefinitionId),
    UpdateService {
        cluster: String,
        service: String,
        definition: DefinitionId,
    },
}

#[derive(Debug, Clone)]
struct Revision {
    state: TaskDefinitionState,
    active: bool,
}

#[derive(Debug, Default)]
struct Inner {
    /// cluster -> service -> running definition
    clusters: HashMap<String, HashMap<String, DefinitionId>>,
    /// family -> revisions, oldest first
    families: BTreeMap<String, Vec<Revision>>,
    calls: Vec<Call>,
    failing_registrations: Vec<String>,
    failing_deregistrations: bool,
}

/// Thread-safe in-memory orchestrator.
#[derive(Debug, Default)]
pub struct MemoryOrchestrator {
    inner: Mutex<Inner>,
    latency: Duration,
}

impl MemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`, so concurrent callers overlap.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Register a definition directly (not recorded as a call).
    pub fn add_definition(&self, family: &str, containers: Vec<ContainerDefinition>) -> DefinitionId {
        let mut inner = self.inner.lock();
        Self::next_revision(&mut inner, family, containers)
    }

    /// Create `service` in `cluster` running `definition` (not recorded).
    pub fn add_service(&self, cluster: &str, service: &str, definition: &DefinitionId) {
        self.inner
            .lock()
            .clusters
            .entry(cluster.to_string())
            .or_default()
            .insert(service.to_string(), definition.clone());
    }

    /// Create an empty cluster.
    pub fn add_cluster(&self, cluster: &str) {
        self.inner.lock().clusters.entry(cluster.to_string()).or_default();
    }

    /// Make registrations of `family` fail.
    pub fn fail_registrations(&self, family: &str) {
        self.inner.lock().failing_registrations.push(family.to_string());
    }

    /// Make every deregistration fail.
    pub fn fail_deregistrations(&self) {
        self.inner.lock().failing_deregistrations = true;
    }

    pub fn service_definition(&self, cluster: &str, service: &str) -> Option<DefinitionId> {
        self.inner
            .lock()
            .clusters
            .get(cluster)
            .and_then(|services| services.get(service))
            .cloned()
    }

    pub fn definition(&self, id: &DefinitionId) -> Option<TaskDefinitionState> {
        Self::find(&self.inner.lock(), id).map(|r| r.state.clone())
    }

    pub fn is_active(&self, id: &DefinitionId) -> bool {
        Self::find(&self.inner.lock(), id).is_some_and(|r| r.active)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn registrations(&self) -> usize {
        self.count(|c| matches!(c, Call::Register(_)))
    }

    pub fn service_updates(&self) -> usize {
        self.count(|c| matches!(c, Call::UpdateService { .. }))
    }

    pub fn deregistrations(&self) -> usize {
        self.count(|c| matches!(c, Call::Deregister(_)))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn find<'a>(inner: &'a Inner, id: &DefinitionId) -> Option<&'a Revision> {
        inner
            .families
            .get(&id.family)?
            .iter()
            .find(|r| r.state.id.revision == id.revision)
    }

    fn next_revision(
        inner: &mut Inner,
        family: &str,
        containers: Vec<ContainerDefinition>,
    ) -> DefinitionId {
        let revisions = inner.families.entry(family.to_string()).or_default();
        let revision = revisions.last().map_or(1, |r| r.state.id.revision + 1);
        let id = DefinitionId::new(family, revision);
        revisions.push(Revision {
            state: TaskDefinitionState {
                id: id.clone(),
                containers,
            },
            active: true,
        });
        id
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl ContainerOrchestrator for MemoryOrchestrator {
    async fn describe_service(&self, cluster: &str, service: &str) -> RolloutResult<DefinitionId> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.calls.push(Call::DescribeService {
            cluster: cluster.to_string(),
            service: service.to_string(),
        });
        let services = inner
            .clusters
            .get(cluster)
            .ok_or_else(|| RolloutError::ClusterNotFound(cluster.to_string()))?;
        services
            .get(service)
            .cloned()
            .ok_or_else(|| RolloutError::ServiceNotFound {
                cluster: cluster.to_string(),
                service: service.to_string(),
            })
    }

    async fn describe_definition(&self, id: &DefinitionId) -> RolloutResult<TaskDefinitionState> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.calls.push(Call::DescribeDefinition(id.clone()));
        Self::find(&inner, id)
            .map(|r| r.state.clone())
            .ok_or_else(|| RolloutError::Describe(format!("unknown definition {id}")))
    }

    async fn register_definition(
        &self,
        definition: &TaskDefinitionState,
    ) -> RolloutResult<DefinitionId> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        let family = definition.family().to_string();
        inner.calls.push(Call::Register(family.clone()));
        if inner.failing_registrations.contains(&family) {
            return Err(RolloutError::Registration(format!(
                "registration of {family} rejected"
            )));
        }
        let id = Self::next_revision(&mut inner, &family, definition.containers.clone());
        debug!(%id, "registered definition");
        Ok(id)
    }

    async fn deregister_definition(&self, id: &DefinitionId) -> RolloutResult<()> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.calls.push(Call::Deregister(id.clone()));
        if inner.failing_deregistrations {
            return Err(RolloutError::Deregistration(format!("{id}: access denied")));
        }
        let revision = inner
            .families
            .get_mut(&id.family)
            .and_then(|revs| revs.iter_mut().find(|r| r.state.id.revision == id.revision))
            .ok_or_else(|| RolloutError::Deregistration(format!("unknown definition {id}")))?;
        revision.active = false;
        Ok(())
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        definition: &DefinitionId,
    ) -> RolloutResult<()> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock();
        inner.calls.push(Call::UpdateService {
            cluster: cluster.to_string(),
            service: service.to_string(),
            definition: definition.clone(),
        });
        if Self::find(&inner, definition).is_none() {
            return Err(RolloutError::ServiceUpdate(format!(
                "unknown definition {definition}"
            )));
        }
        let running = inner
            .clusters
            .get_mut(cluster)
            .ok_or_else(|| RolloutError::ClusterNotFound(cluster.to_string()))?
            .get_mut(service)
            .ok_or_else(|| RolloutError::ServiceNotFound {
                cluster: cluster.to_string(),
                service: service.to_string(),
            })?;
        *running = definition.clone();
        Ok(())
    }
}
