//! Rollout orchestrator: applies one version marker to many services.
//!
//! A run acquires the marker once, then updates every target concurrently.
//! Each target update is sequential:
//!
//! ```text
//! describe service ─> describe definition ─> current? ──yes──> SkippedNoOp
//!                                               │ no
//!                                               v
//!                          register (once per family, shared)
//!                                               │
//!                          deregister previous revision (best effort)
//!                                               │
//!                          update service ─> Updated
//! ```
//!
//! Targets sharing a definition family share one registration. A failed
//! target never aborts the others; only cancellation or failing to obtain
//! the marker fails the run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pinroll_core::{RolloutConfig, cancellable, format_marker};
use pinroll_flight::{Cancellable, EvictionPolicy, SingleFlight};
use pinroll_source::TimestampProvider;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::ContainerOrchestrator;
use crate::definition::{DefinitionId, TaskDefinitionState};
use crate::error::{RolloutError, RolloutResult};
use crate::marker::{Marker, needs_update, with_marker};
use crate::target::{ResolvedTarget, resolve_targets};

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Updated { definition: DefinitionId },
    SkippedNoOp,
    SkippedNotFound,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    #[serde(flatten)]
    pub target: ResolvedTarget,
    pub outcome: TargetOutcome,
}

/// Result of one run, targets in configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Shared marker, `None` when each registration stamped its own.
    pub marker: Option<DateTime<Utc>>,
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    pub fn outcome(&self, cluster: &str, service: &str) -> Option<&TargetOutcome> {
        self.targets
            .iter()
            .find(|r| r.target.cluster == cluster && r.target.service == service)
            .map(|r| &r.outcome)
    }

    pub fn count(&self, pred: impl Fn(&TargetOutcome) -> bool) -> usize {
        self.targets.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Failed { .. }))
    }
}

/// Rolls the newest artifact timestamp out to the configured services.
pub struct RolloutOrchestrator {
    backend: Arc<dyn ContainerOrchestrator>,
    timestamps: Arc<dyn TimestampProvider>,
    config: RolloutConfig,
}

impl RolloutOrchestrator {
    pub fn new(
        backend: Arc<dyn ContainerOrchestrator>,
        timestamps: Arc<dyn TimestampProvider>,
        config: RolloutConfig,
    ) -> Self {
        Self {
            backend,
            timestamps,
            config,
        }
    }

    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    /// Execute one run.
    pub async fn run(&self, cancel: &CancellationToken) -> RolloutResult<RunReport> {
        let marker = Marker::from_timestamp(
            cancellable(cancel, self.timestamps.timestamp(cancel)).await?,
        );
        match marker {
            Marker::Fixed(ts) => info!(marker = %format_marker(&ts), "acquired version marker"),
            Marker::AdHoc => info!("no artifact timestamp, marker will be set ad hoc"),
        }

        if self.config.targets.is_empty() {
            warn!("no rollout targets configured");
            return Ok(RunReport {
                marker: marker.timestamp(),
                targets: Vec::new(),
            });
        }
        let targets = resolve_targets(&self.config.targets);

        let run = Arc::new(Run {
            backend: self.backend.clone(),
            marker,
            marker_env: self.config.marker_env.clone(),
            registrations: SingleFlight::with_policy(EvictionPolicy::OnAnyError),
            deregistered: Mutex::new(HashSet::new()),
            cancel: cancel.clone(),
        });

        let mut tasks = JoinSet::new();
        for (index, target) in targets.iter().cloned().enumerate() {
            let run = run.clone();
            let delay = Duration::from_millis(self.config.delay_ms.saturating_mul(index as u64));
            tasks.spawn(async move {
                let outcome = run.update_after(delay, &target).await;
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<TargetOutcome>> = vec![None; targets.len()];
        let mut cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(outcome))) => outcomes[index] = Some(outcome),
                Ok((_, Err(RolloutError::Cancelled))) => cancelled = true,
                Ok((index, Err(e))) => {
                    outcomes[index] = Some(TargetOutcome::Failed {
                        reason: e.to_string(),
                    })
                }
                Err(e) => error!(error = %e, "target update task aborted"),
            }
        }
        if cancelled {
            warn!("rollout cancelled");
            return Err(RolloutError::Cancelled);
        }

        let report = RunReport {
            marker: marker.timestamp(),
            targets: targets
                .into_iter()
                .zip(outcomes)
                .map(|(target, outcome)| TargetReport {
                    target,
                    outcome: outcome.unwrap_or_else(|| TargetOutcome::Failed {
                        reason: "update task aborted".to_string(),
                    }),
                })
                .collect(),
        };
        info!(
            targets = report.targets.len(),
            updated = report.count(|o| matches!(o, TargetOutcome::Updated { .. })),
            failed = report.failed(),
            "rollout finished"
        );
        Ok(report)
    }
}

/// State shared by the target updates of one run.
struct Run {
    backend: Arc<dyn ContainerOrchestrator>,
    marker: Marker,
    marker_env: String,
    registrations: SingleFlight<String, DefinitionId, RolloutError>,
    deregistered: Mutex<HashSet<DefinitionId>>,
    cancel: CancellationToken,
}

impl Run {
    async fn update_after(
        &self,
        delay: Duration,
        target: &ResolvedTarget,
    ) -> RolloutResult<TargetOutcome> {
        if !delay.is_zero() {
            cancellable(&self.cancel, async {
                tokio::time::sleep(delay).await;
                Ok::<_, RolloutError>(())
            })
            .await?;
        }
        match self.update(target).await {
            Err(e) if e.is_not_found() => {
                warn!(%target, error = %e, "target not found, skipping");
                Ok(TargetOutcome::SkippedNotFound)
            }
            Err(e) if !e.is_cancelled() => {
                warn!(%target, error = %e, "target update failed");
                Err(e)
            }
            other => other,
        }
    }

    async fn update(&self, target: &ResolvedTarget) -> RolloutResult<TargetOutcome> {
        let cancel = &self.cancel;
        let backend = &self.backend;

        let current_id =
            cancellable(cancel, backend.describe_service(&target.cluster, &target.service)).await?;
        let current = cancellable(cancel, backend.describe_definition(&current_id)).await?;

        if !needs_update(&current, &self.marker_env, &self.marker) {
            info!(%target, definition = %current_id, "service needs no update");
            return Ok(TargetOutcome::SkippedNoOp);
        }

        let new_id = self.register(current).await?;
        self.deregister_once(&current_id).await?;

        info!(%target, from = %current_id, to = %new_id, "updating service");
        cancellable(
            cancel,
            backend.update_service(&target.cluster, &target.service, &new_id),
        )
        .await?;
        Ok(TargetOutcome::Updated { definition: new_id })
    }

    /// Register the marked definition, once per family for the whole run.
    async fn register(&self, current: TaskDefinitionState) -> RolloutResult<DefinitionId> {
        let backend = self.backend.clone();
        let cancel = self.cancel.clone();
        let marker = self.marker;
        let env = self.marker_env.clone();
        self.registrations
            .get_or_compute(current.family().to_string(), move |family| async move {
                let value = marker.value_at(Utc::now());
                if marker == Marker::AdHoc {
                    info!(%family, marker = %format_marker(&value), "using ad-hoc marker");
                }
                let marked = with_marker(&current, &env, &value);
                let id = cancellable(&cancel, backend.register_definition(&marked)).await?;
                info!(%id, marker = %format_marker(&value), "registered definition revision");
                Ok(id)
            })
            .await
    }

    /// Deregister `previous` unless another target of this run already did.
    /// Failures are logged and otherwise ignored.
    async fn deregister_once(&self, previous: &DefinitionId) -> RolloutResult<()> {
        if !self.deregistered.lock().insert(previous.clone()) {
            debug!(definition = %previous, "previous revision already deregistered");
            return Ok(());
        }
        match cancellable(&self.cancel, self.backend.deregister_definition(previous)).await {
            Ok(()) => {
                debug!(definition = %previous, "deregistered previous revision");
                Ok(())
            }
            Err(RolloutError::Cancelled) => Err(RolloutError::Cancelled),
            Err(e) => {
                warn!(definition = %previous, error = %e, "failed to deregister previous revision");
                Ok(())
            }
        }
    }
}
