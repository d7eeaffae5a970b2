//! Full runs against the in-memory orchestrator and object store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pinroll_core::{DeploymentTargetRef, RolloutConfig, S3Location, format_marker, parse_marker};
use pinroll_rollout::{
    ContainerDefinition, ContainerOrchestrator, DefinitionId, EnvVar, MemoryOrchestrator,
    RolloutError, RolloutOrchestrator, RolloutResult, TargetOutcome, TaskDefinitionState,
};
use pinroll_source::{
    ArtifactSource, MemoryObjectStore, SourceError, SourceResult, TimestampProvider,
};
use tokio_util::sync::CancellationToken;

const ENV: &str = "VERSION_AT_DATE";

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Timestamp provider with a canned answer.
struct Canned(SourceResult<Option<DateTime<Utc>>>);

#[async_trait]
impl TimestampProvider for Canned {
    async fn timestamp(&self, _cancel: &CancellationToken) -> SourceResult<Option<DateTime<Utc>>> {
        self.0.clone()
    }
}

/// Artifact source whose newest snapshot was published at `secs`.
fn published_at(secs: i64) -> Arc<dyn TimestampProvider> {
    let store = Arc::new(MemoryObjectStore::new());
    store.put("libraries/lib-code.zip", "code", at(secs - 1));
    store.put("libraries/lib-config.json", "cfg", at(secs));
    Arc::new(ArtifactSource::new(
        store,
        S3Location {
            bucket: "plugins".to_string(),
            prefix: "libraries".to_string(),
        },
        None,
    ))
}

fn app_container(marker: Option<&str>) -> ContainerDefinition {
    let mut env = vec![EnvVar::new("LOG_LEVEL", "info")];
    if let Some(m) = marker {
        env.push(EnvVar::new(ENV, m));
    }
    env.push(EnvVar::new("PORT", "8080"));
    ContainerDefinition::new("app", env)
}

fn config(targets: &[(&str, &str)]) -> RolloutConfig {
    RolloutConfig {
        targets: targets
            .iter()
            .map(|(c, s)| DeploymentTargetRef::new(c, s))
            .collect(),
        ..Default::default()
    }
}

fn orchestrator(
    backend: &Arc<MemoryOrchestrator>,
    timestamps: Arc<dyn TimestampProvider>,
    config: RolloutConfig,
) -> RolloutOrchestrator {
    RolloutOrchestrator::new(backend.clone(), timestamps, config)
}

#[tokio::test]
async fn shared_family_registers_once() {
    let backend = Arc::new(MemoryOrchestrator::with_latency(Duration::from_millis(20)));
    let v1 = backend.add_definition("api", vec![app_container(Some("2020-01-01T00:00:00Z"))]);
    backend.add_service("prod", "api", &v1);
    backend.add_service("prod", "api-canary", &v1);

    let run = orchestrator(
        &backend,
        published_at(1_000),
        config(&[("prod", "api"), ("prod", "api-canary")]),
    );
    let report = run.run(&CancellationToken::new()).await.unwrap();

    let v2 = DefinitionId::new("api", 2);
    let updated = TargetOutcome::Updated {
        definition: v2.clone(),
    };
    assert_eq!(report.outcome("prod", "api"), Some(&updated));
    assert_eq!(report.outcome("prod", "api-canary"), Some(&updated));
    assert_eq!(report.marker, Some(at(1_000)));

    assert_eq!(backend.registrations(), 1);
    assert_eq!(backend.deregistrations(), 1);
    assert_eq!(backend.service_updates(), 2);
    assert_eq!(backend.service_definition("prod", "api"), Some(v2.clone()));
    assert_eq!(backend.service_definition("prod", "api-canary"), Some(v2.clone()));
    assert!(!backend.is_active(&v1));

    let marked = backend.definition(&v2).unwrap();
    let values: Vec<&str> = marked.containers[0].env_values(ENV).collect();
    assert_eq!(values, vec![format_marker(&at(1_000))]);
}

#[tokio::test]
async fn current_target_makes_no_changes() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let marker = format_marker(&at(500));
    let v1 = backend.add_definition("api", vec![app_container(Some(marker.as_str()))]);
    backend.add_service("prod", "api", &v1);

    let run = orchestrator(&backend, published_at(500), config(&[("prod", "api")]));
    let report = run.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome("prod", "api"), Some(&TargetOutcome::SkippedNoOp));
    assert_eq!(backend.registrations(), 0);
    assert_eq!(backend.deregistrations(), 0);
    assert_eq!(backend.service_updates(), 0);
    assert_eq!(backend.service_definition("prod", "api"), Some(v1));
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let v1 = backend.add_definition("api", vec![app_container(None)]);
    backend.add_service("prod", "api", &v1);
    let run = orchestrator(&backend, published_at(700), config(&[("prod", "api")]));

    let first = run.run(&CancellationToken::new()).await.unwrap();
    assert!(matches!(
        first.outcome("prod", "api"),
        Some(TargetOutcome::Updated { .. })
    ));
    let second = run.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.outcome("prod", "api"), Some(&TargetOutcome::SkippedNoOp));
    assert_eq!(backend.registrations(), 1);
}

#[tokio::test]
async fn missing_cluster_or_service_is_skipped() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let v1 = backend.add_definition("api", vec![app_container(None)]);
    backend.add_service("prod", "api", &v1);

    let run = orchestrator(
        &backend,
        published_at(100),
        config(&[("prod", "api"), ("gone", "api"), ("prod", "ghost")]),
    );
    let report = run.run(&CancellationToken::new()).await.unwrap();

    assert!(matches!(
        report.outcome("prod", "api"),
        Some(TargetOutcome::Updated { .. })
    ));
    assert_eq!(report.outcome("gone", "api"), Some(&TargetOutcome::SkippedNotFound));
    assert_eq!(report.outcome("prod", "ghost"), Some(&TargetOutcome::SkippedNotFound));
    assert_eq!(report.failed(), 0);
}

#[tokio::test]
async fn malformed_targets_are_dropped() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let v1 = backend.add_definition("api", vec![app_container(None)]);
    backend.add_service("prod", "api", &v1);

    let mut cfg = config(&[("prod", "api"), ("", "api")]);
    cfg.targets.push(DeploymentTargetRef {
        cluster: Some("prod".to_string()),
        service: None,
    });
    let report = orchestrator(&backend, published_at(100), cfg)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.targets[0].target.service, "api");
}

#[tokio::test]
async fn marker_replaces_only_its_variable_in_every_container() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let current = format_marker(&at(100));
    let v1 = backend.add_definition(
        "worker",
        vec![
            // Already current, but a sibling container is not.
            app_container(Some(current.as_str())),
            ContainerDefinition::new(
                "sidecar",
                vec![
                    EnvVar::new(ENV, "2019-01-01T00:00:00Z"),
                    EnvVar::new("MODE", "proxy"),
                    EnvVar::new(ENV, "2018-01-01T00:00:00Z"),
                ],
            ),
        ],
    );
    backend.add_service("prod", "worker", &v1);

    orchestrator(&backend, published_at(100), config(&[("prod", "worker")]))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let v2 = backend.service_definition("prod", "worker").unwrap();
    let state = backend.definition(&v2).unwrap();
    let env = |i: usize| -> Vec<(String, String)> {
        state.containers[i]
            .environment
            .iter()
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect()
    };
    let pair = |k: &str, v: &str| (k.to_string(), v.to_string());
    assert_eq!(
        env(0),
        vec![
            pair("LOG_LEVEL", "info"),
            pair("PORT", "8080"),
            pair(ENV, &current),
        ]
    );
    assert_eq!(env(1), vec![pair("MODE", "proxy"), pair(ENV, &current)]);
    assert_eq!(state.containers[1].name, "sidecar");
}

#[tokio::test]
async fn ad_hoc_marker_when_nothing_is_published() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let v1 = backend.add_definition("api", vec![app_container(Some("not a date"))]);
    backend.add_service("prod", "api", &v1);
    let run = orchestrator(&backend, Arc::new(Canned(Ok(None))), config(&[("prod", "api")]));

    let before = Utc::now();
    let report = run.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.marker, None);

    let v2 = backend.service_definition("prod", "api").unwrap();
    let state = backend.definition(&v2).unwrap();
    let stamped = state.containers[0].env_values(ENV).next().unwrap();
    let stamped = parse_marker(stamped).unwrap();
    assert!(stamped >= before - chrono::Duration::seconds(1));

    // Any valid timestamp satisfies an ad-hoc run.
    let again = run.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(again.outcome("prod", "api"), Some(&TargetOutcome::SkippedNoOp));
}

#[tokio::test]
async fn deregistration_failure_does_not_fail_target() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let v1 = backend.add_definition("api", vec![app_container(None)]);
    backend.add_service("prod", "api", &v1);
    backend.fail_deregistrations();

    let report = orchestrator(&backend, published_at(100), config(&[("prod", "api")]))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.outcome("prod", "api"),
        Some(&TargetOutcome::Updated {
            definition: DefinitionId::new("api", 2)
        })
    );
    assert_eq!(backend.deregistrations(), 1);
    assert!(backend.is_active(&v1));
}

#[tokio::test]
async fn registration_failure_is_isolated_to_its_family() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let api = backend.add_definition("api", vec![app_container(None)]);
    let worker = backend.add_definition("worker", vec![app_container(None)]);
    backend.add_service("prod", "api", &api);
    backend.add_service("prod", "worker", &worker);
    backend.fail_registrations("api");

    let report = orchestrator(
        &backend,
        published_at(100),
        config(&[("prod", "api"), ("prod", "worker")]),
    )
    .run(&CancellationToken::new())
    .await
    .unwrap();

    assert!(matches!(
        report.outcome("prod", "api"),
        Some(TargetOutcome::Failed { reason }) if reason.contains("registration")
    ));
    assert!(matches!(
        report.outcome("prod", "worker"),
        Some(TargetOutcome::Updated { .. })
    ));
    assert_eq!(report.failed(), 1);
    assert_eq!(backend.service_definition("prod", "api"), Some(api));
}

#[tokio::test]
async fn marker_failure_fails_the_run() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let run = orchestrator(
        &backend,
        Arc::new(Canned(Err(SourceError::Store("access denied".to_string())))),
        config(&[("prod", "api")]),
    );
    let err = run.run(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RolloutError::Source(SourceError::Store(_))));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn cancellation_fails_the_run() {
    let backend = Arc::new(MemoryOrchestrator::with_latency(Duration::from_millis(200)));
    let v1 = backend.add_definition("api", vec![app_container(None)]);
    backend.add_service("prod", "api", &v1);
    let run = orchestrator(&backend, published_at(100), config(&[("prod", "api")]));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    assert_eq!(run.run(&cancel).await, Err(RolloutError::Cancelled));
    assert_eq!(backend.service_updates(), 0);
}

/// Cancels the run's token as soon as a service update has gone through.
struct CancelAfterUpdate {
    inner: Arc<MemoryOrchestrator>,
    cancel: CancellationToken,
}

#[async_trait]
impl ContainerOrchestrator for CancelAfterUpdate {
    async fn describe_service(&self, cluster: &str, service: &str) -> RolloutResult<DefinitionId> {
        self.inner.describe_service(cluster, service).await
    }

    async fn describe_definition(&self, id: &DefinitionId) -> RolloutResult<TaskDefinitionState> {
        self.inner.describe_definition(id).await
    }

    async fn register_definition(
        &self,
        definition: &TaskDefinitionState,
    ) -> RolloutResult<DefinitionId> {
        self.inner.register_definition(definition).await
    }

    async fn deregister_definition(&self, id: &DefinitionId) -> RolloutResult<()> {
        self.inner.deregister_definition(id).await
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        definition: &DefinitionId,
    ) -> RolloutResult<()> {
        self.inner.update_service(cluster, service, definition).await?;
        self.cancel.cancel();
        Ok(())
    }
}

#[tokio::test]
async fn cancellation_after_last_update_keeps_the_report() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let v1 = backend.add_definition("api", vec![app_container(None)]);
    backend.add_service("prod", "api", &v1);
    let cancel = CancellationToken::new();
    let wrapped = Arc::new(CancelAfterUpdate {
        inner: backend.clone(),
        cancel: cancel.clone(),
    });
    let run = RolloutOrchestrator::new(wrapped, published_at(100), config(&[("prod", "api")]));

    let report = run.run(&cancel).await.unwrap();
    assert!(cancel.is_cancelled());
    assert_eq!(
        report.outcome("prod", "api"),
        Some(&TargetOutcome::Updated {
            definition: DefinitionId::new("api", 2)
        })
    );
    assert_eq!(backend.service_updates(), 1);
}

#[tokio::test]
async fn empty_target_list_yields_empty_report() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let report = orchestrator(&backend, published_at(100), RolloutConfig::default())
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert!(report.targets.is_empty());
    assert_eq!(report.marker, Some(at(100)));
}

#[tokio::test]
async fn staggered_targets_all_complete() {
    let backend = Arc::new(MemoryOrchestrator::new());
    for service in ["a", "b", "c"] {
        let id = backend.add_definition(service, vec![app_container(None)]);
        backend.add_service("prod", service, &id);
    }
    let cfg = RolloutConfig {
        delay_ms: 5,
        ..config(&[("prod", "a"), ("prod", "b"), ("prod", "c")])
    };

    let report = orchestrator(&backend, published_at(100), cfg)
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        report.count(|o| matches!(o, TargetOutcome::Updated { .. })),
        3
    );
    let services: Vec<&str> = report.targets.iter().map(|r| r.target.service.as_str()).collect();
    assert_eq!(services, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn report_serializes_with_status_tags() {
    let backend = Arc::new(MemoryOrchestrator::new());
    let v1 = backend.add_definition("api", vec![app_container(None)]);
    backend.add_service("prod", "api", &v1);

    let report = orchestrator(
        &backend,
        published_at(100),
        config(&[("prod", "api"), ("gone", "x")]),
    )
    .run(&CancellationToken::new())
    .await
    .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["targets"][0]["cluster"], "prod");
    assert_eq!(json["targets"][0]["outcome"]["status"], "updated");
    assert_eq!(json["targets"][0]["outcome"]["definition"]["revision"], 2);
    assert_eq!(json["targets"][1]["outcome"]["status"], "skipped_not_found");
}
