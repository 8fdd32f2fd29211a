//! End-to-end pipeline: resolve layers, dispatch against a scripted remote,
//! ingest fetched evidence, and aggregate into one verdict.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatehub_core::config::{resolve, FsLayerSource, HubManifest, LayerSource, ThresholdKey};
use gatehub_core::dispatch::{
    CancelHandle, DispatchCoordinator, ExecutorError, RemoteExecutor, RemoteStatus, RunHandle,
    RunRecord, RunState,
};
use gatehub_core::report::{aggregate, ingest, FailReason, ResultRecord};
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

fn seed_hub(dir: &Path) -> FsLayerSource {
    write(
        dir,
        "defaults.toml",
        r#"
        org = "acme"
        exec_path = "ci/run-checks"

        [tools]
        tests = true
        coverage = true

        [thresholds]
        coverage_min = 70.0

        [dispatch]
        timeout = "2m"

        [dispatch.backoff]
        initial_delay = "1s"
        max_delay = "4s"
        "#,
    );
    write(
        dir,
        "repo-a.toml",
        r#"
        unit = "repo-a"

        [thresholds]
        coverage_min = 85.0
        "#,
    );
    write(
        dir,
        "repo-b.toml",
        r#"
        unit = "repo-b"
        "#,
    );
    write(
        dir,
        "hub.toml",
        r#"
        [hub]
        defaults = "defaults.toml"

        [[units]]
        name = "repo-a"
        layers = ["repo-a.toml"]

        [[units]]
        name = "repo-b"
        layers = ["repo-b.toml"]
        "#,
    );
    let manifest = HubManifest::from_file(&dir.join("hub.toml")).unwrap();
    FsLayerSource::new(dir.to_path_buf(), manifest)
}

/// Remote that completes repo-a with healthy evidence and hangs on repo-b.
struct SplitRemote;

#[async_trait]
impl RemoteExecutor for SplitRemote {
    async fn trigger(
        &self,
        config: &gatehub_core::config::EffectiveConfig,
        correlation_id: &str,
    ) -> Result<RunHandle, ExecutorError> {
        Ok(RunHandle(format!("{}:{correlation_id}", config.unit)))
    }

    async fn poll(&self, handle: &RunHandle) -> Result<RemoteStatus, ExecutorError> {
        if handle.0.starts_with("repo-b") {
            return Ok(RemoteStatus::Executing);
        }
        Ok(RemoteStatus::Succeeded)
    }

    async fn cancel(&self, _handle: &RunHandle) {}

    async fn fetch_result(&self, handle: &RunHandle) -> Result<String, ExecutorError> {
        let correlation_id = handle.0.split(':').nth(1).unwrap_or_default();
        Ok(format!(
            r#"{{
                "schema_version": 1,
                "correlation_id": "{correlation_id}",
                "configured": {{"tests": true, "coverage": true}},
                "ran": {{"tests": true, "coverage": true}},
                "success": {{"tests": true, "coverage": true}},
                "metrics": {{"coverage": 90.0}},
                "thresholds": {{"coverage_min": 85.0}}
            }}"#
        ))
    }
}

async fn fetch_evidence(
    coordinator: &DispatchCoordinator<SplitRemote>,
    record: &RunRecord,
) -> Option<ResultRecord> {
    if record.state != RunState::Succeeded {
        return None;
    }
    let raw = coordinator.fetch_result(record).await.ok()?;
    ingest(&raw, &record.correlation_id).ok()
}

#[tokio::test(start_paused = true)]
async fn healthy_and_hung_units_roll_up_into_one_verdict() {
    let dir = TempDir::new().unwrap();
    let source = seed_hub(dir.path());

    let config_a = resolve(&source.layers_for("repo-a").unwrap()).unwrap();
    let config_b = resolve(&source.layers_for("repo-b").unwrap()).unwrap();
    assert_eq!(config_a.thresholds[&ThresholdKey::CoverageMin], 85.0);
    assert_eq!(config_b.thresholds[&ThresholdKey::CoverageMin], 70.0);
    assert_eq!(config_a.dispatch.timeout, Duration::from_secs(120));

    let coordinator = DispatchCoordinator::new(Arc::new(SplitRemote), 4);
    let (_cancel_handle, cancel) = CancelHandle::new();
    let records = coordinator
        .dispatch_all(&[config_a, config_b], &cancel)
        .await;

    assert_eq!(records[0].state, RunState::Succeeded);
    assert_eq!(records[1].state, RunState::TimedOut);

    let mut inputs: Vec<(RunRecord, Option<ResultRecord>)> = Vec::new();
    for record in records {
        let evidence = fetch_evidence(&coordinator, &record).await;
        inputs.push((record, evidence));
    }

    let verdict = aggregate(&inputs);
    assert!(!verdict.passed);
    assert!(verdict.units[0].passed);
    assert_eq!(
        verdict.units[1].first_reason(),
        Some(&FailReason::RunTimedOut)
    );
    assert_eq!(
        verdict.failing_summaries(),
        vec![("repo-b".to_string(), "run timed out".to_string())]
    );
    assert!(verdict.has_infrastructure_failure());
}

#[tokio::test(start_paused = true)]
async fn mismatched_evidence_downgrades_the_unit() {
    let dir = TempDir::new().unwrap();
    let source = seed_hub(dir.path());
    let config = resolve(&source.layers_for("repo-a").unwrap()).unwrap();

    let coordinator = DispatchCoordinator::new(Arc::new(SplitRemote), 4);
    let (_cancel_handle, cancel) = CancelHandle::new();
    let record = coordinator.dispatch(&config, None, cancel).await;
    assert_eq!(record.state, RunState::Succeeded);

    // Evidence fetched for a different attempt must never be accepted.
    let raw = coordinator.fetch_result(&record).await.unwrap();
    assert!(ingest(&raw, "some-other-attempt").is_err());

    let verdict = aggregate(&[(record, None)]);
    assert!(!verdict.passed);
    assert_eq!(
        verdict.units[0].first_reason(),
        Some(&FailReason::MissingEvidence)
    );
}

#[test]
fn thresholds_snapshot_matches_resolved_config() {
    let dir = TempDir::new().unwrap();
    let source = seed_hub(dir.path());
    let config = resolve(&source.layers_for("repo-a").unwrap()).unwrap();

    let snapshot: BTreeMap<ThresholdKey, f64> = config.thresholds.clone();
    assert_eq!(snapshot[&ThresholdKey::CoverageMin], 85.0);
    assert_eq!(snapshot.len(), 1);
}
