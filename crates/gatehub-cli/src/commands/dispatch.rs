//! `gatehub dispatch` - dispatch runs, collect evidence, print the verdict.
//!
//! Evidence layout under the manifest's `evidence_dir`:
//!
//! ```text
//! evidence/
//!   runs/<unit>.json              terminal run record
//!   results/<correlation_id>.json fetched result record
//!   verdict.json                  consolidated verdict
//! ```
//!
//! The same layout is what `gatehub report` replays offline.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use gatehub_core::config::{
    resolve, ConfigError, EffectiveConfig, FsLayerSource, HubManifest, LayerSource,
};
use gatehub_core::dispatch::{CancelHandle, DispatchCoordinator, RunRecord, RunState};
use gatehub_core::report::{aggregate, ingest, ResultRecord, Verdict};

use super::exit_codes;
use crate::executor::LocalProcessExecutor;

#[derive(Debug, Args)]
pub struct DispatchArgs {
    /// Dispatch a single unit instead of every managed unit
    #[arg(long)]
    pub unit: Option<String>,

    /// Emit the verdict as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(manifest_path: &Path, args: &DispatchArgs) -> Result<u8> {
    let manifest = match HubManifest::from_file(manifest_path) {
        Ok(manifest) => manifest,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        },
    };
    let root = manifest_path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let evidence_dir = root.join(&manifest.hub.evidence_dir);
    let max_concurrent = manifest.hub.max_concurrent;

    let units: Vec<String> = match &args.unit {
        Some(unit) => vec![unit.clone()],
        None => manifest
            .unit_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    };
    if units.is_empty() {
        eprintln!("error: no units declared in {}", manifest_path.display());
        return Ok(exit_codes::CONFIG_ERROR);
    }

    let source = FsLayerSource::new(root, manifest);
    let configs = match resolve_units(&source, &units) {
        Ok(configs) => configs,
        Err(code) => return Ok(code),
    };

    let executor = Arc::new(LocalProcessExecutor::new(evidence_dir.join("results")));
    let coordinator = DispatchCoordinator::new(Arc::clone(&executor), max_concurrent);

    let (cancel_handle, cancel) = CancelHandle::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling in-flight runs");
            cancel_handle.cancel();
        }
    });

    let records = coordinator.dispatch_all(&configs, &cancel).await;

    let mut inputs: Vec<(RunRecord, Option<ResultRecord>)> = Vec::new();
    for record in records {
        let evidence = fetch_evidence(&coordinator, &record).await;
        inputs.push((record, evidence));
    }

    let verdict = aggregate(&inputs);
    persist_evidence(&evidence_dir, &inputs, &verdict)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_verdict(&verdict);
    }
    Ok(verdict_exit_code(&verdict))
}

fn resolve_units(
    source: &FsLayerSource,
    units: &[String],
) -> Result<Vec<EffectiveConfig>, u8> {
    let mut configs = Vec::with_capacity(units.len());
    let mut failed = false;
    for unit in units {
        let resolved = source.layers_for(unit).and_then(|layers| resolve(&layers));
        match resolved {
            Ok(config) => configs.push(config),
            Err(ConfigError::Invalid { problems }) => {
                failed = true;
                eprintln!("configuration for '{unit}' is invalid:");
                for problem in problems {
                    eprintln!("  - {problem}");
                }
            },
            Err(e) => {
                failed = true;
                eprintln!("error resolving '{unit}': {e}");
            },
        }
    }
    if failed {
        Err(exit_codes::CONFIG_ERROR)
    } else {
        Ok(configs)
    }
}

async fn fetch_evidence(
    coordinator: &DispatchCoordinator<LocalProcessExecutor>,
    record: &RunRecord,
) -> Option<ResultRecord> {
    if record.state != RunState::Succeeded {
        return None;
    }
    let raw = match coordinator.fetch_result(record).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(unit = %record.unit, error = %e, "result fetch failed");
            return None;
        },
    };
    match ingest(&raw, &record.correlation_id) {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::warn!(unit = %record.unit, error = %e, "result rejected at ingestion");
            None
        },
    }
}

fn persist_evidence(
    evidence_dir: &Path,
    inputs: &[(RunRecord, Option<ResultRecord>)],
    verdict: &Verdict,
) -> Result<()> {
    let runs_dir = evidence_dir.join("runs");
    std::fs::create_dir_all(&runs_dir)
        .with_context(|| format!("creating {}", runs_dir.display()))?;
    for (record, _) in inputs {
        let path = runs_dir.join(format!("{}.json", record.unit));
        std::fs::write(&path, serde_json::to_string_pretty(record)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    let verdict_path = evidence_dir.join("verdict.json");
    std::fs::write(&verdict_path, serde_json::to_string_pretty(verdict)?)
        .with_context(|| format!("writing {}", verdict_path.display()))?;
    Ok(())
}

pub(crate) fn print_verdict(verdict: &Verdict) {
    for unit in &verdict.units {
        if unit.passed {
            println!("{}: PASS", unit.unit);
        } else {
            let reason = unit
                .first_reason()
                .map_or_else(|| "unknown".to_string(), ToString::to_string);
            println!("{}: FAIL ({reason})", unit.unit);
        }
        for drift in &unit.drift {
            println!("  drift: {drift}");
        }
    }
    println!(
        "hub verdict: {}",
        if verdict.passed { "PASS" } else { "FAIL" }
    );
}

pub(crate) fn verdict_exit_code(verdict: &Verdict) -> u8 {
    if verdict.passed {
        exit_codes::SUCCESS
    } else if verdict.has_infrastructure_failure() {
        // A broken pipeline outranks failed gates in the exit code: the
        // gate results cannot be trusted until the pipeline is fixed.
        exit_codes::INFRA_FAILURE
    } else {
        exit_codes::GATE_FAILURE
    }
}
