//! `gatehub report` - offline aggregation replay against stored evidence.
//!
//! Reads the `runs/` and `results/` layout written by `gatehub dispatch`
//! and re-runs aggregation, for debugging a verdict without re-dispatching
//! anything. Aggregation is pure, so replaying unchanged evidence
//! reproduces the original verdict exactly.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use gatehub_core::dispatch::{RunRecord, RunState};
use gatehub_core::report::{aggregate, ingest, ResultRecord};

use super::dispatch::{print_verdict, verdict_exit_code};
use super::exit_codes;

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Evidence directory written by a previous dispatch
    #[arg(long, default_value = "evidence")]
    pub evidence_dir: PathBuf,

    /// Emit the verdict as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: &ReportArgs) -> Result<u8> {
    let runs_dir = args.evidence_dir.join("runs");
    if !runs_dir.is_dir() {
        eprintln!("error: {} is not a directory", runs_dir.display());
        return Ok(exit_codes::CONFIG_ERROR);
    }

    let mut records = load_run_records(&runs_dir)?;
    if records.is_empty() {
        eprintln!("error: no run records under {}", runs_dir.display());
        return Ok(exit_codes::CONFIG_ERROR);
    }
    // Stored records carry no dispatch order, so replay in unit order for
    // a stable verdict.
    records.sort_by(|a, b| a.unit.cmp(&b.unit));

    let results_dir = args.evidence_dir.join("results");
    let inputs: Vec<(RunRecord, Option<ResultRecord>)> = records
        .into_iter()
        .map(|record| {
            let evidence = load_evidence(&results_dir, &record);
            (record, evidence)
        })
        .collect();

    let verdict = aggregate(&inputs);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_verdict(&verdict);
    }
    Ok(verdict_exit_code(&verdict))
}

fn load_run_records(runs_dir: &Path) -> Result<Vec<RunRecord>> {
    let mut records = Vec::new();
    for entry in std::fs::read_dir(runs_dir)
        .with_context(|| format!("reading {}", runs_dir.display()))?
    {
        let path = entry?.path();
        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let record: RunRecord = serde_json::from_str(&raw)
            .with_context(|| format!("parsing run record {}", path.display()))?;
        records.push(record);
    }
    Ok(records)
}

fn load_evidence(results_dir: &Path, record: &RunRecord) -> Option<ResultRecord> {
    if record.state != RunState::Succeeded {
        return None;
    }
    let path = results_dir.join(format!("{}.json", record.correlation_id));
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(unit = %record.unit, path = %path.display(), error = %e,
                "stored result unreadable");
            return None;
        },
    };
    match ingest(&raw, &record.correlation_id) {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::warn!(unit = %record.unit, error = %e, "stored result rejected");
            None
        },
    }
}
