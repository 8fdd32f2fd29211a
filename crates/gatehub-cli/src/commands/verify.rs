//! `gatehub verify` - check that an artifact builds reproducibly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use gatehub_core::determinism::{write_evidence, Verifier, VerifyError};

use super::exit_codes;
use crate::inspect::PathInspector;

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Artifact path to inspect
    pub artifact: String,

    /// Variant to check (repeatable); defaults to a single default variant
    #[arg(long = "variant")]
    pub variants: Vec<String>,

    /// Independent inspections per variant
    #[arg(long, default_value_t = 2)]
    pub runs: usize,

    /// Seconds to wait between inspections of one variant
    #[arg(long, default_value_t = 2)]
    pub delay_secs: u64,

    /// Directory to write descriptors, diffs, and the report into
    #[arg(long, default_value = "evidence/determinism")]
    pub evidence_dir: PathBuf,

    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: &VerifyArgs) -> Result<u8> {
    let verifier = Verifier::new(
        Arc::new(PathInspector),
        Duration::from_secs(args.delay_secs),
    );

    let verification = match verifier
        .verify(&args.artifact, &args.variants, args.runs)
        .await
    {
        Ok(verification) => verification,
        Err(e @ VerifyError::InsufficientRuns { .. }) => {
            eprintln!("error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        },
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(exit_codes::INFRA_FAILURE);
        },
    };

    write_evidence(
        &args.evidence_dir,
        &verification.report,
        &verification.descriptors,
    )?;

    let report = &verification.report;
    if args.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        for variant in &report.variants {
            if variant.consistent {
                println!("{}: consistent ({})", variant.variant, variant.baseline_hash);
            } else {
                let runs: Vec<String> = variant
                    .mismatched_runs
                    .iter()
                    .map(|m| m.run_index.to_string())
                    .collect();
                println!(
                    "{}: INCONSISTENT (diverging runs: {})",
                    variant.variant,
                    runs.join(", ")
                );
            }
        }
        println!(
            "artifact {}: {}",
            report.artifact_ref,
            if report.consistent {
                "reproducible"
            } else {
                "NOT reproducible"
            }
        );
        println!("evidence written to {}", args.evidence_dir.display());
    }

    Ok(if report.consistent {
        exit_codes::SUCCESS
    } else {
        exit_codes::GATE_FAILURE
    })
}
