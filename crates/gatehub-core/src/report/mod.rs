//! Report aggregation: reconcile run records and result records into one
//! verdict.
//!
//! Aggregation is a pure, idempotent function of its inputs. It never
//! retries or re-dispatches (retry policy belongs to dispatch), and it
//! never throws for broken remote runs: terminal run states and missing or
//! malformed evidence are expected operational data, turned into failing
//! per-unit outcomes with reasons.
//!
//! Per unit, the checks run in pipeline order: terminal run state, then
//! evidence presence, then the drift check, then tool success, then the
//! threshold gates. The first reason attached to an outcome is therefore
//! the most upstream one, which keeps the top-line message actionable.

mod record;
mod verdict;

pub use record::{ingest, IngestError, ResultRecord, SCHEMA_VERSION};
pub use verdict::{DriftKind, DriftWarning, FailReason, UnitOutcome, Verdict};

use crate::config::{GateDirection, ThresholdKey, Tool};
use crate::dispatch::{RunRecord, RunState};

/// Aggregate terminal run records and their fetched results into one
/// verdict.
///
/// Callers must only pass terminal records; non-terminal input is a
/// caller contract violation, not handled defensively.
#[must_use]
pub fn aggregate(records: &[(RunRecord, Option<ResultRecord>)]) -> Verdict {
    let units: Vec<UnitOutcome> = records
        .iter()
        .map(|(run, result)| aggregate_unit(run, result.as_ref()))
        .collect();
    let passed = units.iter().all(|u| u.passed);
    Verdict { passed, units }
}

fn aggregate_unit(run: &RunRecord, result: Option<&ResultRecord>) -> UnitOutcome {
    debug_assert!(run.is_terminal(), "aggregation requires terminal records");

    let mut reasons = Vec::new();
    let mut drift = Vec::new();

    match run.state {
        RunState::Succeeded => match result {
            Some(record) => {
                check_drift(record, &mut drift);
                check_tools(record, &mut reasons);
                check_gates(record, &mut reasons);
            },
            None => reasons.push(FailReason::MissingEvidence),
        },
        RunState::Failed => reasons.push(FailReason::RunFailed {
            detail: run.reason.clone(),
        }),
        RunState::TimedOut => reasons.push(FailReason::RunTimedOut),
        RunState::Cancelled => reasons.push(FailReason::RunCancelled),
        RunState::Pending | RunState::Running => {
            debug_assert!(false, "non-terminal record reached aggregation");
            reasons.push(FailReason::RunFailed {
                detail: Some("run record never reached a terminal state".to_string()),
            });
        },
    }

    if !drift.is_empty() {
        tracing::warn!(unit = %run.unit, count = drift.len(), "drift detected");
    }

    UnitOutcome {
        unit: run.unit.clone(),
        passed: reasons.is_empty(),
        reasons,
        drift,
    }
}

/// Verify `ran → configured` and `success → ran` for every tool. Drift is
/// surfaced on the outcome but does not by itself fail a gate.
fn check_drift(record: &ResultRecord, drift: &mut Vec<DriftWarning>) {
    for tool in Tool::ALL {
        let configured = ResultRecord::flag(&record.configured, tool);
        let ran = ResultRecord::flag(&record.ran, tool);
        let success = ResultRecord::flag(&record.success, tool);
        if ran && !configured {
            drift.push(DriftWarning {
                tool,
                kind: DriftKind::RanUnconfigured,
            });
        }
        if success && !ran {
            drift.push(DriftWarning {
                tool,
                kind: DriftKind::SuccessWithoutRan,
            });
        }
        if configured && !ran {
            drift.push(DriftWarning {
                tool,
                kind: DriftKind::ConfiguredNotRan,
            });
        }
    }
}

/// A configured tool that ran must have reported success. A tool that is
/// not configured is excluded entirely; absence is not failure.
fn check_tools(record: &ResultRecord, reasons: &mut Vec<FailReason>) {
    for tool in Tool::ALL {
        let configured = ResultRecord::flag(&record.configured, tool);
        let ran = ResultRecord::flag(&record.ran, tool);
        if configured && ran && !ResultRecord::flag(&record.success, tool) {
            reasons.push(FailReason::ToolFailed { tool });
        }
    }
}

/// Evaluate every threshold in the snapshot against its metric, in
/// canonical key order so identical inputs produce identical verdicts.
fn check_gates(record: &ResultRecord, reasons: &mut Vec<FailReason>) {
    for key in ThresholdKey::ALL {
        let Some(&threshold) = record.thresholds.get(&key) else {
            continue;
        };
        let Some(&value) = record.metrics.get(&key.metric()) else {
            reasons.push(FailReason::MetricMissing { key });
            continue;
        };
        let violated = match key.direction() {
            GateDirection::AtLeast => value < threshold,
            GateDirection::AtMost => value > threshold,
        };
        if violated {
            reasons.push(FailReason::GateViolated {
                key,
                value,
                threshold,
            });
        }
    }
}
