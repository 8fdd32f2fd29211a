//! Verdict types: per-unit outcomes, failure reasons, and drift warnings.

use serde::{Deserialize, Serialize};

use crate::config::{ThresholdKey, Tool};

/// Why one unit failed.
///
/// Ordered roughly by how early in the pipeline the failure occurred, so
/// the first reason attached to an outcome is the most upstream one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailReason {
    /// The run ended in the `failed` state.
    RunFailed {
        /// Rejection or remote failure detail, if recorded.
        detail: Option<String>,
    },
    /// The run exhausted its timeout budget.
    RunTimedOut,
    /// The run was cancelled before a terminal remote status.
    RunCancelled,
    /// The run succeeded but no result record could be fetched. A
    /// successful remote run with no retrievable result is untrustworthy,
    /// never an implicit pass.
    MissingEvidence,
    /// A configured tool ran and failed its own internal gate, or ran
    /// without reporting success at all.
    ToolFailed {
        /// The failing tool.
        tool: Tool,
    },
    /// A gated metric violated its threshold.
    GateViolated {
        /// The violated gate.
        key: ThresholdKey,
        /// The measured value.
        value: f64,
        /// The threshold in force.
        threshold: f64,
    },
    /// A threshold was in force but the run reported no value for its
    /// metric, so the gate cannot be evaluated.
    MetricMissing {
        /// The unevaluable gate.
        key: ThresholdKey,
    },
}

impl FailReason {
    /// Whether this reason indicates broken pipeline infrastructure rather
    /// than a failing gate. Automation uses this split to distinguish "the
    /// code is bad" from "the pipeline is broken".
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::RunFailed { .. }
                | Self::RunTimedOut
                | Self::RunCancelled
                | Self::MissingEvidence
        )
    }
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunFailed { detail: Some(d) } => write!(f, "run failed: {d}"),
            Self::RunFailed { detail: None } => f.write_str("run failed"),
            Self::RunTimedOut => f.write_str("run timed out"),
            Self::RunCancelled => f.write_str("run cancelled"),
            Self::MissingEvidence => f.write_str("missing evidence"),
            Self::ToolFailed { tool } => write!(f, "tool {tool} failed"),
            Self::GateViolated {
                key,
                value,
                threshold,
            } => write!(f, "gate {key} violated: {value} vs threshold {threshold}"),
            Self::MetricMissing { key } => {
                write!(f, "gate {key} unevaluable: metric {} missing", key.metric())
            },
        }
    }
}

/// The shape of one observed configured/ran/success inconsistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// `ran=true` for a tool with `configured=false`.
    RanUnconfigured,
    /// `success=true` for a tool with `ran=false`.
    SuccessWithoutRan,
    /// `configured=true` but the tool never ran. Drift only, not a gate
    /// failure: the tool was not gated on success because it produced none.
    ConfiguredNotRan,
}

impl DriftKind {
    const fn describe(self) -> &'static str {
        match self {
            Self::RanUnconfigured => "ran without being configured",
            Self::SuccessWithoutRan => "reported success without running",
            Self::ConfiguredNotRan => "configured but never ran",
        }
    }
}

/// One drift observation for one tool, surfaced but never swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftWarning {
    /// The tool the inconsistency concerns.
    pub tool: Tool,
    /// The shape of the inconsistency.
    pub kind: DriftKind,
}

impl std::fmt::Display for DriftWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tool {} {}", self.tool, self.kind.describe())
    }
}

/// One unit's aggregated outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    /// The unit this outcome belongs to.
    pub unit: String,

    /// Whether the unit passed every gate.
    pub passed: bool,

    /// Every failure reason, most upstream first. Empty iff `passed`.
    pub reasons: Vec<FailReason>,

    /// Drift observations. May be non-empty even for passing units.
    pub drift: Vec<DriftWarning>,
}

impl UnitOutcome {
    /// The first (most upstream) failure reason, if any.
    #[must_use]
    pub fn first_reason(&self) -> Option<&FailReason> {
        self.reasons.first()
    }
}

/// The consolidated output of one aggregation pass. Immutable once
/// emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// `true` only if every unit passed.
    pub passed: bool,

    /// Per-unit outcomes in input order.
    pub units: Vec<UnitOutcome>,
}

impl Verdict {
    /// Failing units with their first violated gate, for the top-line
    /// message.
    #[must_use]
    pub fn failing_summaries(&self) -> Vec<(String, String)> {
        self.units
            .iter()
            .filter(|u| !u.passed)
            .map(|u| {
                let reason = u
                    .first_reason()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string);
                (u.unit.clone(), reason)
            })
            .collect()
    }

    /// Whether any failing unit failed for infrastructure reasons rather
    /// than gates.
    #[must_use]
    pub fn has_infrastructure_failure(&self) -> bool {
        self.units
            .iter()
            .filter(|u| !u.passed)
            .any(|u| u.reasons.iter().any(FailReason::is_infrastructure))
    }
}
