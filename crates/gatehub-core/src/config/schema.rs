//! Fixed schema for the merged configuration document.
//!
//! Tool and threshold names are closed enumerations rather than open
//! string-keyed maps, so a typo in a layer fails resolution instead of
//! silently configuring nothing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ConfigProblem;
use crate::dispatch::DispatchSettings;

/// The fixed set of tools the hub can configure for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// Unit/integration test suite.
    Tests,
    /// Style and correctness lints.
    Lint,
    /// Coverage measurement.
    Coverage,
    /// Mutation testing.
    Mutation,
    /// Dependency vulnerability audit.
    Audit,
}

impl Tool {
    /// All known tools, in canonical order.
    pub const ALL: [Self; 5] = [
        Self::Tests,
        Self::Lint,
        Self::Coverage,
        Self::Mutation,
        Self::Audit,
    ];

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tests => "tests",
            Self::Lint => "lint",
            Self::Coverage => "coverage",
            Self::Mutation => "mutation",
            Self::Audit => "audit",
        }
    }

    /// Comma-separated list of every known tool name, for error messages.
    #[must_use]
    pub fn known_names() -> String {
        Self::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for Tool {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A measured quantity reported by a unit's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Line coverage percentage.
    Coverage,
    /// Mutation testing score percentage.
    MutationScore,
    /// Open defect count.
    Defects,
    /// Known vulnerability count.
    Vulnerabilities,
}

impl Metric {
    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Coverage => "coverage",
            Self::MutationScore => "mutation_score",
            Self::Defects => "defects",
            Self::Vulnerabilities => "vulnerabilities",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison direction of one gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDirection {
    /// The metric must be at least the threshold.
    AtLeast,
    /// The metric must be at most the threshold.
    AtMost,
}

/// A configurable numeric gate, tying a metric to a comparison direction
/// and a valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKey {
    /// Minimum required coverage percentage.
    CoverageMin,
    /// Minimum required mutation score percentage.
    MutationMin,
    /// Maximum allowed defect count.
    MaxDefects,
    /// Maximum allowed vulnerability count.
    MaxVulnerabilities,
}

impl ThresholdKey {
    /// All known threshold keys, in canonical order.
    pub const ALL: [Self; 4] = [
        Self::CoverageMin,
        Self::MutationMin,
        Self::MaxDefects,
        Self::MaxVulnerabilities,
    ];

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CoverageMin => "coverage_min",
            Self::MutationMin => "mutation_min",
            Self::MaxDefects => "max_defects",
            Self::MaxVulnerabilities => "max_vulnerabilities",
        }
    }

    /// The metric this threshold gates.
    #[must_use]
    pub const fn metric(self) -> Metric {
        match self {
            Self::CoverageMin => Metric::Coverage,
            Self::MutationMin => Metric::MutationScore,
            Self::MaxDefects => Metric::Defects,
            Self::MaxVulnerabilities => Metric::Vulnerabilities,
        }
    }

    /// Whether the gated metric must stay above or below the threshold.
    #[must_use]
    pub const fn direction(self) -> GateDirection {
        match self {
            Self::CoverageMin | Self::MutationMin => GateDirection::AtLeast,
            Self::MaxDefects | Self::MaxVulnerabilities => GateDirection::AtMost,
        }
    }

    /// Inclusive valid range for the threshold value.
    #[must_use]
    pub const fn range(self) -> (f64, f64) {
        match self {
            Self::CoverageMin | Self::MutationMin => (0.0, 100.0),
            Self::MaxDefects | Self::MaxVulnerabilities => (0.0, f64::MAX),
        }
    }
}

impl FromStr for ThresholdKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for ThresholdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single merged, schema-validated configuration for one unit of work.
///
/// Produced by [`super::resolve`]; consumed read-only by the dispatch
/// coordinator and the report aggregator. All maps are ordered so that
/// serialization is byte-stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Owning organization (protected identity field).
    pub org: String,

    /// Unit name (protected identity field).
    pub unit: String,

    /// Target execution path on the remote side (protected identity field).
    pub exec_path: String,

    /// Tool toggles. Tools absent from the map are not configured.
    #[serde(default)]
    pub tools: BTreeMap<Tool, bool>,

    /// Numeric gate thresholds in force for this unit.
    #[serde(default)]
    pub thresholds: BTreeMap<ThresholdKey, f64>,

    /// Dispatch timeout and poll backoff budgets.
    #[serde(default)]
    pub dispatch: DispatchSettings,
}

impl EffectiveConfig {
    /// Whether a tool is enabled for this unit.
    #[must_use]
    pub fn tool_enabled(&self, tool: Tool) -> bool {
        self.tools.get(&tool).copied().unwrap_or(false)
    }
}

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["org", "unit", "exec_path", "tools", "thresholds", "dispatch"];

/// Validate the fully merged document, appending every problem found.
///
/// Returns the effective configuration when the identity fields could be
/// extracted; the caller still fails resolution if `problems` is non-empty.
pub(crate) fn validate(
    merged: &toml::Table,
    problems: &mut Vec<ConfigProblem>,
) -> Option<EffectiveConfig> {
    for key in merged.keys() {
        if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
            problems.push(ConfigProblem::UnknownKey { key: key.clone() });
        }
    }

    let org = required_string(merged, "org", problems);
    let unit = required_string(merged, "unit", problems);
    let exec_path = required_string(merged, "exec_path", problems);

    let tools = validate_tools(merged, problems);
    let thresholds = validate_thresholds(merged, problems);
    let dispatch = validate_dispatch(merged, problems);

    Some(EffectiveConfig {
        org: org?,
        unit: unit?,
        exec_path: exec_path?,
        tools,
        thresholds,
        dispatch,
    })
}

fn required_string(
    merged: &toml::Table,
    field: &'static str,
    problems: &mut Vec<ConfigProblem>,
) -> Option<String> {
    match merged.get(field) {
        None => {
            problems.push(ConfigProblem::MissingField { field });
            None
        },
        Some(toml::Value::String(s)) => Some(s.clone()),
        Some(_) => {
            problems.push(ConfigProblem::IllTyped {
                key: field.to_string(),
                expected: "a string",
            });
            None
        },
    }
}

fn validate_tools(merged: &toml::Table, problems: &mut Vec<ConfigProblem>) -> BTreeMap<Tool, bool> {
    let mut tools = BTreeMap::new();
    let Some(value) = merged.get("tools") else {
        return tools;
    };
    let Some(table) = value.as_table() else {
        problems.push(ConfigProblem::IllTyped {
            key: "tools".to_string(),
            expected: "a table of tool name to boolean",
        });
        return tools;
    };
    for (name, value) in table {
        let Ok(tool) = Tool::from_str(name) else {
            problems.push(ConfigProblem::UnknownTool { name: name.clone() });
            continue;
        };
        match value.as_bool() {
            Some(enabled) => {
                tools.insert(tool, enabled);
            },
            None => problems.push(ConfigProblem::IllTyped {
                key: format!("tools.{name}"),
                expected: "a boolean",
            }),
        }
    }
    tools
}

fn validate_thresholds(
    merged: &toml::Table,
    problems: &mut Vec<ConfigProblem>,
) -> BTreeMap<ThresholdKey, f64> {
    let mut thresholds = BTreeMap::new();
    let Some(value) = merged.get("thresholds") else {
        return thresholds;
    };
    let Some(table) = value.as_table() else {
        problems.push(ConfigProblem::IllTyped {
            key: "thresholds".to_string(),
            expected: "a table of threshold name to number",
        });
        return thresholds;
    };
    for (name, value) in table {
        let Ok(key) = ThresholdKey::from_str(name) else {
            problems.push(ConfigProblem::UnknownThreshold { name: name.clone() });
            continue;
        };
        let number = match value {
            toml::Value::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)] // thresholds are small counts
            toml::Value::Integer(i) => Some(*i as f64),
            _ => None,
        };
        let Some(number) = number else {
            problems.push(ConfigProblem::IllTyped {
                key: format!("thresholds.{name}"),
                expected: "a number",
            });
            continue;
        };
        let (min, max) = key.range();
        // NaN compares false against both bounds; a NaN threshold would
        // silently disarm its gate downstream.
        if !number.is_finite() || number < min || number > max {
            problems.push(ConfigProblem::ThresholdOutOfRange {
                key,
                value: number,
                min,
                max,
            });
            continue;
        }
        thresholds.insert(key, number);
    }
    thresholds
}

fn validate_dispatch(merged: &toml::Table, problems: &mut Vec<ConfigProblem>) -> DispatchSettings {
    let Some(value) = merged.get("dispatch") else {
        return DispatchSettings::default();
    };
    match value.clone().try_into::<DispatchSettings>() {
        Ok(settings) => {
            // A multiplier below 1.0 would shrink (or, negative, invert)
            // the poll delay; the backoff contract is non-decreasing.
            let multiplier = settings.backoff.multiplier;
            if !multiplier.is_finite() || multiplier < 1.0 {
                problems.push(ConfigProblem::InvalidDispatchSection {
                    detail: format!("backoff.multiplier must be a finite number >= 1.0, got {multiplier}"),
                });
                return DispatchSettings::default();
            }
            settings
        },
        Err(err) => {
            problems.push(ConfigProblem::InvalidDispatchSection {
                detail: err.to_string(),
            });
            DispatchSettings::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn validated(content: &str) -> (Option<EffectiveConfig>, Vec<ConfigProblem>) {
        let table = content.parse::<toml::Table>().unwrap();
        let mut problems = Vec::new();
        let config = validate(&table, &mut problems);
        (config, problems)
    }

    const MINIMAL: &str = r#"
        org = "acme"
        unit = "repo-a"
        exec_path = "ci/run-checks"
    "#;

    #[test]
    fn minimal_document_validates() {
        let (config, problems) = validated(MINIMAL);
        assert!(problems.is_empty());
        let config = config.unwrap();
        assert_eq!(config.unit, "repo-a");
        assert!(config.tools.is_empty());
    }

    #[test]
    fn integer_thresholds_are_accepted() {
        let (config, problems) = validated(&format!(
            "{MINIMAL}\n[thresholds]\nmax_vulnerabilities = 0\ncoverage_min = 70"
        ));
        assert!(problems.is_empty(), "{problems:?}");
        let config = config.unwrap();
        assert_eq!(config.thresholds[&ThresholdKey::MaxVulnerabilities], 0.0);
        assert_eq!(config.thresholds[&ThresholdKey::CoverageMin], 70.0);
    }

    #[test]
    fn dispatch_section_round_trips() {
        let (config, problems) = validated(&format!(
            "{MINIMAL}\n[dispatch]\ntimeout = \"10m\"\n[dispatch.backoff]\ninitial_delay = \"1s\""
        ));
        assert!(problems.is_empty(), "{problems:?}");
        assert_eq!(
            config.unwrap().dispatch.timeout,
            Duration::from_secs(600)
        );
    }

    #[test]
    fn unknown_dispatch_key_is_a_problem() {
        let (_, problems) = validated(&format!("{MINIMAL}\n[dispatch]\nretries = 4"));
        assert!(matches!(
            problems[0],
            ConfigProblem::InvalidDispatchSection { .. }
        ));
    }

    #[test]
    fn shrinking_or_non_finite_backoff_multiplier_is_a_problem() {
        for multiplier in ["-2.0", "0.0", "0.5", "nan", "inf"] {
            let (config, problems) = validated(&format!(
                "{MINIMAL}\n[dispatch.backoff]\nmultiplier = {multiplier}"
            ));
            assert!(
                matches!(
                    problems.first(),
                    Some(ConfigProblem::InvalidDispatchSection { .. })
                ),
                "multiplier {multiplier}: {problems:?}"
            );
            // The section is replaced wholesale, not partially applied.
            assert_eq!(config.unwrap().dispatch, DispatchSettings::default());
        }
    }

    #[test]
    fn non_finite_thresholds_are_out_of_range() {
        for value in ["nan", "inf", "-inf"] {
            let (_, problems) = validated(&format!(
                "{MINIMAL}\n[thresholds]\ncoverage_min = {value}"
            ));
            assert!(
                matches!(
                    problems.first(),
                    Some(ConfigProblem::ThresholdOutOfRange {
                        key: ThresholdKey::CoverageMin,
                        ..
                    })
                ),
                "value {value}: {problems:?}"
            );
        }
    }

    #[test]
    fn tool_toggle_must_be_boolean() {
        let (_, problems) = validated(&format!("{MINIMAL}\n[tools]\ntests = \"yes\""));
        assert!(matches!(problems[0], ConfigProblem::IllTyped { .. }));
    }
}
