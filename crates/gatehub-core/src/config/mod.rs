//! Layered configuration resolution.
//!
//! Each unit of work is configured by an ordered stack of TOML documents
//! (hub-wide defaults first, unit overrides later). [`resolve`] deep-merges
//! the stack field by field, enforces that protected identity fields are
//! never overridden once set, and validates the merged document against the
//! fixed tool/threshold schema. Every problem found in one resolution is
//! collected into a single [`ConfigError::Invalid`] so a user fixing
//! configuration sees the full list at once.
//!
//! How layers are stored is the caller's concern: the resolver only consumes
//! an ordered `&[ConfigLayer]`, supplied by a [`LayerSource`] such as the
//! filesystem-backed [`FsLayerSource`].

mod manifest;
mod merge;
mod schema;

pub use manifest::{FsLayerSource, HubManifest, HubSection, UnitEntry};
pub use merge::PROTECTED_FIELDS;
pub use schema::{EffectiveConfig, GateDirection, Metric, ThresholdKey, Tool};

use thiserror::Error;

/// One ordered configuration layer: a name for error reporting plus the
/// parsed TOML document.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    /// Human-readable origin of the layer (file path, "defaults", ...).
    pub name: String,

    /// The parsed document.
    pub document: toml::Table,
}

impl ConfigLayer {
    /// Parse a layer from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not valid TOML.
    pub fn from_toml(name: &str, content: &str) -> Result<Self, ConfigError> {
        let document = content
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::Parse {
                name: name.to_string(),
                source,
            })?;
        Ok(Self {
            name: name.to_string(),
            document,
        })
    }
}

/// Supplies the ordered layer stack for one unit.
///
/// Implementations own all storage concerns; the resolver only depends on
/// the relative precedence order being correct (defaults first, most
/// specific override last).
pub trait LayerSource {
    /// Return the ordered layers for `unit`, lowest precedence first.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit is unknown or a layer cannot be loaded.
    fn layers_for(&self, unit: &str) -> Result<Vec<ConfigLayer>, ConfigError>;
}

/// A single problem found during resolution.
///
/// Problems are collected, not short-circuited: one resolution reports
/// everything wrong with the layer stack.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigProblem {
    /// A protected identity field was set to a different value by a later
    /// layer.
    #[error(
        "protected field '{field}' set to {value} by layer '{layer}' but already set to \
         {first_value} by layer '{first_layer}'"
    )]
    ProtectedFieldOverride {
        /// The protected field name.
        field: String,
        /// The layer that first defined the field.
        first_layer: String,
        /// The value set by the first layer.
        first_value: String,
        /// The offending layer.
        layer: String,
        /// The conflicting value.
        value: String,
    },

    /// A top-level key outside the schema.
    #[error("unknown configuration key '{key}'")]
    UnknownKey {
        /// The unrecognized key.
        key: String,
    },

    /// A tool name that is not in the fixed tool set. Catches typos at
    /// config time instead of at aggregation time.
    #[error("unknown tool '{name}' (known tools: {known})", known = Tool::known_names())]
    UnknownTool {
        /// The unrecognized tool name.
        name: String,
    },

    /// A threshold name that is not in the fixed threshold set.
    #[error("unknown threshold '{name}'")]
    UnknownThreshold {
        /// The unrecognized threshold name.
        name: String,
    },

    /// A value of the wrong TOML type.
    #[error("key '{key}' must be {expected}")]
    IllTyped {
        /// The offending key.
        key: String,
        /// Description of the expected type.
        expected: &'static str,
    },

    /// A numeric threshold outside its valid range.
    #[error("threshold '{key}' out of range: {value} not in [{min}, {max}]")]
    ThresholdOutOfRange {
        /// The threshold key.
        key: ThresholdKey,
        /// The rejected value.
        value: f64,
        /// Lower bound (inclusive).
        min: f64,
        /// Upper bound (inclusive).
        max: f64,
    },

    /// A required identity field absent from every layer.
    #[error("required field '{field}' is not set by any layer")]
    MissingField {
        /// The missing field name.
        field: &'static str,
    },

    /// The `[dispatch]` section failed to deserialize.
    #[error("invalid [dispatch] section: {detail}")]
    InvalidDispatchSection {
        /// Deserialization failure detail.
        detail: String,
    },
}

/// Configuration resolution error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error loading a layer.
    #[error("failed to read configuration layer: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error in one layer.
    #[error("failed to parse configuration layer '{name}': {source}")]
    Parse {
        /// The layer that failed to parse.
        name: String,
        /// The underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// The unit is not declared in the hub manifest.
    #[error("unknown unit '{name}'")]
    UnknownUnit {
        /// The requested unit name.
        name: String,
    },

    /// The merged document violates the schema or protection rules. Carries
    /// every problem found in this resolution.
    #[error("configuration invalid: {} problem(s)", problems.len())]
    Invalid {
        /// All problems found, in detection order.
        problems: Vec<ConfigProblem>,
    },
}

/// Resolve an ordered layer stack into one effective configuration.
///
/// The merge is a left-to-right fold: where both sides hold tables the merge
/// recurses; otherwise the later layer's value replaces the earlier one
/// entirely (lists included — lists are never concatenated). Protected
/// fields and schema validity are checked against the fully merged document.
///
/// Resolution is deterministic: the same layer sequence always yields a
/// byte-identical serialized [`EffectiveConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] carrying every protection and schema
/// problem found.
pub fn resolve(layers: &[ConfigLayer]) -> Result<EffectiveConfig, ConfigError> {
    let merge::MergeOutcome {
        merged,
        mut problems,
    } = merge::merge_layers(layers);

    let effective = schema::validate(&merged, &mut problems);

    match effective {
        Some(config) if problems.is_empty() => {
            tracing::debug!(unit = %config.unit, layers = layers.len(), "configuration resolved");
            Ok(config)
        },
        _ => Err(ConfigError::Invalid { problems }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &str, content: &str) -> ConfigLayer {
        ConfigLayer::from_toml(name, content).unwrap()
    }

    fn base_layers() -> Vec<ConfigLayer> {
        vec![
            layer(
                "defaults",
                r#"
                org = "acme"
                exec_path = "ci/run-checks"

                [tools]
                tests = true
                lint = true

                [thresholds]
                coverage_min = 70.0
                mutation_min = 70.0
                "#,
            ),
            layer(
                "unit",
                r#"
                unit = "repo-a"

                [thresholds]
                coverage_min = 85.0
                "#,
            ),
        ]
    }

    #[test]
    fn unit_override_replaces_only_named_threshold() {
        let config = resolve(&base_layers()).unwrap();
        assert_eq!(config.thresholds[&ThresholdKey::CoverageMin], 85.0);
        assert_eq!(config.thresholds[&ThresholdKey::MutationMin], 70.0);
    }

    #[test]
    fn resolution_is_deterministic() {
        let a = resolve(&base_layers()).unwrap();
        let b = resolve(&base_layers()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn protected_field_override_names_the_field() {
        let mut layers = base_layers();
        layers.push(layer("local", r#"org = "intruder""#));

        let err = resolve(&layers).unwrap_err();
        let ConfigError::Invalid { problems } = err else {
            panic!("expected Invalid, got {err:?}");
        };
        assert_eq!(problems.len(), 1);
        match &problems[0] {
            ConfigProblem::ProtectedFieldOverride {
                field,
                first_layer,
                layer,
                ..
            } => {
                assert_eq!(field, "org");
                assert_eq!(first_layer, "defaults");
                assert_eq!(layer, "local");
            },
            other => panic!("expected ProtectedFieldOverride, got {other:?}"),
        }
    }

    #[test]
    fn protected_field_reset_to_equal_value_is_allowed() {
        let mut layers = base_layers();
        layers.push(layer("local", r#"org = "acme""#));
        assert!(resolve(&layers).is_ok());
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let mut layers = base_layers();
        layers.push(layer(
            "local",
            r#"
            [tools]
            lnit = true
            "#,
        ));

        let err = resolve(&layers).unwrap_err();
        let ConfigError::Invalid { problems } = err else {
            panic!("expected Invalid, got {err:?}");
        };
        assert!(problems
            .iter()
            .any(|p| matches!(p, ConfigProblem::UnknownTool { name } if name == "lnit")));
    }

    #[test]
    fn all_problems_reported_in_one_pass() {
        let layers = vec![layer(
            "only",
            r#"
            org = "acme"
            surprise = 1

            [tools]
            lnit = true

            [thresholds]
            coverage_min = 140.0
            "#,
        )];

        let err = resolve(&layers).unwrap_err();
        let ConfigError::Invalid { problems } = err else {
            panic!("expected Invalid, got {err:?}");
        };
        // unknown key, unknown tool, out-of-range threshold, and the two
        // missing identity fields all surface together.
        assert_eq!(problems.len(), 5, "problems: {problems:?}");
    }

    #[test]
    fn nan_threshold_fails_resolution() {
        let mut layers = base_layers();
        layers.push(layer(
            "local",
            r#"
            [thresholds]
            coverage_min = nan
            "#,
        ));
        assert!(matches!(
            resolve(&layers),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn percentage_threshold_range_is_enforced() {
        let mut layers = base_layers();
        layers.push(layer(
            "local",
            r#"
            [thresholds]
            coverage_min = -3.0
            "#,
        ));

        let err = resolve(&layers).unwrap_err();
        let ConfigError::Invalid { problems } = err else {
            panic!("expected Invalid, got {err:?}");
        };
        assert!(matches!(
            problems[0],
            ConfigProblem::ThresholdOutOfRange {
                key: ThresholdKey::CoverageMin,
                ..
            }
        ));
    }
}
