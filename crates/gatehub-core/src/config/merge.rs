//! Deep merge of ordered configuration layers.

use std::collections::HashMap;

use toml::Value;

use super::{ConfigLayer, ConfigProblem};

/// Identity fields that may never be overridden once a layer has set them.
///
/// A later layer re-stating the same value is allowed; a different value is
/// a resolution error, never a silent override.
pub const PROTECTED_FIELDS: &[&str] = &["org", "unit", "exec_path"];

/// Result of folding the layer stack: the merged document plus any
/// protected-field violations observed along the way.
pub(crate) struct MergeOutcome {
    pub merged: toml::Table,
    pub problems: Vec<ConfigProblem>,
}

/// Fold the layer stack left-to-right into one document.
///
/// Where both sides hold tables the merge recurses field by field; any other
/// pairing lets the later layer's value replace the earlier one entirely.
/// Lists are values, not containers to accumulate into: a later list
/// replaces an earlier one wholesale.
pub(crate) fn merge_layers(layers: &[ConfigLayer]) -> MergeOutcome {
    let mut merged = toml::Table::new();
    // First setter of each protected field: (layer name, value).
    let mut provenance: HashMap<&'static str, (String, Value)> = HashMap::new();
    let mut problems = Vec::new();

    for layer in layers {
        check_protected(layer, &mut provenance, &mut problems);
        deep_merge(&mut merged, &layer.document);
    }

    MergeOutcome { merged, problems }
}

fn check_protected(
    layer: &ConfigLayer,
    provenance: &mut HashMap<&'static str, (String, Value)>,
    problems: &mut Vec<ConfigProblem>,
) {
    for &field in PROTECTED_FIELDS {
        let Some(value) = layer.document.get(field) else {
            continue;
        };
        match provenance.get(field) {
            None => {
                provenance.insert(field, (layer.name.clone(), value.clone()));
            },
            Some((first_layer, first_value)) if first_value != value => {
                problems.push(ConfigProblem::ProtectedFieldOverride {
                    field: field.to_string(),
                    first_layer: first_layer.clone(),
                    first_value: first_value.to_string(),
                    layer: layer.name.clone(),
                    value: value.to_string(),
                });
            },
            Some(_) => {},
        }
    }
}

fn deep_merge(target: &mut toml::Table, layer: &toml::Table) {
    for (key, value) in layer {
        match (target.get_mut(key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            },
            _ => {
                target.insert(key.clone(), value.clone());
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &str, content: &str) -> ConfigLayer {
        ConfigLayer::from_toml(name, content).unwrap()
    }

    #[test]
    fn nested_tables_merge_field_by_field() {
        let outcome = merge_layers(&[
            layer("a", "[tools]\ntests = true\nlint = true"),
            layer("b", "[tools]\nlint = false"),
        ]);
        let tools = outcome.merged["tools"].as_table().unwrap();
        assert_eq!(tools["tests"], Value::Boolean(true));
        assert_eq!(tools["lint"], Value::Boolean(false));
    }

    #[test]
    fn lists_replace_rather_than_concatenate() {
        let outcome = merge_layers(&[
            layer("a", "steps = [\"one\", \"two\"]"),
            layer("b", "steps = [\"three\"]"),
        ]);
        let steps = outcome.merged["steps"].as_array().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0], Value::String("three".to_string()));
    }

    #[test]
    fn scalar_replaces_table_wholesale() {
        let outcome = merge_layers(&[
            layer("a", "[thresholds]\ncoverage_min = 70.0"),
            layer("b", "thresholds = false"),
        ]);
        assert_eq!(outcome.merged["thresholds"], Value::Boolean(false));
    }

    #[test]
    fn protected_violation_recorded_against_first_setter() {
        let outcome = merge_layers(&[
            layer("defaults", r#"org = "acme""#),
            layer("unit", r#"org = "acme""#),
            layer("local", r#"org = "other""#),
        ]);
        assert_eq!(outcome.problems.len(), 1);
        match &outcome.problems[0] {
            ConfigProblem::ProtectedFieldOverride {
                first_layer, layer, ..
            } => {
                assert_eq!(first_layer, "defaults");
                assert_eq!(layer, "local");
            },
            other => panic!("unexpected problem: {other:?}"),
        }
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        /// A small arbitrary document over a fixed key alphabet so layers
        /// actually collide with each other.
        fn arb_document() -> impl Strategy<Value = toml::Table> {
            let scalar = prop_oneof![
                any::<bool>().prop_map(Value::Boolean),
                (0i64..1000).prop_map(Value::Integer),
            ];
            let key = prop_oneof![
                Just("alpha".to_string()),
                Just("beta".to_string()),
                Just("gamma".to_string()),
            ];
            proptest::collection::btree_map(key.clone(), scalar.clone(), 0..3).prop_flat_map(
                move |nested| {
                    proptest::collection::btree_map(key.clone(), scalar.clone(), 0..3).prop_map(
                        move |top| {
                            let mut table: toml::Table =
                                top.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                            let nested_table: toml::Table = nested
                                .iter()
                                .map(|(k, v)| (k.clone(), v.clone()))
                                .collect();
                            table.insert("nested".to_string(), Value::Table(nested_table));
                            table
                        },
                    )
                },
            )
        }

        fn arb_layers() -> impl Strategy<Value = Vec<ConfigLayer>> {
            proptest::collection::vec(arb_document(), 1..5).prop_map(|docs| {
                docs.into_iter()
                    .enumerate()
                    .map(|(i, document)| ConfigLayer {
                        name: format!("layer-{i}"),
                        document,
                    })
                    .collect()
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            /// Merging the same layer stack twice yields identical bytes.
            #[test]
            fn prop_merge_is_deterministic(layers in arb_layers()) {
                let a = merge_layers(&layers).merged;
                let b = merge_layers(&layers).merged;
                prop_assert_eq!(
                    toml::to_string(&a).unwrap(),
                    toml::to_string(&b).unwrap()
                );
            }

            /// The last layer to set a scalar key wins.
            #[test]
            fn prop_last_scalar_writer_wins(layers in arb_layers()) {
                let merged = merge_layers(&layers).merged;
                for key in ["alpha", "beta", "gamma"] {
                    let last = layers
                        .iter()
                        .rev()
                        .find_map(|l| l.document.get(key));
                    prop_assert_eq!(merged.get(key), last);
                }
            }

            /// Two layers setting a protected field to different values
            /// always surface a violation naming that field.
            #[test]
            fn prop_protected_conflict_is_always_reported(
                first in "[a-z]{1,8}",
                second in "[a-z]{1,8}",
            ) {
                prop_assume!(first != second);
                let layers = vec![
                    ConfigLayer::from_toml("a", &format!("unit = \"{first}\"")).unwrap(),
                    ConfigLayer::from_toml("b", &format!("unit = \"{second}\"")).unwrap(),
                ];
                let outcome = merge_layers(&layers);
                let reported = outcome.problems.iter().any(|p| matches!(
                    p,
                    ConfigProblem::ProtectedFieldOverride { field, .. } if field == "unit"
                ));
                prop_assert!(reported);
            }
        }
    }
}
