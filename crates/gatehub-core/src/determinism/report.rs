//! Determinism report types and the durable evidence directory layout.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::descriptor::{content_hash, render_pretty};

/// One inspection's descriptor plus its derived canonical hash.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDescriptor {
    /// 1-based run index within its variant.
    pub run_index: usize,
    /// Structural metadata produced by the inspection.
    pub descriptor: Value,
    /// Canonical content hash of the descriptor.
    pub hash: String,
}

impl RunDescriptor {
    /// Wrap a raw descriptor, computing its canonical hash.
    #[must_use]
    pub fn new(run_index: usize, descriptor: Value) -> Self {
        let hash = content_hash(&descriptor);
        Self {
            run_index,
            descriptor,
            hash,
        }
    }
}

/// One run that diverged from its variant's baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// 1-based index of the diverging run.
    pub run_index: usize,
    /// Canonical hash of the diverging descriptor.
    pub hash: String,
    /// Human-readable diff against the baseline descriptor.
    pub diff: String,
}

/// Comparison result for one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantReport {
    /// Variant name.
    pub variant: String,
    /// Canonical hash of the first inspection.
    pub baseline_hash: String,
    /// `true` iff every run matched the baseline.
    pub consistent: bool,
    /// Runs that diverged, in run order.
    pub mismatched_runs: Vec<Mismatch>,
}

/// The consolidated determinism verdict for one artifact reference.
///
/// Every variant checked is listed, consistent ones included, so the
/// evidence trail is complete rather than failure-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminismReport {
    /// The artifact this report concerns.
    pub artifact_ref: String,
    /// Inspections performed per variant.
    pub runs_per_variant: usize,
    /// `true` iff zero mismatches across all variants.
    pub consistent: bool,
    /// Per-variant results, in declared order.
    pub variants: Vec<VariantReport>,
}

impl DeterminismReport {
    /// Names of inconsistent variants, for the top-line message.
    #[must_use]
    pub fn inconsistent_variants(&self) -> Vec<&str> {
        self.variants
            .iter()
            .filter(|v| !v.consistent)
            .map(|v| v.variant.as_str())
            .collect()
    }
}

/// Replace path-hostile characters so variant names can name files.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Write the durable evidence directory: one descriptor per (variant,
/// run), one diff per mismatch, and the consolidated report document.
///
/// # Errors
///
/// Returns an I/O error if the directory or any file cannot be written.
pub fn write_evidence(
    dir: &Path,
    report: &DeterminismReport,
    descriptors: &[(String, Vec<RunDescriptor>)],
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    for (variant, runs) in descriptors {
        let variant = sanitize(variant);
        for run in runs {
            let path = dir.join(format!("{variant}-run{}.descriptor.json", run.run_index));
            std::fs::write(path, render_pretty(&run.descriptor))?;
        }
    }
    for variant_report in &report.variants {
        let variant = sanitize(&variant_report.variant);
        for mismatch in &variant_report.mismatched_runs {
            let path = dir.join(format!("{variant}-run{}.diff", mismatch.run_index));
            std::fs::write(path, &mismatch.diff)?;
        }
    }
    let rendered = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    std::fs::write(dir.join("report.json"), rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn evidence_directory_holds_descriptors_diffs_and_report() {
        let dir = TempDir::new().unwrap();
        let runs = vec![
            RunDescriptor::new(1, json!({"size": 10})),
            RunDescriptor::new(2, json!({"size": 11})),
        ];
        let report = DeterminismReport {
            artifact_ref: "registry/widget:1.0".to_string(),
            runs_per_variant: 2,
            consistent: false,
            variants: vec![VariantReport {
                variant: "linux/amd64".to_string(),
                baseline_hash: runs[0].hash.clone(),
                consistent: false,
                mismatched_runs: vec![Mismatch {
                    run_index: 2,
                    hash: runs[1].hash.clone(),
                    diff: "@ line 2\n- 10\n+ 11\n".to_string(),
                }],
            }],
        };

        write_evidence(
            dir.path(),
            &report,
            &[("linux/amd64".to_string(), runs)],
        )
        .unwrap();

        assert!(dir.path().join("linux_amd64-run1.descriptor.json").exists());
        assert!(dir.path().join("linux_amd64-run2.descriptor.json").exists());
        assert!(dir.path().join("linux_amd64-run2.diff").exists());

        let raw = std::fs::read_to_string(dir.path().join("report.json")).unwrap();
        let round_trip: DeterminismReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(round_trip, report);
    }

    #[test]
    fn sanitizer_keeps_safe_characters() {
        assert_eq!(sanitize("linux/amd64"), "linux_amd64");
        assert_eq!(sanitize("default"), "default");
        assert_eq!(sanitize("v1.2-rc_3"), "v1.2-rc_3");
    }
}
