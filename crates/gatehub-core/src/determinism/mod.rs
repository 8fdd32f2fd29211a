//! Determinism verification: repeated independent artifact inspections.
//!
//! An artifact is reproducible when every inspection of it yields the same
//! canonical content descriptor. The verifier inspects each declared
//! variant `runs_per_variant` times, takes the first inspection as the
//! baseline, and records a diff for every diverging run. Determinism is
//! never asserted from a single sample: fewer than
//! [`MIN_RUNS_PER_VARIANT`] runs is an error, and an uninspectable variant
//! fails the whole verification rather than being skipped into a
//! false "consistent".
//!
//! Runs of one variant are strictly sequential with a fixed inter-run
//! delay, so eventual-consistency artifacts on the inspected side settle
//! between samples. Different variants run concurrently.

mod descriptor;
mod report;

pub use descriptor::{canonicalize, content_hash, line_diff, render_pretty};
pub use report::{
    write_evidence, DeterminismReport, Mismatch, RunDescriptor, VariantReport,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Fewest inspections from which consistency may be asserted.
pub const MIN_RUNS_PER_VARIANT: usize = 2;

/// Variant name used when none are declared.
pub const DEFAULT_VARIANT: &str = "default";

/// Failure to produce a descriptor for one inspection.
#[derive(Debug, Error)]
pub enum InspectError {
    /// The artifact or variant could not be reached or does not exist.
    #[error("artifact unavailable: {0}")]
    Unavailable(String),

    /// A descriptor was produced but could not be interpreted.
    #[error("malformed descriptor: {0}")]
    Malformed(String),
}

/// Produces one structural descriptor per inspection of an artifact.
#[async_trait]
pub trait ArtifactInspector: Send + Sync {
    /// Inspect `artifact_ref` as built for `variant`.
    ///
    /// # Errors
    ///
    /// Returns [`InspectError`] if no descriptor can be produced; the
    /// verifier treats this as a hard error for the whole verification.
    async fn inspect(&self, artifact_ref: &str, variant: &str) -> Result<Value, InspectError>;
}

/// Failure modes of one verification pass.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// `runs_per_variant` was below [`MIN_RUNS_PER_VARIANT`].
    #[error("runs_per_variant must be at least {MIN_RUNS_PER_VARIANT}, got {requested}")]
    InsufficientRuns {
        /// The rejected run count.
        requested: usize,
    },

    /// An inspection failed. A variant that cannot be checked must not be
    /// reported as consistent by omission.
    #[error("inspection of variant {variant} run {run_index} failed: {source}")]
    Inspection {
        /// The variant whose inspection failed.
        variant: String,
        /// 1-based index of the failed run.
        run_index: usize,
        /// The underlying inspection failure.
        source: InspectError,
    },

    /// A variant's inspection task aborted.
    #[error("verification task for variant {variant} aborted")]
    Aborted {
        /// The variant whose task aborted.
        variant: String,
    },
}

/// The full output of one verification: the consolidated report plus every
/// raw descriptor, ready for [`write_evidence`].
#[derive(Debug)]
pub struct Verification {
    /// The consolidated verdict.
    pub report: DeterminismReport,
    /// Raw descriptors per variant, in declared order.
    pub descriptors: Vec<(String, Vec<RunDescriptor>)>,
}

/// Drives repeated inspections through an [`ArtifactInspector`].
pub struct Verifier<I> {
    inspector: Arc<I>,
    inter_run_delay: Duration,
}

impl<I: ArtifactInspector + 'static> Verifier<I> {
    /// Create a verifier with a fixed delay between runs of one variant.
    #[must_use]
    pub fn new(inspector: Arc<I>, inter_run_delay: Duration) -> Self {
        Self {
            inspector,
            inter_run_delay,
        }
    }

    /// Verify reproducibility of `artifact_ref` across `variants`.
    ///
    /// With no variants declared, a single [`DEFAULT_VARIANT`] is checked.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError`] if `runs_per_variant` is below the minimum
    /// or any inspection fails.
    pub async fn verify(
        &self,
        artifact_ref: &str,
        variants: &[String],
        runs_per_variant: usize,
    ) -> Result<Verification, VerifyError> {
        if runs_per_variant < MIN_RUNS_PER_VARIANT {
            return Err(VerifyError::InsufficientRuns {
                requested: runs_per_variant,
            });
        }

        let variants: Vec<String> = if variants.is_empty() {
            vec![DEFAULT_VARIANT.to_string()]
        } else {
            variants.to_vec()
        };

        let mut set = tokio::task::JoinSet::new();
        for (index, variant) in variants.iter().cloned().enumerate() {
            let inspector = Arc::clone(&self.inspector);
            let artifact_ref = artifact_ref.to_string();
            let delay = self.inter_run_delay;
            set.spawn(async move {
                let outcome =
                    inspect_variant(&*inspector, &artifact_ref, &variant, runs_per_variant, delay)
                        .await;
                (index, variant, outcome)
            });
        }

        let mut slots: Vec<Option<(String, Vec<RunDescriptor>)>> = Vec::new();
        slots.resize_with(variants.len(), || None);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, variant, Ok(runs))) => slots[index] = Some((variant, runs)),
                Ok((_, variant, Err((run_index, source)))) => {
                    // Abort the remaining variants; the verification is
                    // already a hard failure.
                    set.abort_all();
                    return Err(VerifyError::Inspection {
                        variant,
                        run_index,
                        source,
                    });
                },
                Err(_) => {
                    set.abort_all();
                    return Err(VerifyError::Aborted {
                        variant: "unknown".to_string(),
                    });
                },
            }
        }

        let descriptors: Vec<(String, Vec<RunDescriptor>)> = slots
            .into_iter()
            .zip(&variants)
            .map(|(slot, variant)| match slot {
                Some(entry) => Ok(entry),
                None => Err(VerifyError::Aborted {
                    variant: variant.clone(),
                }),
            })
            .collect::<Result<_, _>>()?;

        let variant_reports: Vec<VariantReport> = descriptors
            .iter()
            .map(|(variant, runs)| compare_runs(variant, runs))
            .collect();
        let consistent = variant_reports.iter().all(|v| v.consistent);

        if !consistent {
            tracing::warn!(
                artifact_ref,
                variants = ?variant_reports
                    .iter()
                    .filter(|v| !v.consistent)
                    .map(|v| v.variant.as_str())
                    .collect::<Vec<_>>(),
                "artifact is not reproducible"
            );
        }

        Ok(Verification {
            report: DeterminismReport {
                artifact_ref: artifact_ref.to_string(),
                runs_per_variant,
                consistent,
                variants: variant_reports,
            },
            descriptors,
        })
    }
}

/// Run the strictly sequential inspections for one variant.
async fn inspect_variant<I: ArtifactInspector>(
    inspector: &I,
    artifact_ref: &str,
    variant: &str,
    runs_per_variant: usize,
    inter_run_delay: Duration,
) -> Result<Vec<RunDescriptor>, (usize, InspectError)> {
    let mut runs = Vec::with_capacity(runs_per_variant);
    for run_index in 1..=runs_per_variant {
        if run_index > 1 {
            tokio::time::sleep(inter_run_delay).await;
        }
        let descriptor = inspector
            .inspect(artifact_ref, variant)
            .await
            .map_err(|source| (run_index, source))?;
        tracing::debug!(artifact_ref, variant, run_index, "inspection complete");
        runs.push(RunDescriptor::new(run_index, descriptor));
    }
    Ok(runs)
}

/// Compare every run of one variant against the first run's baseline.
fn compare_runs(variant: &str, runs: &[RunDescriptor]) -> VariantReport {
    let baseline = &runs[0];
    let baseline_rendered = render_pretty(&baseline.descriptor);
    let mismatched_runs: Vec<Mismatch> = runs[1..]
        .iter()
        .filter(|run| run.hash != baseline.hash)
        .map(|run| Mismatch {
            run_index: run.run_index,
            hash: run.hash.clone(),
            diff: line_diff(&baseline_rendered, &render_pretty(&run.descriptor)),
        })
        .collect();
    VariantReport {
        variant: variant.to_string(),
        baseline_hash: baseline.hash.clone(),
        consistent: mismatched_runs.is_empty(),
        mismatched_runs,
    }
}
