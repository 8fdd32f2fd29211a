//! Result record ingestion and wire-format validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Metric, ThresholdKey, Tool};

/// Wire schema version this crate reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

/// The structured outcome fetched for one terminal run.
///
/// Three parallel tool-status maps plus the measured metrics and the
/// threshold snapshot in force at run time. Unknown top-level fields are
/// rejected at ingestion so schema drift is caught immediately rather than
/// discovered downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultRecord {
    /// Wire schema version; must equal [`SCHEMA_VERSION`].
    pub schema_version: u32,

    /// Correlation id echoed from the dispatch attempt that produced this
    /// record.
    pub correlation_id: String,

    /// Was the tool enabled in the effective configuration.
    #[serde(default)]
    pub configured: BTreeMap<Tool, bool>,

    /// Did the tool's step execute.
    #[serde(default)]
    pub ran: BTreeMap<Tool, bool>,

    /// Did the tool pass its own internal gate. Only meaningful for tools
    /// that ran.
    #[serde(default)]
    pub success: BTreeMap<Tool, bool>,

    /// Measured quantities reported by the run.
    #[serde(default)]
    pub metrics: BTreeMap<Metric, f64>,

    /// The numeric gates that were in force for this unit at run time.
    #[serde(default)]
    pub thresholds: BTreeMap<ThresholdKey, f64>,
}

impl ResultRecord {
    /// Whether a tool is marked `true` in the given status map.
    #[must_use]
    pub fn flag(map: &BTreeMap<Tool, bool>, tool: Tool) -> bool {
        map.get(&tool).copied().unwrap_or(false)
    }
}

/// Reasons a fetched result document is rejected at ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The document is not valid JSON or violates the fixed schema
    /// (including unknown top-level fields).
    #[error("malformed result record: {0}")]
    Parse(#[from] serde_json::Error),

    /// The document declares a schema version this crate does not read.
    #[error("unsupported result schema version {found} (supported: {SCHEMA_VERSION})")]
    UnsupportedSchemaVersion {
        /// Version declared by the document.
        found: u32,
    },

    /// The document's correlation id does not match the dispatch attempt
    /// it was fetched for. The fetched data may belong to a different
    /// attempt; hard failure, never a warning.
    #[error("correlation id mismatch: record carries {found:?}, expected {expected:?}")]
    CorrelationMismatch {
        /// Correlation id found in the document.
        found: String,
        /// Correlation id of the attempt the fetch was made for.
        expected: String,
    },
}

/// Parse and validate a raw result document fetched for one attempt.
///
/// # Errors
///
/// Returns [`IngestError`] on malformed JSON, unknown fields, an
/// unsupported schema version, or a correlation id that does not match
/// `expected_correlation_id`.
pub fn ingest(raw: &str, expected_correlation_id: &str) -> Result<ResultRecord, IngestError> {
    let record: ResultRecord = serde_json::from_str(raw)?;
    if record.schema_version != SCHEMA_VERSION {
        return Err(IngestError::UnsupportedSchemaVersion {
            found: record.schema_version,
        });
    }
    if record.correlation_id != expected_correlation_id {
        return Err(IngestError::CorrelationMismatch {
            found: record.correlation_id,
            expected: expected_correlation_id.to_string(),
        });
    }
    Ok(record)
}
