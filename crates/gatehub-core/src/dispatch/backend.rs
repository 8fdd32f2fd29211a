//! The remote execution seam.
//!
//! The execution substrate is an external service with an opaque
//! "trigger run, poll run, fetch artifact" contract. The coordinator only
//! depends on [`RemoteExecutor`]; adapters own transport, authentication,
//! and idempotent re-dispatch semantics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EffectiveConfig;

/// Opaque reference to one remote run, used to poll and fetch artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle(pub String);

impl std::fmt::Display for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status reported by one poll tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Still executing.
    Executing,
    /// Terminal success.
    Succeeded,
    /// Terminal failure with the remote side's reason.
    Failed {
        /// Failure detail from the remote side.
        reason: String,
    },
}

/// Failure modes of the remote execution substrate.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The trigger was rejected (malformed, unauthorized, unknown unit).
    /// Never retried at this layer.
    #[error("trigger rejected: {0}")]
    Rejected(String),

    /// The substrate could not be reached for a poll tick. Transient; the
    /// poll loop keeps ticking until the timeout budget expires.
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// The result artifact could not be produced or read.
    #[error("artifact fetch failed: {0}")]
    Fetch(String),
}

/// The remote execution substrate contract.
///
/// Implementations must echo the correlation id passed to [`trigger`] into
/// any artifact later returned by [`fetch_result`], so result fetching
/// never relies on timing or ordering to match a record to its outcome.
///
/// [`trigger`]: RemoteExecutor::trigger
/// [`fetch_result`]: RemoteExecutor::fetch_result
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Start a run for the unit described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Rejected`] if the substrate refuses the
    /// trigger; the coordinator converts this into a `failed` record
    /// without retrying.
    async fn trigger(
        &self,
        config: &EffectiveConfig,
        correlation_id: &str,
    ) -> Result<RunHandle, ExecutorError>;

    /// Report the current status of a run.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Unreachable`] on transient transport
    /// failure.
    async fn poll(&self, handle: &RunHandle) -> Result<RemoteStatus, ExecutorError>;

    /// Best-effort cancellation request. The coordinator never waits for
    /// acknowledgment; local bookkeeping terminates regardless.
    async fn cancel(&self, handle: &RunHandle);

    /// Fetch the raw result document for a terminal run.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Fetch`] if no result artifact can be
    /// produced.
    async fn fetch_result(&self, handle: &RunHandle) -> Result<String, ExecutorError>;
}
