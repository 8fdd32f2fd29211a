//! Run records and their lifecycle state machine.
//!
//! Every dispatch attempt is tracked by exactly one [`RunRecord`]. The
//! record starts `pending`, moves to `running` once the remote side
//! acknowledges the trigger, and always reaches exactly one terminal state:
//!
//! ```text
//! Pending --Acknowledged--> Running
//! Pending --Rejected------> Failed
//! Running --StillExecuting-> Running
//! Running --RemoteSucceeded-> Succeeded
//! Running --RemoteFailed---> Failed
//! Running --BudgetExhausted-> TimedOut
//! any non-terminal --CancelRequested--> Cancelled
//! ```
//!
//! Transitions are a pure function ([`next_state`]) so the poll policy can
//! be unit-tested with synthetic events; the record itself is immutable
//! once terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backend::RunHandle;

/// Polling state of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Trigger sent, acknowledgment not yet received.
    Pending,
    /// Remote side acknowledged and is executing.
    Running,
    /// Remote side reported success.
    Succeeded,
    /// Trigger rejected or remote side reported failure.
    Failed,
    /// The local timeout budget expired before a terminal remote status.
    TimedOut,
    /// Cancellation was signalled before a terminal remote status.
    Cancelled,
}

impl RunState {
    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observation fed to the state machine by the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// The remote side acknowledged the trigger and returned a handle.
    Acknowledged(RunHandle),
    /// The trigger call itself failed. Not retried: a malformed trigger
    /// will not succeed on retry.
    Rejected(String),
    /// A poll tick returned "still executing".
    StillExecuting,
    /// The remote side reported terminal success.
    RemoteSucceeded,
    /// The remote side reported terminal failure.
    RemoteFailed(String),
    /// The cumulative elapsed time exceeded the unit's timeout budget.
    BudgetExhausted,
    /// Cancellation was signalled externally.
    CancelRequested,
}

impl RunEvent {
    const fn name(&self) -> &'static str {
        match self {
            Self::Acknowledged(_) => "acknowledged",
            Self::Rejected(_) => "rejected",
            Self::StillExecuting => "still_executing",
            Self::RemoteSucceeded => "remote_succeeded",
            Self::RemoteFailed(_) => "remote_failed",
            Self::BudgetExhausted => "budget_exhausted",
            Self::CancelRequested => "cancel_requested",
        }
    }
}

/// A transition that the state machine does not permit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("run state {from} does not accept event {event}")]
pub struct InvalidTransition {
    /// The state the record was in.
    pub from: RunState,
    /// The rejected event name.
    pub event: &'static str,
}

/// Pure transition function of the run lifecycle.
///
/// # Errors
///
/// Returns [`InvalidTransition`] for events a state does not accept; in
/// particular, terminal states accept nothing.
pub fn next_state(from: RunState, event: &RunEvent) -> Result<RunState, InvalidTransition> {
    let invalid = || InvalidTransition {
        from,
        event: event.name(),
    };
    match (from, event) {
        (RunState::Pending, RunEvent::Acknowledged(_)) => Ok(RunState::Running),
        (RunState::Pending, RunEvent::Rejected(_)) => Ok(RunState::Failed),
        (RunState::Running, RunEvent::StillExecuting) => Ok(RunState::Running),
        (RunState::Running, RunEvent::RemoteSucceeded) => Ok(RunState::Succeeded),
        (RunState::Running, RunEvent::RemoteFailed(_)) => Ok(RunState::Failed),
        (RunState::Running, RunEvent::BudgetExhausted) => Ok(RunState::TimedOut),
        (RunState::Pending | RunState::Running, RunEvent::CancelRequested) => {
            Ok(RunState::Cancelled)
        },
        _ => Err(invalid()),
    }
}

/// One attempt to execute work for one unit.
///
/// Created at trigger time, mutated only by its own poll loop, immutable
/// once terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unit this attempt belongs to.
    pub unit: String,

    /// Unique per-attempt token, echoed back by any downstream artifact so
    /// results can be traced to this attempt.
    pub correlation_id: String,

    /// When the trigger was sent.
    pub triggered_at: DateTime<Utc>,

    /// Current polling state.
    pub state: RunState,

    /// When a terminal state was reached.
    pub terminal_at: Option<DateTime<Utc>>,

    /// Opaque remote reference used to poll and fetch artifacts.
    pub handle: Option<RunHandle>,

    /// Rejection or failure detail, if any.
    pub reason: Option<String>,
}

impl RunRecord {
    /// Create a fresh `pending` record.
    #[must_use]
    pub fn new(unit: &str, correlation_id: String, triggered_at: DateTime<Utc>) -> Self {
        Self {
            unit: unit.to_string(),
            correlation_id,
            triggered_at,
            state: RunState::Pending,
            terminal_at: None,
            handle: None,
            reason: None,
        }
    }

    /// Whether the record has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply one event, updating state and bookkeeping fields.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the current state does not accept
    /// the event.
    pub fn apply(&mut self, event: RunEvent, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let next = next_state(self.state, &event)?;
        match event {
            RunEvent::Acknowledged(handle) => self.handle = Some(handle),
            RunEvent::Rejected(reason) | RunEvent::RemoteFailed(reason) => {
                self.reason = Some(reason);
            },
            _ => {},
        }
        if next.is_terminal() && !self.state.is_terminal() {
            self.terminal_at = Some(now);
        }
        tracing::debug!(
            unit = %self.unit,
            correlation_id = %self.correlation_id,
            from = %self.state,
            to = %next,
            "run state transition"
        );
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> RunHandle {
        RunHandle("run-1".to_string())
    }

    #[test]
    fn full_success_path() {
        let mut record = RunRecord::new("repo-a", "c-1".to_string(), Utc::now());
        record
            .apply(RunEvent::Acknowledged(handle()), Utc::now())
            .unwrap();
        assert_eq!(record.state, RunState::Running);
        record.apply(RunEvent::StillExecuting, Utc::now()).unwrap();
        record.apply(RunEvent::RemoteSucceeded, Utc::now()).unwrap();
        assert_eq!(record.state, RunState::Succeeded);
        assert!(record.terminal_at.is_some());
    }

    #[test]
    fn rejection_goes_straight_to_failed() {
        let mut record = RunRecord::new("repo-a", "c-1".to_string(), Utc::now());
        record
            .apply(RunEvent::Rejected("unauthorized".to_string()), Utc::now())
            .unwrap();
        assert_eq!(record.state, RunState::Failed);
        assert_eq!(record.reason.as_deref(), Some("unauthorized"));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for terminal in [
            RunState::Succeeded,
            RunState::Failed,
            RunState::TimedOut,
            RunState::Cancelled,
        ] {
            assert!(next_state(terminal, &RunEvent::StillExecuting).is_err());
            assert!(next_state(terminal, &RunEvent::CancelRequested).is_err());
        }
    }

    #[test]
    fn pending_does_not_accept_remote_status() {
        assert!(next_state(RunState::Pending, &RunEvent::RemoteSucceeded).is_err());
        assert!(next_state(RunState::Pending, &RunEvent::StillExecuting).is_err());
    }

    #[test]
    fn timeout_is_terminal_from_running() {
        assert_eq!(
            next_state(RunState::Running, &RunEvent::BudgetExhausted).unwrap(),
            RunState::TimedOut
        );
    }

    #[test]
    fn cancel_applies_from_both_non_terminal_states() {
        assert_eq!(
            next_state(RunState::Pending, &RunEvent::CancelRequested).unwrap(),
            RunState::Cancelled
        );
        assert_eq!(
            next_state(RunState::Running, &RunEvent::CancelRequested).unwrap(),
            RunState::Cancelled
        );
    }
}
