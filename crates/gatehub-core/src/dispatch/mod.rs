//! Dispatch coordination: trigger, poll, and terminate under budget.
//!
//! One [`DispatchCoordinator`] serves a whole hub. Each call to
//! [`DispatchCoordinator::dispatch`] owns its unit's poll loop end to end
//! and always returns a terminal [`RunRecord`]: every failure mode of the
//! remote substrate — rejection, transient unreachability, a hung job —
//! becomes a terminal state, never an error surfaced to the aggregation
//! caller. A process-wide semaphore bounds simultaneously running
//! dispatches with FIFO admission; per-unit loops never block on one
//! another beyond that cap.
//!
//! Cancellation is cooperative and advisory on the remote side: a
//! signalled [`tokio::sync::watch`] channel transitions the local record to
//! `cancelled` and fires a best-effort remote cancel without waiting for
//! acknowledgment. The timeout path guarantees forward progress even if
//! the remote system never answers.

mod backend;
mod backoff;
mod record;

pub use backend::{ExecutorError, RemoteExecutor, RemoteStatus, RunHandle};
pub use backoff::{DispatchSettings, PollBackoff};
pub use record::{next_state, InvalidTransition, RunEvent, RunRecord, RunState};

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use crate::config::EffectiveConfig;

/// Handle used to signal cancellation to in-flight dispatches.
///
/// Dropping the handle does not cancel anything; only an explicit
/// [`CancelHandle::cancel`] does.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Create a cancellation channel.
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Signal cancellation to every subscribed dispatch.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Coordinates remote execution for the hub's units.
pub struct DispatchCoordinator<E> {
    executor: Arc<E>,
    admission: Arc<Semaphore>,
}

impl<E> Clone for DispatchCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            admission: Arc::clone(&self.admission),
        }
    }
}

impl<E: RemoteExecutor + 'static> DispatchCoordinator<E> {
    /// Create a coordinator bounding simultaneous running dispatches to
    /// `max_concurrent`.
    #[must_use]
    pub fn new(executor: Arc<E>, max_concurrent: usize) -> Self {
        Self {
            executor,
            admission: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Dispatch one unit and poll it to a terminal state.
    ///
    /// `correlation_id` may be supplied by the caller; otherwise one is
    /// generated. The returned record is always terminal.
    pub async fn dispatch(
        &self,
        config: &EffectiveConfig,
        correlation_id: Option<String>,
        mut cancel: watch::Receiver<bool>,
    ) -> RunRecord {
        let correlation_id = correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut record = RunRecord::new(&config.unit, correlation_id.clone(), Utc::now());

        // FIFO admission under the global concurrency cap.
        let _permit = tokio::select! {
            permit = Arc::clone(&self.admission).acquire_owned() => {
                match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        apply_event(&mut record, RunEvent::Rejected(
                            "admission queue closed".to_string(),
                        ));
                        return record;
                    },
                }
            },
            () = wait_for_cancel(&mut cancel) => {
                apply_event(&mut record, RunEvent::CancelRequested);
                return record;
            },
        };

        tracing::info!(unit = %config.unit, correlation_id = %correlation_id, "triggering run");
        let handle = match self.executor.trigger(config, &correlation_id).await {
            Ok(handle) => handle,
            Err(err) => {
                apply_event(&mut record, RunEvent::Rejected(err.to_string()));
                return record;
            },
        };
        apply_event(&mut record, RunEvent::Acknowledged(handle.clone()));

        let started = tokio::time::Instant::now();
        let timeout = config.dispatch.timeout;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                apply_event(&mut record, RunEvent::BudgetExhausted);
                break;
            }
            // Clamp the tick so a backoff sleep never overshoots the budget.
            let delay = config
                .dispatch
                .backoff
                .delay_for_attempt(attempt)
                .min(timeout - elapsed);
            tokio::select! {
                () = tokio::time::sleep(delay) => {},
                () = wait_for_cancel(&mut cancel) => {
                    apply_event(&mut record, RunEvent::CancelRequested);
                    self.spawn_remote_cancel(&handle);
                    break;
                },
            }
            if started.elapsed() >= timeout {
                apply_event(&mut record, RunEvent::BudgetExhausted);
                break;
            }
            match self.executor.poll(&handle).await {
                Ok(RemoteStatus::Executing) => {
                    apply_event(&mut record, RunEvent::StillExecuting);
                },
                Ok(RemoteStatus::Succeeded) => {
                    apply_event(&mut record, RunEvent::RemoteSucceeded);
                    break;
                },
                Ok(RemoteStatus::Failed { reason }) => {
                    apply_event(&mut record, RunEvent::RemoteFailed(reason));
                    break;
                },
                Err(err) => {
                    // Transient poll failure: keep ticking; the timeout
                    // budget bounds how long we tolerate it.
                    tracing::warn!(
                        unit = %config.unit,
                        handle = %handle,
                        %err,
                        "poll tick failed"
                    );
                },
            }
        }

        tracing::info!(
            unit = %config.unit,
            correlation_id = %correlation_id,
            state = %record.state,
            "run terminal"
        );
        record
    }

    /// Dispatch many units concurrently, preserving input order in the
    /// returned records.
    pub async fn dispatch_all(
        &self,
        configs: &[EffectiveConfig],
        cancel: &watch::Receiver<bool>,
    ) -> Vec<RunRecord> {
        let mut set = tokio::task::JoinSet::new();
        for (index, config) in configs.iter().cloned().enumerate() {
            let this = self.clone();
            let cancel = cancel.clone();
            set.spawn(async move { (index, this.dispatch(&config, None, cancel).await) });
        }

        let mut slots: Vec<Option<RunRecord>> = vec![None; configs.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, record)) => slots[index] = Some(record),
                Err(err) => tracing::error!(%err, "dispatch task aborted"),
            }
        }

        configs
            .iter()
            .zip(slots)
            .map(|(config, slot)| {
                slot.unwrap_or_else(|| {
                    let mut record =
                        RunRecord::new(&config.unit, Uuid::new_v4().to_string(), Utc::now());
                    apply_event(
                        &mut record,
                        RunEvent::Rejected("dispatch task aborted".to_string()),
                    );
                    record
                })
            })
            .collect()
    }

    /// Fetch and return the raw result document for a succeeded record.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Fetch`] if the record carries no handle or
    /// the substrate cannot produce the artifact.
    pub async fn fetch_result(&self, record: &RunRecord) -> Result<String, ExecutorError> {
        let handle = record
            .handle
            .as_ref()
            .ok_or_else(|| ExecutorError::Fetch("run record carries no handle".to_string()))?;
        self.executor.fetch_result(handle).await
    }

    fn spawn_remote_cancel(&self, handle: &RunHandle) {
        let executor = Arc::clone(&self.executor);
        let handle = handle.clone();
        tokio::spawn(async move {
            executor.cancel(&handle).await;
        });
    }
}

fn apply_event(record: &mut RunRecord, event: RunEvent) {
    if let Err(err) = record.apply(event, Utc::now()) {
        tracing::error!(unit = %record.unit, %err, "run record rejected event");
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: cancellation can never be signalled.
            std::future::pending::<()>().await;
        }
    }
}
