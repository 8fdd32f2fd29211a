//! Local process adapter for the remote execution seam.
//!
//! Runs each unit's `exec_path` as a detached shell command. The child is
//! told where to write its result record through `GATEHUB_RESULT_PATH` and
//! which correlation id to echo into it through `GATEHUB_CORRELATION_ID`;
//! a child that does not echo the id produces evidence the hub rejects at
//! ingestion. Useful for self-hosted hubs and for exercising the full
//! pipeline without a remote substrate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use gatehub_core::config::EffectiveConfig;
use gatehub_core::dispatch::{ExecutorError, RemoteExecutor, RemoteStatus, RunHandle};
use tokio::process::{Child, Command};

pub struct LocalProcessExecutor {
    result_dir: PathBuf,
    children: Mutex<HashMap<String, Child>>,
}

impl LocalProcessExecutor {
    pub fn new(result_dir: PathBuf) -> Self {
        Self {
            result_dir,
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn result_path(&self, correlation_id: &str) -> PathBuf {
        self.result_dir.join(format!("{correlation_id}.json"))
    }

    fn children(&self) -> std::sync::MutexGuard<'_, HashMap<String, Child>> {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteExecutor for LocalProcessExecutor {
    async fn trigger(
        &self,
        config: &EffectiveConfig,
        correlation_id: &str,
    ) -> Result<RunHandle, ExecutorError> {
        std::fs::create_dir_all(&self.result_dir)
            .map_err(|e| ExecutorError::Rejected(format!("cannot create result dir: {e}")))?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(&config.exec_path)
            .env("GATEHUB_UNIT", &config.unit)
            .env("GATEHUB_ORG", &config.org)
            .env("GATEHUB_CORRELATION_ID", correlation_id)
            .env("GATEHUB_RESULT_PATH", self.result_path(correlation_id))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ExecutorError::Rejected(format!("failed to spawn '{}': {e}", config.exec_path))
            })?;

        self.children()
            .insert(correlation_id.to_string(), child);
        Ok(RunHandle(correlation_id.to_string()))
    }

    async fn poll(&self, handle: &RunHandle) -> Result<RemoteStatus, ExecutorError> {
        let mut children = self.children();
        let Some(child) = children.get_mut(&handle.0) else {
            return Err(ExecutorError::Unreachable(format!(
                "no local run for handle {handle}"
            )));
        };
        match child.try_wait() {
            Ok(None) => Ok(RemoteStatus::Executing),
            Ok(Some(status)) => {
                children.remove(&handle.0);
                if status.success() {
                    Ok(RemoteStatus::Succeeded)
                } else {
                    Ok(RemoteStatus::Failed {
                        reason: format!("exec exited with {status}"),
                    })
                }
            },
            Err(e) => Err(ExecutorError::Unreachable(format!(
                "wait on local run failed: {e}"
            ))),
        }
    }

    async fn cancel(&self, handle: &RunHandle) {
        if let Some(child) = self.children().get_mut(&handle.0) {
            if let Err(e) = child.start_kill() {
                tracing::warn!(handle = %handle, error = %e, "failed to kill local run");
            }
        }
    }

    async fn fetch_result(&self, handle: &RunHandle) -> Result<String, ExecutorError> {
        read_result_file(&self.result_path(&handle.0))
    }
}

fn read_result_file(path: &Path) -> Result<String, ExecutorError> {
    std::fs::read_to_string(path).map_err(|e| {
        ExecutorError::Fetch(format!("cannot read result file {}: {e}", path.display()))
    })
}
