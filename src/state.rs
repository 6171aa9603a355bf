//! Per-artifact execution state.
//!
//! `idle --run--> executing`, `executing --ok--> executed`,
//! `executing --err--> idle`, `executed --run--> executing`.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    artifact::ArtifactId,
    error::ExecutionError,
    execution::{chat_message_for, ExecutionRun, OutputChunk, RunId, RunStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Executing,
    Executed,
}

/// Execution metadata owned by a single code artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactExecution {
    pub outputs: Vec<ExecutionRun>,
    pub execution_prompt_shown: bool,
    pub status: ExecutionStatus,
    pub auto_send_enabled: bool,
}

impl ArtifactExecution {
    pub fn new(auto_send_enabled: bool) -> Self {
        Self {
            outputs: Vec::new(),
            execution_prompt_shown: false,
            status: ExecutionStatus::Idle,
            auto_send_enabled,
        }
    }

    pub fn run(&self, id: RunId) -> Option<&ExecutionRun> {
        self.outputs.iter().find(|r| r.id == id)
    }

    pub fn has_completed_output(&self) -> bool {
        self.outputs.iter().any(ExecutionRun::is_completed)
    }

    /// The message auto-send posts after the latest run, if any.
    ///
    /// Requires auto-send to be on and the latest run to have completed
    /// with output; the message covers every visible completed run.
    pub fn auto_send_message(&self) -> Option<String> {
        if !self.auto_send_enabled {
            return None;
        }
        let latest = self.outputs.last()?;
        if !latest.is_completed() || latest.contents.is_empty() {
            return None;
        }
        chat_message_for(&self.outputs)
    }

    /// Swap the run with `run.id` for `run`, appending it if it is not visible.
    fn replace_run(&mut self, run: ExecutionRun) {
        match self.outputs.iter_mut().find(|r| r.id == run.id) {
            Some(slot) => *slot = run,
            None => self.outputs.push(run),
        }
    }
}

/// Observable holder of an [`ArtifactExecution`].
#[derive(Debug)]
pub struct ExecutionStore {
    artifact_id: ArtifactId,
    tx: watch::Sender<ArtifactExecution>,
}

impl ExecutionStore {
    pub fn new(artifact_id: ArtifactId, auto_send_enabled: bool) -> Self {
        let (tx, _) = watch::channel(ArtifactExecution::new(auto_send_enabled));
        Self { artifact_id, tx }
    }

    pub fn artifact_id(&self) -> &ArtifactId {
        &self.artifact_id
    }

    pub fn snapshot(&self) -> ArtifactExecution {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.tx.borrow().status
    }

    pub fn auto_send_enabled(&self) -> bool {
        self.tx.borrow().auto_send_enabled
    }

    pub fn watch(&self) -> watch::Receiver<ArtifactExecution> {
        self.tx.subscribe()
    }

    /// Register a fresh `in_progress` run and enter `executing`.
    ///
    /// Fails with [`ExecutionError::Busy`] and leaves the state untouched
    /// while another run is in flight.
    pub fn begin_run(&self, id: RunId) -> Result<(), ExecutionError> {
        let mut busy = false;
        self.tx.send_if_modified(|state| {
            if state.status == ExecutionStatus::Executing {
                busy = true;
                return false;
            }
            state.status = ExecutionStatus::Executing;
            state.outputs.push(ExecutionRun::started(id));
            true
        });
        if busy {
            Err(ExecutionError::Busy)
        } else {
            Ok(())
        }
    }

    /// Show a package-loading message in place of the run's contents.
    pub fn set_loading(&self, id: RunId, message: impl Into<String>) {
        let run = ExecutionRun {
            id,
            status: RunStatus::LoadingPackages,
            contents: vec![OutputChunk::text(message)],
        };
        self.tx.send_modify(|state| state.replace_run(run));
    }

    pub fn complete(&self, id: RunId, contents: Vec<OutputChunk>) -> ExecutionRun {
        let run = ExecutionRun { id, status: RunStatus::Completed, contents };
        self.tx.send_modify(|state| {
            state.replace_run(run.clone());
            state.status = ExecutionStatus::Executed;
        });
        run
    }

    pub fn fail(&self, id: RunId, message: impl Into<String>) -> ExecutionRun {
        let run = ExecutionRun {
            id,
            status: RunStatus::Failed,
            contents: vec![OutputChunk::text(message)],
        };
        self.tx.send_modify(|state| {
            state.replace_run(run.clone());
            state.status = ExecutionStatus::Idle;
        });
        run
    }

    /// Empty the console. Runs still in flight reappear when they update.
    pub fn clear_outputs(&self) {
        self.tx.send_if_modified(|state| {
            if state.outputs.is_empty() {
                return false;
            }
            state.outputs.clear();
            true
        });
    }

    /// Set the run-prompt latch. Returns `true` only the first time.
    pub fn latch_execution_prompt(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if state.execution_prompt_shown {
                return false;
            }
            state.execution_prompt_shown = true;
            true
        })
    }

    /// Align the auto-send flag with `enabled`; returns whether it changed.
    pub fn reconcile_auto_send(&self, enabled: bool) -> bool {
        self.tx.send_if_modified(|state| {
            if state.auto_send_enabled == enabled {
                return false;
            }
            state.auto_send_enabled = enabled;
            true
        })
    }
}
