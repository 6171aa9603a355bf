use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;

use super::{required_shims, ExecutionRun, OutputChunk, RunId};
use crate::{
    bus::{EventBus, PanelEvent},
    conversation::{MessageSink, Role},
    error::{ExecutionError, SandboxError},
    sandbox::Sandbox,
    session::SessionContext,
    state::ExecutionStore,
};

/// Runs code artifacts in the session's interpreter and reports through the bus.
pub struct ExecutionEngine {
    session: Arc<SessionContext>,
    bus: EventBus,
    chat: Arc<dyn MessageSink>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("session", &self.session)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    pub fn new(session: Arc<SessionContext>, bus: EventBus, chat: Arc<dyn MessageSink>) -> Self {
        Self { session, bus, chat, timeout: None }
    }

    /// Bound each snippet's execution time. `None` runs unbounded.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Execute `source` for the artifact behind `store`.
    ///
    /// Interpreter, package and runtime failures become a `failed` run; the
    /// only error returned is [`ExecutionError::Busy`] when a run is already
    /// in flight for this artifact.
    pub async fn run(&self, store: &ExecutionStore, source: &str) -> Result<ExecutionRun, ExecutionError> {
        let run_id = RunId::new();
        store.begin_run(run_id)?;
        let artifact_id = store.artifact_id().clone();
        tracing::info!(artifact = %artifact_id, run = %run_id, "execution started");

        let captured: Arc<Mutex<Vec<OutputChunk>>> = Arc::default();
        let outcome = self.execute(store, run_id, source, &captured).await;

        let (run, error) = match outcome {
            Ok(()) => {
                let contents = std::mem::take(&mut *captured.lock());
                tracing::info!(artifact = %artifact_id, chunks = contents.len(), "execution completed");
                (store.complete(run_id, contents), None)
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(artifact = %artifact_id, "execution failed: {message}");
                (store.fail(run_id, message.clone()), Some(message))
            }
        };

        self.bus.publish(PanelEvent::ExecutionComplete { artifact_id, error: error.clone() });

        if error.is_none() && self.auto_send(store) {
            tracing::debug!(artifact = %store.artifact_id(), "results sent to chat");
        }
        Ok(run)
    }

    async fn execute(
        &self,
        store: &ExecutionStore,
        run_id: RunId,
        source: &str,
        captured: &Arc<Mutex<Vec<OutputChunk>>>,
    ) -> Result<(), ExecutionError> {
        // held until the snippet finishes so no other run can swap the sink
        let _turn = self.session.interpreter_turn().await;
        let sandbox = self.session.sandbox().await?;

        let sink = Arc::clone(captured);
        sandbox.set_stdout(Arc::new(move |line: String| {
            sink.lock().push(OutputChunk::from_stdout(line));
        }));

        let result = self.run_in(sandbox.as_ref(), store, run_id, source).await;
        if let Err(err) = &result {
            if needs_fresh_interpreter(err) {
                tracing::warn!(artifact = %store.artifact_id(), "discarding interpreter: {err}");
                self.session.discard_sandbox().await;
            }
        }
        result
    }

    async fn run_in(
        &self,
        sandbox: &dyn Sandbox,
        store: &ExecutionStore,
        run_id: RunId,
        source: &str,
    ) -> Result<(), ExecutionError> {
        let progress = |message: String| store.set_loading(run_id, message);
        sandbox.load_packages_from_imports(source, &progress).await?;

        for shim in required_shims(source) {
            tracing::debug!(shim = shim.name(), "installing shim");
            sandbox.run(shim.source()).await?;
            if let Some(setup) = shim.setup_call() {
                sandbox.run(setup).await?;
            }
        }

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, sandbox.run(source))
                .await
                .map_err(|_| ExecutionError::Timeout(limit))?
                .map_err(ExecutionError::from),
            None => sandbox.run(source).await.map_err(ExecutionError::from),
        }
    }

    fn auto_send(&self, store: &ExecutionStore) -> bool {
        let Some(message) = store.snapshot().auto_send_message() else {
            return false;
        };
        match self.chat.append_message(Role::User, message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(artifact = %store.artifact_id(), "auto-send failed: {e:#}");
                false
            }
        }
    }
}

/// An interpreter that timed out or broke protocol is in an unknown state.
fn needs_fresh_interpreter(err: &ExecutionError) -> bool {
    matches!(err, ExecutionError::Timeout(_) | ExecutionError::Sandbox(SandboxError::Protocol(_)))
}
