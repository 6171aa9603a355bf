//! Per-session context: who is using the assistant and which interpreter serves them.
//!
//! Everything that used to live in module-level globals (the loaded
//! interpreter, the external toolset identity) hangs off a [`SessionContext`]
//! that callers create explicitly and pass around.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::{
    config::Config,
    error::SandboxError,
    sandbox::{Sandbox, SandboxFactory},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
}

pub struct SessionContext {
    user: UserIdentity,
    toolset_entity: Option<String>,
    factory: Arc<dyn SandboxFactory>,
    sandbox: Mutex<Option<Arc<dyn Sandbox>>>,
    turn: Mutex<()>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("user", &self.user)
            .field("toolset_entity", &self.toolset_entity)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    pub fn new(user: UserIdentity, factory: Arc<dyn SandboxFactory>) -> Self {
        Self { user, toolset_entity: None, factory, sandbox: Mutex::new(None), turn: Mutex::new(()) }
    }

    pub fn from_config(cfg: &Config, factory: Arc<dyn SandboxFactory>) -> Self {
        let mut session = Self::new(UserIdentity { id: cfg.user_id() }, factory);
        session.toolset_entity = cfg.get("TOOLSET_ENTITY_ID").filter(|v| !v.is_empty());
        session
    }

    pub fn with_toolset_entity(mut self, entity: impl Into<String>) -> Self {
        self.toolset_entity = Some(entity.into());
        self
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    /// Identity used with the external toolset; defaults to the user id.
    pub fn toolset_entity(&self) -> &str {
        self.toolset_entity.as_deref().unwrap_or(&self.user.id)
    }

    /// Exclusive use of the interpreter for one whole run.
    ///
    /// The interpreter has a single stdout sink and a single namespace, so
    /// runs from different artifacts take turns; waiters are served in order.
    pub async fn interpreter_turn(&self) -> MutexGuard<'_, ()> {
        self.turn.lock().await
    }

    /// The session's interpreter, started on first use and reused afterwards.
    pub async fn sandbox(&self) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let mut slot = self.sandbox.lock().await;
        if let Some(sandbox) = slot.as_ref() {
            return Ok(Arc::clone(sandbox));
        }
        tracing::debug!(user = %self.user.id, "starting interpreter");
        let sandbox = self.factory.initialize().await?;
        *slot = Some(Arc::clone(&sandbox));
        Ok(sandbox)
    }

    /// Drop the current interpreter so the next [`Self::sandbox`] call starts fresh.
    pub async fn discard_sandbox(&self) {
        let previous = self.sandbox.lock().await.take();
        if let Some(sandbox) = previous {
            sandbox.shutdown().await;
        }
    }

    /// End of session: release the interpreter.
    pub async fn close(&self) {
        self.discard_sandbox().await;
    }
}
