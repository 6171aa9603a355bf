//! The code artifact: editor document, console outputs, and its side of the bus.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::{
    bus::{EventBus, EventKind, PanelEvent, SubscriptionId},
    conversation::{MessageSink, Role},
    error::ExecutionError,
    execution::{chat_message_for, ExecutionEngine, ExecutionRun},
    preferences::Preferences,
    state::{ExecutionStatus, ExecutionStore},
};

/// Content length window (exclusive) in which a streaming artifact pops open.
const REVEAL_WINDOW: (usize, usize) = (300, 310);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ArtifactId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ArtifactId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Streaming,
    Idle,
}

/// Parts of the model stream addressed to a code artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPart {
    /// Full code generated so far.
    CodeDelta(String),
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolbarAction {
    ImproveCode,
    AddLogs,
}

impl ToolbarAction {
    pub fn prompt(self) -> &'static str {
        match self {
            Self::ImproveCode => "Can you improve this code? Make it more efficient and add comments.",
            Self::AddLogs => "Can you add console logging to this code?",
        }
    }
}

#[derive(Debug)]
struct Document {
    content: String,
    status: DocumentStatus,
    visible: bool,
}

pub struct CodeArtifact {
    id: ArtifactId,
    document: Mutex<Document>,
    store: Arc<ExecutionStore>,
    engine: Arc<ExecutionEngine>,
    bus: EventBus,
    preferences: Preferences,
    chat: Arc<dyn MessageSink>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl fmt::Debug for CodeArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeArtifact")
            .field("id", &self.id)
            .field("document", &*self.document.lock())
            .field("execution", &self.store.status())
            .finish_non_exhaustive()
    }
}

impl CodeArtifact {
    /// Create the artifact, seeded from the persisted preferences and
    /// following later auto-send changes from any panel.
    pub fn new(
        id: ArtifactId,
        engine: Arc<ExecutionEngine>,
        bus: EventBus,
        preferences: Preferences,
        chat: Arc<dyn MessageSink>,
    ) -> Arc<Self> {
        let store = Arc::new(ExecutionStore::new(id.clone(), preferences.auto_send()));

        let follower = Arc::clone(&store);
        let sub = bus.subscribe(EventKind::AutoSendToggled, move |event| {
            if let PanelEvent::AutoSendToggled { enabled } = event {
                follower.reconcile_auto_send(*enabled);
            }
        });

        Arc::new(Self {
            id,
            document: Mutex::new(Document {
                content: String::new(),
                status: DocumentStatus::Idle,
                visible: false,
            }),
            store,
            engine,
            bus,
            preferences,
            chat,
            subscriptions: Mutex::new(vec![sub]),
        })
    }

    pub fn id(&self) -> &ArtifactId {
        &self.id
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    pub fn content(&self) -> String {
        self.document.lock().content.clone()
    }

    pub fn document_status(&self) -> DocumentStatus {
        self.document.lock().status
    }

    pub fn is_visible(&self) -> bool {
        self.document.lock().visible
    }

    pub fn set_visible(&self, visible: bool) {
        self.document.lock().visible = visible;
    }

    /// Apply one stream part. `Finish` settles the document and may ask the
    /// chat to offer a run.
    pub fn on_stream_part(&self, part: StreamPart) {
        match part {
            StreamPart::CodeDelta(code) => {
                let mut doc = self.document.lock();
                let len = doc.content.len();
                if doc.status == DocumentStatus::Streaming && len > REVEAL_WINDOW.0 && len < REVEAL_WINDOW.1 {
                    doc.visible = true;
                }
                doc.content = code;
                doc.status = DocumentStatus::Streaming;
            }
            StreamPart::Finish => {
                self.document.lock().status = DocumentStatus::Idle;
                self.request_execution_prompt();
            }
        }
    }

    /// Replace the content without streaming, e.g. when the user edits it.
    pub fn set_content(&self, content: impl Into<String>) {
        self.document.lock().content = content.into();
    }

    /// Ask the chat panel to offer a run, at most once per artifact.
    ///
    /// Only fires for a settled, non-empty document that has never run.
    pub fn request_execution_prompt(&self) -> bool {
        {
            let doc = self.document.lock();
            if doc.status != DocumentStatus::Idle || doc.content.is_empty() {
                return false;
            }
        }
        let state = self.store.snapshot();
        if state.execution_prompt_shown || state.status != ExecutionStatus::Idle {
            return false;
        }
        if !self.store.latch_execution_prompt() {
            return false;
        }
        tracing::debug!(artifact = %self.id, "requesting execution prompt");
        self.bus.publish(PanelEvent::ExecutionRequested { artifact_id: self.id.clone() });
        true
    }

    pub async fn run(&self) -> Result<ExecutionRun, ExecutionError> {
        let content = self.content();
        self.engine.run(&self.store, &content).await
    }

    /// Send the visible completed runs to the chat. Returns `false` when
    /// there was nothing to send.
    pub fn send_to_chat(&self) -> Result<bool> {
        match chat_message_for(&self.store.snapshot().outputs) {
            Some(message) => {
                self.chat.append_message(Role::User, message)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn clear_console(&self) {
        self.store.clear_outputs();
    }

    /// Flip auto-send for every panel; returns the new value.
    pub fn toggle_auto_send(&self) -> Result<bool> {
        let enabled = !self.store.auto_send_enabled();
        self.preferences.set_auto_send(enabled)?;
        Ok(enabled)
    }

    /// Pull the persisted auto-send value into this artifact if they diverged.
    pub fn reconcile_preferences(&self) -> bool {
        self.store.reconcile_auto_send(self.preferences.auto_send())
    }

    pub fn toolbar(&self, action: ToolbarAction) -> Result<()> {
        self.chat.append_message(Role::User, action.prompt().to_string())
    }

    /// Run this artifact whenever the chat panel accepts a run prompt for it.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let (ids, rx) = self.bus.subscribe_channel(&[EventKind::PendingExecution]);
        self.subscriptions.lock().extend(ids);
        tokio::spawn(listen(Arc::downgrade(self), rx))
    }

    async fn handle_event(&self, event: PanelEvent) {
        let PanelEvent::PendingExecution { artifact_id } = event else {
            return;
        };
        if artifact_id != self.id {
            return;
        }
        match self.run().await {
            Ok(_) => {}
            Err(ExecutionError::Busy) => tracing::debug!(artifact = %self.id, "run ignored, already executing"),
            Err(e) => tracing::warn!(artifact = %self.id, "run rejected: {e}"),
        }
    }
}

async fn listen(artifact: Weak<CodeArtifact>, mut rx: mpsc::UnboundedReceiver<PanelEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(artifact) = artifact.upgrade() else {
            break;
        };
        artifact.handle_event(event).await;
    }
}

impl Drop for CodeArtifact {
    fn drop(&mut self) {
        for id in self.subscriptions.get_mut().drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}
