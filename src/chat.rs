//! Chat-side coordination: the "run this code?" prompt and auto-run.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use anyhow::Result;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    artifact::ArtifactId,
    bus::{EventBus, EventKind, PanelEvent, SubscriptionId},
    preferences::Preferences,
};

/// What the prompt shows while an artifact waits for a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPrompt {
    pub artifact_id: ArtifactId,
    pub auto_send_enabled: bool,
    pub always_execute: bool,
}

#[derive(Debug)]
struct ChatState {
    pending: Option<ArtifactId>,
    auto_send_enabled: bool,
}

pub struct ChatPanel {
    bus: EventBus,
    preferences: Preferences,
    auto_run_delay: Duration,
    state: Mutex<ChatState>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl std::fmt::Debug for ChatPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatPanel")
            .field("state", &*self.state.lock())
            .field("auto_run_delay", &self.auto_run_delay)
            .finish_non_exhaustive()
    }
}

impl ChatPanel {
    pub fn new(bus: EventBus, preferences: Preferences, auto_run_delay: Duration) -> Arc<Self> {
        let auto_send_enabled = preferences.auto_send();
        Arc::new(Self {
            bus,
            preferences,
            auto_run_delay,
            state: Mutex::new(ChatState { pending: None, auto_send_enabled }),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn pending_execution(&self) -> Option<ArtifactId> {
        self.state.lock().pending.clone()
    }

    pub fn auto_send_enabled(&self) -> bool {
        self.state.lock().auto_send_enabled
    }

    /// The prompt to display, if an artifact is waiting.
    pub fn prompt(&self) -> Option<ExecutionPrompt> {
        let state = self.state.lock();
        state.pending.clone().map(|artifact_id| ExecutionPrompt {
            artifact_id,
            auto_send_enabled: state.auto_send_enabled,
            always_execute: self.preferences.always_execute(),
        })
    }

    /// Apply one bus event. Returns the artifact to auto-run, if any.
    pub fn handle_event(&self, event: &PanelEvent) -> Option<ArtifactId> {
        let mut state = self.state.lock();
        match event {
            PanelEvent::ExecutionRequested { artifact_id } => {
                state.pending = Some(artifact_id.clone());
                if self.preferences.always_execute() {
                    return Some(artifact_id.clone());
                }
            }
            PanelEvent::ExecutionComplete { artifact_id, .. } => {
                if state.pending.as_ref() == Some(artifact_id) {
                    state.pending = None;
                }
            }
            PanelEvent::AutoSendToggled { enabled } => state.auto_send_enabled = *enabled,
            PanelEvent::PendingExecution { .. } => {}
        }
        None
    }

    /// Accept the prompt: ask the pending artifact to run and hide the prompt.
    pub fn run_pending(&self) -> Option<ArtifactId> {
        let artifact_id = self.state.lock().pending.take()?;
        tracing::debug!(artifact = %artifact_id, "running pending artifact");
        self.bus.publish(PanelEvent::PendingExecution { artifact_id: artifact_id.clone() });
        Some(artifact_id)
    }

    pub fn dismiss(&self) {
        self.state.lock().pending = None;
    }

    pub fn set_auto_send(&self, enabled: bool) -> Result<()> {
        self.state.lock().auto_send_enabled = enabled;
        self.preferences.set_auto_send(enabled)
    }

    /// Flip always-execute. Turning it on also dismisses the current prompt.
    pub fn toggle_always_execute(&self) -> Result<bool> {
        let enabled = !self.preferences.always_execute();
        self.preferences.set_always_execute(enabled)?;
        if enabled {
            self.dismiss();
        }
        Ok(enabled)
    }

    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let (ids, rx) = self.bus.subscribe_channel(&[
            EventKind::ExecutionRequested,
            EventKind::ExecutionComplete,
            EventKind::AutoSendToggled,
        ]);
        self.subscriptions.lock().extend(ids);
        tokio::spawn(listen(Arc::downgrade(self), rx))
    }

    /// Run `artifact_id` after the auto-run delay unless the prompt moved on.
    async fn auto_run(panel: Weak<Self>, artifact_id: ArtifactId, delay: Duration) {
        tokio::time::sleep(delay).await;
        let Some(panel) = panel.upgrade() else {
            return;
        };
        let still_pending = panel.state.lock().pending.as_ref() == Some(&artifact_id);
        if still_pending && panel.preferences.always_execute() {
            panel.run_pending();
        }
    }
}

async fn listen(panel: Weak<ChatPanel>, mut rx: mpsc::UnboundedReceiver<PanelEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(strong) = panel.upgrade() else {
            break;
        };
        if let Some(artifact_id) = strong.handle_event(&event) {
            tokio::spawn(ChatPanel::auto_run(panel.clone(), artifact_id, strong.auto_run_delay));
        }
    }
}

impl Drop for ChatPanel {
    fn drop(&mut self) {
        for id in self.subscriptions.get_mut().drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}
