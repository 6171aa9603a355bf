//! Typed publish/subscribe channel shared by the editor, console and chat panels.
//!
//! The panels are mounted independently and never hold references to each
//! other; the application root creates one [`EventBus`] and hands a clone to
//! each of them.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::artifact::ArtifactId;

/// Events exchanged between panels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "camelCase")]
pub enum PanelEvent {
    /// An artifact finished generating and asks the chat to offer a run.
    #[serde(rename_all = "camelCase")]
    ExecutionRequested { artifact_id: ArtifactId },
    /// A run finished, successfully or not.
    #[serde(rename_all = "camelCase")]
    ExecutionComplete {
        artifact_id: ArtifactId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The auto-send preference changed somewhere.
    AutoSendToggled { enabled: bool },
    /// The chat panel accepted a run prompt for this artifact.
    #[serde(rename_all = "camelCase")]
    PendingExecution { artifact_id: ArtifactId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ExecutionRequested,
    ExecutionComplete,
    AutoSendToggled,
    PendingExecution,
}

impl PanelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ExecutionRequested { .. } => EventKind::ExecutionRequested,
            Self::ExecutionComplete { .. } => EventKind::ExecutionComplete,
            Self::AutoSendToggled { .. } => EventKind::AutoSendToggled,
            Self::PendingExecution { .. } => EventKind::PendingExecution,
        }
    }

    /// The artifact this event concerns, if any.
    pub fn artifact_id(&self) -> Option<&ArtifactId> {
        match self {
            Self::ExecutionRequested { artifact_id }
            | Self::ExecutionComplete { artifact_id, .. }
            | Self::PendingExecution { artifact_id } => Some(artifact_id),
            Self::AutoSendToggled { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&PanelEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Registry>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.lock();
        let count: usize = registry.handlers.values().map(Vec::len).sum();
        f.debug_struct("EventBus").field("subscriptions", &count).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every future event of `kind`.
    ///
    /// Handlers run synchronously on the publishing task, outside the
    /// registry lock, so they may publish or (un)subscribe themselves.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&PanelEvent) + Send + Sync + 'static,
    {
        let mut registry = self.inner.lock();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Forward every event of the given kinds into an unbounded channel.
    ///
    /// The forwarding handler silently drops events once the receiver is gone.
    pub fn subscribe_channel(
        &self,
        kinds: &[EventKind],
    ) -> (Vec<SubscriptionId>, mpsc::UnboundedReceiver<PanelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ids = kinds
            .iter()
            .map(|kind| {
                let tx = tx.clone();
                self.subscribe(*kind, move |event| {
                    let _ = tx.send(event.clone());
                })
            })
            .collect();
        (ids, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.inner.lock();
        for handlers in registry.handlers.values_mut() {
            if let Some(pos) = handlers.iter().position(|(sid, _)| *sid == id) {
                handlers.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver `event` to the current subscribers of its kind and return how
    /// many were reached. Events without subscribers are dropped.
    pub fn publish(&self, event: PanelEvent) -> usize {
        let handlers: Vec<Handler> = {
            let registry = self.inner.lock();
            registry
                .handlers
                .get(&event.kind())
                .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        tracing::debug!(kind = ?event.kind(), subscribers = handlers.len(), "publish");
        for handler in &handlers {
            handler(&event);
        }
        handlers.len()
    }
}
