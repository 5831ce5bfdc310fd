use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::flow_engine::state::Continuation;
use crate::perception::types::TreeChange;
use crate::store::model::ItemStatus;

// ── Handler inbox ───────────────────────────────────────────────────────────

/// A continuation scheduled for a specific item and surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub item_id: i64,
    pub surface: String,
    pub step: Continuation,
}

/// Everything the reactive handler task consumes, in arrival order.
#[derive(Debug, Clone)]
pub enum HandlerInput {
    Changed(TreeChange),
    Continue(Ticket),
}

/// Non-blocking entry point for the UI-tree event source.
#[derive(Clone)]
pub struct TreeNotifier {
    tx: mpsc::Sender<HandlerInput>,
}

impl TreeNotifier {
    /// Hands a change to the handler. Returns `false` when the inbox is full
    /// or closed; the change is dropped in that case.
    pub fn notify(&self, change: TreeChange) -> bool {
        match self.tx.try_send(HandlerInput::Changed(change)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(HandlerInput::Changed(c))) => {
                tracing::warn!(surface = %c.surface, "handler inbox full, change dropped");
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => false,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("handler stopped, change dropped");
                false
            }
        }
    }
}

/// Bounded inbox shared by the notifier and the scheduler.
pub fn inbox(
    capacity: usize,
) -> (
    TreeNotifier,
    mpsc::Sender<HandlerInput>,
    mpsc::Receiver<HandlerInput>,
) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TreeNotifier { tx: tx.clone() }, tx, rx)
}

// ── Flow events ─────────────────────────────────────────────────────────────

/// Progress broadcast for whoever renders the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    ItemStarted { item_id: i64, phone: String },
    StatusChanged { item_id: i64, status: ItemStatus },
    ItemFinished {
        item_id: i64,
        status: ItemStatus,
        message: Option<String>,
    },
    QueueDrained,
    Stopped,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }

    /// Nobody listening is fine.
    pub fn publish(&self, event: FlowEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("flow event without subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
