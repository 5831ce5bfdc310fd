use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::flow_engine::event_bus::{HandlerInput, Ticket};

/// Delivers tickets back into the handler inbox after a delay. Pending
/// deliveries can be cancelled wholesale when the item changes.
pub struct Scheduler {
    tx: mpsc::Sender<HandlerInput>,
    pending: Vec<AbortHandle>,
}

impl Scheduler {
    pub fn new(tx: mpsc::Sender<HandlerInput>) -> Self {
        Self {
            tx,
            pending: Vec::new(),
        }
    }

    pub fn schedule(&mut self, delay: Duration, ticket: Ticket) {
        self.pending.retain(|h| !h.is_finished());
        tracing::trace!(item_id = ticket.item_id, step = ?ticket.step, ?delay, "continuation scheduled");
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(HandlerInput::Continue(ticket)).await.is_err() {
                tracing::debug!("handler gone, continuation dropped");
            }
        });
        self.pending.push(handle.abort_handle());
    }

    pub fn cancel_all(&mut self) {
        let n = self.pending.len();
        for h in self.pending.drain(..) {
            h.abort();
        }
        if n > 0 {
            tracing::debug!(cancelled = n, "pending continuations cancelled");
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for h in self.pending.drain(..) {
            h.abort();
        }
    }
}
