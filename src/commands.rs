use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::errors::{PilotError, PilotResult};
use crate::flow_engine::event_bus::{self, EventBus, FlowEvent, TreeNotifier};
use crate::flow_engine::FlowHandler;
use crate::orchestrator::expectation;
use crate::orchestrator::{FlowInitiator, ProcessingLock, RunSummary, WorkQueueOrchestrator};
use crate::perception::traits::UiDriver;
use crate::store::model::{BatchStats, NewWorkItem, WorkItem};
use crate::store::{self, WorkItemStore};

/// A started batch. Stays in its slot until replaced by the next start or
/// taken by `shutdown`, so stop and status calls always see it.
struct BatchRun {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    summary: watch::Receiver<Option<RunSummary>>,
}

impl BatchRun {
    /// Over once the summary is out, even if the task is still unwinding.
    fn is_live(&self) -> bool {
        !self.task.is_finished() && self.summary.borrow().is_none()
    }
}

/// Control surface over a running pilot: feed UI changes in, start and stop
/// batches, manage the backlog, watch progress.
pub struct PilotHandle {
    store: Arc<dyn WorkItemStore>,
    orchestrator: WorkQueueOrchestrator,
    notifier: TreeNotifier,
    events: EventBus,
    shutdown: CancellationToken,
    handler_task: JoinHandle<()>,
    batch: Mutex<Option<BatchRun>>,
}

impl PilotHandle {
    /// Wires the handler and orchestrator together and starts the handler
    /// task. Must be called inside a tokio runtime.
    pub fn launch(
        cfg: &AppConfig,
        driver: Arc<dyn UiDriver>,
        store: Arc<dyn WorkItemStore>,
        initiator: Arc<dyn FlowInitiator>,
    ) -> Self {
        let events = EventBus::default();
        let (publisher, reader) = expectation::channel();
        let (notifier, inbox_tx, inbox_rx) = event_bus::inbox(cfg.flow.inbox_capacity);

        let handler = FlowHandler::new(
            cfg,
            driver,
            Arc::clone(&store),
            reader,
            events.clone(),
            inbox_tx,
        );
        let shutdown = CancellationToken::new();
        let handler_task = tokio::spawn(handler.run(inbox_rx, shutdown.child_token()));

        let orchestrator = WorkQueueOrchestrator::new(
            cfg,
            Arc::clone(&store),
            initiator,
            Arc::new(publisher),
            ProcessingLock::new(),
            events.clone(),
        );
        tracing::info!("pilot launched");

        Self {
            store,
            orchestrator,
            notifier,
            events,
            shutdown,
            handler_task,
            batch: Mutex::new(None),
        }
    }

    // ── Batch control ───────────────────────────────────────────────────────

    /// Starts processing the backlog. `false` if a batch is already running.
    pub async fn start_batch(&self) -> bool {
        let mut batch = self.batch.lock().await;
        if batch.as_ref().map(BatchRun::is_live).unwrap_or(false) {
            tracing::info!("start_batch ignored, batch already running");
            return false;
        }
        let cancel = self.shutdown.child_token();
        let orchestrator = self.orchestrator.clone();
        let token = cancel.clone();
        let (tx, summary) = watch::channel(None);
        let task = tokio::spawn(async move {
            let outcome = orchestrator.run(token).await;
            tx.send_replace(Some(outcome));
        });
        *batch = Some(BatchRun {
            cancel,
            task,
            summary,
        });
        tracing::info!("start_batch invoked");
        true
    }

    /// Requests a stop; the in-flight item is marked CANCELLED unless it
    /// already has a verdict.
    pub async fn stop_batch(&self) {
        if let Some(run) = self.batch.lock().await.as_ref() {
            tracing::info!("stop_batch invoked");
            run.cancel.cancel();
        }
    }

    pub async fn is_running(&self) -> bool {
        self.batch
            .lock()
            .await
            .as_ref()
            .map(BatchRun::is_live)
            .unwrap_or(false)
    }

    /// Waits for the current (or last) batch to end. The batch stays
    /// controllable from other callers meanwhile.
    pub async fn wait_batch(&self) -> PilotResult<RunSummary> {
        let rx = self.batch.lock().await.as_ref().map(|b| b.summary.clone());
        let Some(mut rx) = rx else {
            return Err(PilotError::Cancelled);
        };
        let done = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| PilotError::Join("batch task ended without a summary".into()))?;
        (*done).ok_or(PilotError::Cancelled)
    }

    // ── Backlog ─────────────────────────────────────────────────────────────

    pub async fn enqueue(&self, item: NewWorkItem) -> PilotResult<i64> {
        item.validate()?;
        let id = self.store.insert(item).await?;
        tracing::debug!(item_id = id, "item enqueued");
        Ok(id)
    }

    /// All-or-nothing: one invalid row rejects the whole batch.
    pub async fn enqueue_all(&self, items: Vec<NewWorkItem>) -> PilotResult<Vec<i64>> {
        for (row, item) in items.iter().enumerate() {
            if let Err(e) = item.validate() {
                tracing::warn!(row = row + 1, error = %e, "batch rejected");
                return Err(e);
            }
        }
        let ids = self.store.insert_all(items).await?;
        tracing::info!(count = ids.len(), "items enqueued");
        Ok(ids)
    }

    pub async fn items(&self) -> PilotResult<Vec<WorkItem>> {
        self.store.get_all().await
    }

    pub async fn lookup(&self, phone: &str) -> PilotResult<Option<WorkItem>> {
        self.store.get_by_phone(phone.trim()).await
    }

    pub async fn stats(&self) -> PilotResult<BatchStats> {
        store::batch_stats(self.store.as_ref()).await
    }

    /// Empties the backlog. Refused while a batch is running.
    pub async fn clear(&self) -> PilotResult<()> {
        if self.is_running().await {
            return Err(PilotError::Store(
                "cannot clear items while a batch is running".into(),
            ));
        }
        self.store.delete_all().await?;
        tracing::info!("backlog cleared");
        Ok(())
    }

    // ── Wiring ──────────────────────────────────────────────────────────────

    /// Entry point for the accessibility event source.
    pub fn notifier(&self) -> TreeNotifier {
        self.notifier.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> Arc<dyn WorkItemStore> {
        Arc::clone(&self.store)
    }

    /// Stops any batch and the handler, then waits for both.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Some(run) = self.batch.lock().await.take() {
            if let Err(e) = run.task.await {
                tracing::warn!(error = %e, "batch task ended abnormally");
            }
        }
        if let Err(e) = self.handler_task.await {
            tracing::warn!(error = %e, "handler task ended abnormally");
        }
        tracing::info!("pilot shut down");
    }
}
