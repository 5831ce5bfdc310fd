use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, InitiationConfig, JournalConfig, OrchestratorConfig};
use crate::errors::PilotResult;
use crate::flow_engine::event_bus::{EventBus, FlowEvent};
use crate::flow_engine::history::RunJournal;
use crate::orchestrator::completion::{self, CompletionVerdict};
use crate::orchestrator::expectation::{Expectation, ExpectationPublisher};
use crate::orchestrator::initiator::{FlowInitiator, UssdCode};
use crate::orchestrator::lock::ProcessingLock;
use crate::store::model::{ItemStatus, ProgressFlag, WorkItem};
use crate::store::WorkItemStore;

pub const MSG_STOPPED: &str = "Stopped by user";

/// How a `run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub stopped: bool,
}

/// Drives pending items one at a time: publish the expectation, start the
/// flow, wait for a verdict, finalize, cool down, next.
#[derive(Clone)]
pub struct WorkQueueOrchestrator {
    store: Arc<dyn WorkItemStore>,
    initiator: Arc<dyn FlowInitiator>,
    expectation: Arc<ExpectationPublisher>,
    lock: ProcessingLock,
    events: EventBus,
    cfg: Arc<OrchestratorConfig>,
    initiation: Arc<InitiationConfig>,
    journal: Arc<JournalConfig>,
}

/// Sleeps for `d`; `false` if cancelled first.
async fn pause(d: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(d) => true,
    }
}

impl WorkQueueOrchestrator {
    pub fn new(
        cfg: &AppConfig,
        store: Arc<dyn WorkItemStore>,
        initiator: Arc<dyn FlowInitiator>,
        expectation: Arc<ExpectationPublisher>,
        lock: ProcessingLock,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            initiator,
            expectation,
            lock,
            events,
            cfg: Arc::new(cfg.orchestrator.clone()),
            initiation: Arc::new(cfg.initiation.clone()),
            journal: Arc::new(cfg.journal.clone()),
        }
    }

    /// Processes the backlog until it is empty or `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> RunSummary {
        let journal = RunJournal::new(&self.journal);
        tracing::info!(session = %journal.session_id, "batch started");
        let mut processed = 0usize;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let Some(guard) = self.lock.try_acquire() else {
                tracing::debug!("processing lock busy, retrying");
                if !pause(self.cfg.busy_retry(), &cancel).await {
                    break;
                }
                continue;
            };

            let next = match self.store.get_next_pending().await {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(error = %e, "fetching next pending item failed");
                    drop(guard);
                    if !pause(self.cfg.error_cooldown(), &cancel).await {
                        break;
                    }
                    continue;
                }
            };
            let Some(item) = next else {
                tracing::info!(processed, "queue drained");
                self.events.publish(FlowEvent::QueueDrained);
                return RunSummary {
                    processed,
                    stopped: false,
                };
            };

            let ok = self.process(item, &cancel, &journal).await;
            drop(guard);
            processed += 1;

            let cooldown = if ok {
                self.cfg.cooldown()
            } else {
                self.cfg.error_cooldown()
            };
            if !pause(cooldown, &cancel).await {
                break;
            }
        }

        tracing::info!(processed, "batch stopped");
        self.expectation.clear();
        self.events.publish(FlowEvent::Stopped);
        RunSummary {
            processed,
            stopped: true,
        }
    }

    /// Runs one item in its own task and finalizes it whatever happens there.
    /// Returns `false` when the item ended in an error or a panic.
    async fn process(
        &self,
        item: WorkItem,
        cancel: &CancellationToken,
        journal: &RunJournal,
    ) -> bool {
        let started = Instant::now();
        let item_id = item.id;
        let phone = item.phone.clone();

        let this = self.clone();
        let token = cancel.clone();
        let joined = tokio::spawn(async move { this.drive(item, &token).await }).await;

        self.expectation.clear();

        let (status, ok) = match joined {
            Ok(Ok(status)) => (status, true),
            Ok(Err(e)) => {
                tracing::error!(item_id, error = %e, "item failed");
                self.fail(item_id, &format!("Error: {e}")).await;
                (ItemStatus::Failed, false)
            }
            Err(e) => {
                tracing::error!(item_id, error = %e, "item task panicked");
                self.fail(item_id, &format!("Internal error: {e}")).await;
                (ItemStatus::Failed, false)
            }
        };

        if status == ItemStatus::Completed {
            if let Err(e) = self
                .store
                .update_field_filled(item_id, ProgressFlag::Completed, true)
                .await
            {
                tracing::warn!(item_id, error = %e, "completed flag update failed");
            }
        }

        let message = match self.store.get_by_id(item_id).await {
            Ok(Some(i)) => i.message,
            _ => None,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(item_id, status = %status, elapsed_ms, "item finished");
        if let Err(e) = journal.record(&RunJournal::entry(
            item_id,
            &phone,
            status,
            message.clone(),
            elapsed_ms,
        )) {
            tracing::warn!(error = %e, "journal write failed");
        }
        self.events.publish(FlowEvent::ItemFinished {
            item_id,
            status,
            message,
        });
        ok
    }

    async fn drive(&self, item: WorkItem, cancel: &CancellationToken) -> PilotResult<ItemStatus> {
        let item_id = item.id;
        self.store
            .update_status(item_id, ItemStatus::InProgress)
            .await?;
        self.events.publish(FlowEvent::ItemStarted {
            item_id,
            phone: item.phone.clone(),
        });
        self.expectation.publish(Expectation {
            item_id,
            name: item.full_name.clone(),
            code: item.id_code.clone(),
        });

        if !pause(self.cfg.pre_initiate_delay(), cancel).await {
            return self.cancel_item(item_id).await;
        }

        let code = UssdCode::build(&self.initiation, &item.phone, &item.secret);
        tracing::info!(item_id, phone = %item.phone, "starting dialog flow");
        if let Err(e) = self.initiator.initiate(&code).await {
            tracing::warn!(item_id, error = %e, "flow initiation failed");
            self.store
                .update_status_with_message(
                    item_id,
                    ItemStatus::Failed,
                    &format!("Failed to start the dialog flow: {e}"),
                )
                .await?;
            return Ok(ItemStatus::Failed);
        }

        // The handler may already have settled the item.
        let settled = self
            .store
            .get_by_id(item_id)
            .await?
            .map(|i| i.status.is_terminal())
            .unwrap_or(false);
        if !settled {
            self.store.update_status(item_id, ItemStatus::UssdSent).await?;
        }
        self.store
            .update_field_filled(item_id, ProgressFlag::FlowInitiated, true)
            .await?;

        let verdict =
            completion::wait_for_completion(self.store.as_ref(), item_id, &self.cfg, cancel)
                .await?;
        tracing::debug!(item_id, ?verdict, "wait finished");
        match verdict {
            CompletionVerdict::Cancelled => self.cancel_item(item_id).await,
            other => Ok(other.status().unwrap_or(ItemStatus::Failed)),
        }
    }

    /// Marks the item CANCELLED unless a verdict was already written for it.
    async fn cancel_item(&self, item_id: i64) -> PilotResult<ItemStatus> {
        self.expectation.clear();
        let current = self.store.get_by_id(item_id).await?.map(|i| i.status);
        if let Some(st) = current.filter(ItemStatus::is_terminal) {
            tracing::info!(item_id, status = %st, "stop requested after verdict, status kept");
            return Ok(st);
        }
        tracing::info!(item_id, "item cancelled");
        self.store
            .update_status_with_message(item_id, ItemStatus::Cancelled, MSG_STOPPED)
            .await?;
        Ok(ItemStatus::Cancelled)
    }

    async fn fail(&self, item_id: i64, message: &str) {
        if let Err(e) = self
            .store
            .update_status_with_message(item_id, ItemStatus::Failed, message)
            .await
        {
            tracing::warn!(item_id, error = %e, "failure status update failed");
        }
    }
}
