use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, FlowConfig, KeywordConfig};
use crate::executor::ActionExecutor;
use crate::flow_engine::classifier::TextClassifier;
use crate::flow_engine::event_bus::{EventBus, FlowEvent, HandlerInput, Ticket};
use crate::flow_engine::machine::FlowMachine;
use crate::flow_engine::scheduler::Scheduler;
use crate::flow_engine::state::{Command, Continuation, DismissReason, FlowState, InputField};
use crate::orchestrator::expectation::{Expectation, ExpectationReader};
use crate::perception::traits::UiDriver;
use crate::perception::types::{TreeChange, UiTree};
use crate::perception::ui_tree::{self, SurfaceFilter};
use crate::store::model::ItemStatus;
use crate::store::WorkItemStore;

/// Reactive side of the flow: drains the inbox, classifies the active dialog
/// and drives the state machine for the expected item. Sole owner of the
/// `FlowState`.
pub struct FlowHandler {
    executor: ActionExecutor,
    classifier: TextClassifier,
    machine: FlowMachine,
    store: Arc<dyn WorkItemStore>,
    expectation: ExpectationReader,
    surfaces: SurfaceFilter,
    scheduler: Scheduler,
    events: EventBus,
    keywords: Arc<KeywordConfig>,
    flow: FlowConfig,
    state: FlowState,
}

impl FlowHandler {
    pub fn new(
        cfg: &AppConfig,
        driver: Arc<dyn UiDriver>,
        store: Arc<dyn WorkItemStore>,
        expectation: ExpectationReader,
        events: EventBus,
        inbox_tx: mpsc::Sender<HandlerInput>,
    ) -> Self {
        let keywords = Arc::new(cfg.keywords.clone());
        Self {
            executor: ActionExecutor::new(driver, Arc::clone(&keywords), &cfg.flow),
            classifier: TextClassifier::new(
                Arc::clone(&keywords),
                cfg.flow.already_registered_requires_fill,
            ),
            machine: FlowMachine::new(&cfg.flow),
            store,
            expectation,
            surfaces: SurfaceFilter::from_config(&cfg.surfaces),
            scheduler: Scheduler::new(inbox_tx),
            events,
            keywords,
            flow: cfg.flow.clone(),
            state: FlowState::default(),
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    /// Processes inputs until `cancel` fires or every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::Receiver<HandlerInput>, cancel: CancellationToken) {
        tracing::info!("flow handler started");
        loop {
            let input = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(m) => m,
                    None => break,
                },
            };
            self.handle(input).await;
        }
        self.scheduler.cancel_all();
        tracing::info!("flow handler stopped");
    }

    pub async fn handle(&mut self, input: HandlerInput) {
        match input {
            HandlerInput::Changed(change) => self.on_change(change).await,
            HandlerInput::Continue(ticket) => self.on_continuation(ticket).await,
        }
    }

    // ── Tree changes ────────────────────────────────────────────────────────

    async fn on_change(&mut self, change: TreeChange) {
        if !change.kind.is_relevant() {
            return;
        }
        let Some(exp) = self.expectation.current() else {
            tracing::trace!(surface = %change.surface, "no item expected, change ignored");
            return;
        };
        self.sync_item(&exp);

        if !self.surfaces.allows(&change.surface) {
            tracing::trace!(surface = %change.surface, "change from foreign surface ignored");
            return;
        }
        let Some(tree) = self.active_tree().await else {
            return;
        };

        let now = Instant::now();
        if self.state.rate_limited(now, self.flow.min_action_interval()) {
            tracing::trace!(item_id = exp.item_id, "rate limited");
            return;
        }

        let snap = ui_tree::snapshot(&tree, &self.keywords.ack_buttons);
        if snap.text.trim().chars().count() < self.flow.min_dialog_text_len {
            return;
        }
        if !self
            .state
            .debounce
            .admit(&snap.text, self.flow.max_same_text_retries)
        {
            tracing::debug!(item_id = exp.item_id, "same dialog text, retry budget spent");
            return;
        }

        let category = self.classifier.classify(&snap, &self.state);
        tracing::debug!(
            item_id = exp.item_id,
            ?category,
            step = %self.state.step,
            name_attempts = self.state.name_attempts,
            cne_attempts = self.state.cne_attempts,
            text = %snap.text,
            "dialog classified"
        );
        let cmds = self
            .machine
            .on_category(&mut self.state, category, &snap.text, now);
        self.apply(cmds, &exp, &tree.surface).await;
    }

    /// Starts from a clean state whenever the expected item changes.
    fn sync_item(&mut self, exp: &Expectation) {
        if self.state.item_id == Some(exp.item_id) {
            return;
        }
        if let Some(prev) = self.state.item_id {
            tracing::debug!(prev, next = exp.item_id, "new item, flow state reset");
        }
        self.scheduler.cancel_all();
        self.state = FlowState::for_item(exp.item_id);
    }

    /// The active window, if it belongs to an allowed surface.
    async fn active_tree(&self) -> Option<UiTree> {
        match self.executor.driver().active_tree().await {
            Ok(Some(tree)) if self.surfaces.allows(&tree.surface) => Some(tree),
            Ok(Some(tree)) => {
                tracing::debug!(surface = %tree.surface, "active window outside allowed surfaces");
                None
            }
            Ok(None) => {
                tracing::trace!("no active window");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "reading active window failed");
                None
            }
        }
    }

    // ── Command execution ───────────────────────────────────────────────────

    async fn apply(&mut self, cmds: Vec<Command>, exp: &Expectation, surface: &str) {
        let mut queue: VecDeque<Command> = cmds.into();
        while let Some(cmd) = queue.pop_front() {
            match cmd {
                Command::Fill(field) => {
                    let follow = self.fill(field, exp).await;
                    for c in follow.into_iter().rev() {
                        queue.push_front(c);
                    }
                }
                Command::Persist { status, message } => {
                    self.persist(exp.item_id, status, message).await;
                }
                Command::MarkFilled(flag) => {
                    if let Err(e) = self.store.update_field_filled(exp.item_id, flag, true).await {
                        tracing::warn!(item_id = exp.item_id, ?flag, error = %e, "flag update failed");
                    }
                }
                Command::Schedule { delay, step } => {
                    self.scheduler.schedule(
                        delay,
                        Ticket {
                            item_id: exp.item_id,
                            surface: surface.to_string(),
                            step,
                        },
                    );
                }
                Command::Reset => {
                    tracing::debug!(item_id = exp.item_id, "flow state reset");
                    self.state.reset();
                }
            }
        }
    }

    async fn fill(&mut self, field: InputField, exp: &Expectation) -> Vec<Command> {
        tokio::time::sleep(self.flow.fill_settle()).await;

        if self.expectation.current().map(|e| e.item_id) != Some(exp.item_id) {
            tracing::debug!(item_id = exp.item_id, "item changed before fill");
            return Vec::new();
        }
        let Some(tree) = self.active_tree().await else {
            tracing::debug!(item_id = exp.item_id, ?field, "dialog gone before fill");
            return Vec::new();
        };

        let value = match field {
            InputField::Name => exp.name.as_str(),
            InputField::Code => exp.code.as_str(),
        };
        let outcome = self.executor.find_and_fill_field(&tree, value).await;
        tracing::info!(item_id = exp.item_id, ?field, ?outcome, "fill attempted");
        self.machine
            .on_fill_outcome(&mut self.state, field, outcome, Instant::now())
    }

    async fn persist(&self, item_id: i64, status: ItemStatus, message: Option<String>) {
        let result = match &message {
            Some(m) => {
                self.store
                    .update_status_with_message(item_id, status, m)
                    .await
            }
            None => self.store.update_status(item_id, status).await,
        };
        match result {
            Ok(()) => {
                tracing::info!(item_id, status = %status, "status persisted");
                self.events
                    .publish(FlowEvent::StatusChanged { item_id, status });
            }
            Err(e) => {
                tracing::warn!(item_id, status = %status, error = %e, "status update failed");
            }
        }
    }

    // ── Continuations ───────────────────────────────────────────────────────

    async fn on_continuation(&mut self, ticket: Ticket) {
        let current = self
            .expectation
            .current()
            .filter(|e| e.item_id == ticket.item_id);
        let Some(exp) = current else {
            tracing::debug!(item_id = ticket.item_id, step = ?ticket.step, "stale continuation dropped");
            return;
        };
        if self.state.item_id != Some(ticket.item_id) {
            return;
        }

        match ticket.step {
            Continuation::Reset => {
                tracing::debug!(item_id = ticket.item_id, "flow state reset");
                self.state.reset();
            }
            Continuation::ClickSend => {
                let Some(tree) = self.active_tree().await else {
                    tracing::debug!(item_id = ticket.item_id, "dialog gone, send skipped");
                    return;
                };
                if tree.surface != ticket.surface {
                    tracing::debug!(from = %ticket.surface, to = %tree.surface, "dialog surface moved");
                }
                let clicked = self.executor.click_send(&tree).await;
                if clicked {
                    self.state.last_action_at = Some(Instant::now());
                }
                tracing::debug!(item_id = ticket.item_id, clicked, "send click");
            }
            Continuation::Dismiss(reason) => {
                let clicked = match self.active_tree().await {
                    Some(tree) => match reason {
                        DismissReason::Error => self.executor.find_first_ack_button(&tree).await,
                        _ => self.executor.find_positive_button(&tree).await,
                    },
                    None => false,
                };
                tracing::debug!(item_id = ticket.item_id, ?reason, clicked, "dismissal");
                let cmds = self.machine.on_dismissed(&mut self.state, reason, clicked);
                self.apply(cmds, &exp, &ticket.surface).await;
            }
        }
    }
}
