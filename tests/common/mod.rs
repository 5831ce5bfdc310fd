#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ussdpilot_lib::config::AppConfig;
use ussdpilot_lib::errors::{PilotError, PilotResult};
use ussdpilot_lib::executor::policy::FillFallbackPolicy;
use ussdpilot_lib::flow_engine::TreeNotifier;
use ussdpilot_lib::orchestrator::{FlowInitiator, UssdCode};
use ussdpilot_lib::perception::traits::{NodeAction, UiDriver};
use ussdpilot_lib::perception::types::{ChangeKind, NodePath, TreeChange, UiNode, UiTree};
use ussdpilot_lib::store::model::{ItemStatus, NewWorkItem};
use ussdpilot_lib::store::WorkItemStore;

pub const SURFACE: &str = "com.android.phone";

// ── Screens ─────────────────────────────────────────────────────────────────

pub fn dialog(message: &str, with_input: bool, button: &str) -> UiTree {
    let mut children = vec![UiNode::text(message)];
    if with_input {
        children.push(UiNode::input());
    }
    children.push(UiNode::button(button, "android:id/button1"));
    UiTree::new(SURFACE, UiNode::container(children))
}

pub fn name_prompt() -> UiTree {
    dialog("Please enter your full name", true, "Send")
}

pub fn id_prompt() -> UiTree {
    dialog("Enter your CNE", true, "Send")
}

pub fn success_dialog() -> UiTree {
    dialog("Registration successful. Thank you", false, "OK")
}

pub fn already_registered_dialog() -> UiTree {
    dialog("This number is already registered", false, "OK")
}

pub fn error_dialog() -> UiTree {
    dialog("Connection problem or invalid MMI code", false, "OK")
}

pub fn changed() -> TreeChange {
    TreeChange::new(SURFACE, ChangeKind::WindowContentChanged)
}

// ── Fake UI driver ──────────────────────────────────────────────────────────

/// Scripted host: shows one screen at a time, logs every action, and moves
/// to the next scripted screen when a button is clicked.
#[derive(Default)]
pub struct FakeDriver {
    screen: Mutex<Option<UiTree>>,
    script: Mutex<VecDeque<UiTree>>,
    actions: Mutex<Vec<NodeAction>>,
    fills_fail: AtomicBool,
    notifier: Mutex<Option<TreeNotifier>>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every text-entry strategy reports failure from now on.
    pub fn fail_fills(&self) {
        self.fills_fail.store(true, Ordering::SeqCst);
    }

    /// Changes are announced through `notifier` once attached.
    pub fn attach(&self, notifier: TreeNotifier) {
        *self.notifier.lock().unwrap() = Some(notifier);
    }

    pub fn show(&self, tree: Option<UiTree>) {
        *self.screen.lock().unwrap() = tree;
        if let Some(n) = self.notifier.lock().unwrap().as_ref() {
            n.notify(changed());
        }
    }

    /// Shows the first screen now and the rest one per button click.
    pub fn play(&self, screens: Vec<UiTree>) {
        let mut queue: VecDeque<UiTree> = screens.into();
        let first = queue.pop_front();
        *self.script.lock().unwrap() = queue;
        self.show(first);
    }

    pub fn actions(&self) -> Vec<NodeAction> {
        self.actions.lock().unwrap().clone()
    }

    /// Non-empty texts written into fields.
    pub fn filled_texts(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                NodeAction::SetText(t) if !t.is_empty() => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn clicks(&self) -> usize {
        self.actions()
            .iter()
            .filter(|a| matches!(a, NodeAction::Click))
            .count()
    }

    fn fills_ok(&self) -> bool {
        !self.fills_fail.load(Ordering::SeqCst)
    }

    fn clicked_button(&self, target: &NodePath) -> bool {
        let screen = self.screen.lock().unwrap();
        screen
            .as_ref()
            .and_then(|t| t.node(target))
            .map(|n| n.is_button_like() && !n.is_text_field())
            .unwrap_or(false)
    }
}

#[async_trait]
impl UiDriver for FakeDriver {
    async fn active_tree(&self) -> PilotResult<Option<UiTree>> {
        Ok(self.screen.lock().unwrap().clone())
    }

    async fn perform(&self, target: &NodePath, action: NodeAction) -> PilotResult<bool> {
        self.actions.lock().unwrap().push(action.clone());
        let done = match action {
            NodeAction::Click => {
                if self.clicked_button(target) {
                    let next = self.script.lock().unwrap().pop_front();
                    self.show(next);
                }
                true
            }
            NodeAction::Focus | NodeAction::SetSelection { .. } => true,
            NodeAction::SetText(_) | NodeAction::Paste => self.fills_ok(),
        };
        Ok(done)
    }

    async fn set_clipboard(&self, _text: &str) -> PilotResult<bool> {
        Ok(self.fills_ok())
    }

    async fn tap(&self, _x: i32, _y: i32) -> PilotResult<bool> {
        Ok(self.fills_ok())
    }
}

// ── Fake initiator ──────────────────────────────────────────────────────────

pub enum InitBehavior {
    /// Accept and do nothing else.
    Accept,
    Fail,
    /// Write COMPLETED for the item whose phone is in the code.
    Complete(Arc<dyn WorkItemStore>),
    /// Start `FakeDriver::play` with these screens.
    Play(Arc<FakeDriver>, Vec<UiTree>),
    /// Write COMPLETED for the item, then request a stop.
    CompleteThenStop(Arc<dyn WorkItemStore>, CancellationToken),
}

pub struct FakeInitiator {
    behavior: InitBehavior,
    codes: Mutex<Vec<String>>,
}

impl FakeInitiator {
    pub fn new(behavior: InitBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            codes: Mutex::new(Vec::new()),
        })
    }

    pub fn codes(&self) -> Vec<String> {
        self.codes.lock().unwrap().clone()
    }
}

/// Phone number embedded in `PREFIX*SUB*<phone>*SUB*<secret>#`.
pub fn phone_of(code: &UssdCode) -> String {
    code.as_str().split('*').nth(2).unwrap_or_default().to_string()
}

#[async_trait]
impl FlowInitiator for FakeInitiator {
    async fn initiate(&self, code: &UssdCode) -> PilotResult<()> {
        self.codes.lock().unwrap().push(code.to_string());
        match &self.behavior {
            InitBehavior::Accept => Ok(()),
            InitBehavior::Fail => Err(PilotError::Initiation("dialer unavailable".into())),
            InitBehavior::Complete(store) => {
                if let Some(item) = store.get_by_phone(&phone_of(code)).await? {
                    store
                        .update_status_with_message(item.id, ItemStatus::Completed, "Success: ok")
                        .await?;
                }
                Ok(())
            }
            InitBehavior::CompleteThenStop(store, cancel) => {
                if let Some(item) = store.get_by_phone(&phone_of(code)).await? {
                    store
                        .update_status_with_message(item.id, ItemStatus::Completed, "Success: ok")
                        .await?;
                }
                cancel.cancel();
                Ok(())
            }
            InitBehavior::Play(driver, screens) => {
                driver.play(screens.clone());
                Ok(())
            }
        }
    }
}

// ── Config and data ─────────────────────────────────────────────────────────

/// Defaults with every delay shrunk for tests.
pub fn fast_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.flow.min_action_interval_ms = 0;
    cfg.flow.fill_settle_ms = 0;
    cfg.flow.send_delay_ms = 5;
    cfg.flow.dismiss_delay_ms = 5;
    cfg.flow.reset_grace_ms = 5;
    cfg.flow.click_settle_ms = 0;
    cfg.flow.tap_retry_delay_ms = 0;
    cfg.orchestrator.poll_interval_ms = 5;
    cfg.orchestrator.max_wait_ms = 2_000;
    cfg.orchestrator.both_filled_grace_ms = 60;
    cfg.orchestrator.stale_poll_limit = 200;
    cfg.orchestrator.terminal_settle_ms = 1;
    cfg.orchestrator.cooldown_ms = 5;
    cfg.orchestrator.error_cooldown_ms = 5;
    cfg.orchestrator.busy_retry_ms = 5;
    cfg.orchestrator.pre_initiate_delay_ms = 1;
    cfg.journal.enabled = false;
    cfg
}

pub fn strict(mut cfg: AppConfig) -> AppConfig {
    cfg.flow.fill_fallback = FillFallbackPolicy::Strict;
    cfg
}

pub fn person(n: u32) -> NewWorkItem {
    NewWorkItem::new(
        &format!("06{:08}", n),
        "1234",
        &format!("Person {n}"),
        &format!("AB{n:05}"),
    )
}

/// Polls `cond` every few milliseconds for up to two seconds.
pub async fn eventually<F, Fut>(mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if cond().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    false
}
