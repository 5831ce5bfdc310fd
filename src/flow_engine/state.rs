use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::perception::stability::TextDebounce;
use crate::store::model::{ItemStatus, ProgressFlag};

// ── Steps ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStep {
    AwaitingName,
    NameFilled,
    AwaitingCne,
    CneFilled,
    AwaitingFinalAck,
    Done,
    AlreadyRegistered,
    Error,
}

impl FlowStep {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowStep::Done | FlowStep::AlreadyRegistered | FlowStep::Error
        )
    }
}

impl std::fmt::Display for FlowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlowStep::AwaitingName => "AWAITING_NAME",
            FlowStep::NameFilled => "NAME_FILLED",
            FlowStep::AwaitingCne => "AWAITING_CNE",
            FlowStep::CneFilled => "CNE_FILLED",
            FlowStep::AwaitingFinalAck => "AWAITING_FINAL_ACK",
            FlowStep::Done => "DONE",
            FlowStep::AlreadyRegistered => "ALREADY_REGISTERED",
            FlowStep::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Which of the two expected inputs a prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputField {
    Name,
    Code,
}

impl InputField {
    pub fn flag(&self) -> ProgressFlag {
        match self {
            InputField::Name => ProgressFlag::NameFilled,
            InputField::Code => ProgressFlag::CodeFilled,
        }
    }

    pub fn filled_status(&self) -> ItemStatus {
        match self {
            InputField::Name => ItemStatus::NameFilled,
            InputField::Code => ItemStatus::CneFilled,
        }
    }
}

// ── Ack reset policy ────────────────────────────────────────────────────────

/// When the flow state is cleared after an acknowledgement dialog (one that
/// follows both fills without recognisable success wording) is dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckResetPolicy {
    /// Keep the progress; further ack dialogs are only dismissed.
    #[default]
    Never,
    /// Reset after the first dismissed ack dialog.
    FirstDismiss,
    /// Reset after every dismissed ack dialog.
    EveryDismiss,
}

impl AckResetPolicy {
    pub fn resets_after(&self, dismiss_count: u32) -> bool {
        match self {
            AckResetPolicy::Never => false,
            AckResetPolicy::FirstDismiss => dismiss_count == 1,
            AckResetPolicy::EveryDismiss => true,
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────────────

/// Why a dismissal click was scheduled; selects the button set and what
/// happens once the click ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissReason {
    AlreadyRegistered,
    FinalSuccess,
    Acknowledgement,
    Error,
}

/// Deferred step of an action sequence, delivered back to the handler by the
/// scheduler after its delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", content = "reason", rename_all = "snake_case")]
pub enum Continuation {
    ClickSend,
    Dismiss(DismissReason),
    Reset,
}

/// Side effect requested by the state machine; the handler performs them in
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fill the expected value for `field` into the live dialog.
    Fill(InputField),
    Persist {
        status: ItemStatus,
        message: Option<String>,
    },
    MarkFilled(ProgressFlag),
    Schedule {
        delay: Duration,
        step: Continuation,
    },
    Reset,
}

// ── Flow state ──────────────────────────────────────────────────────────────

/// Progress of the item currently being driven. Owned by the handler task.
#[derive(Debug, Clone)]
pub struct FlowState {
    pub item_id: Option<i64>,
    pub step: FlowStep,
    pub waiting_for_name: bool,
    pub waiting_for_cne: bool,
    pub filled_name: bool,
    pub filled_cne: bool,
    /// Step given up after too many attempts; counts as resolved.
    pub skipped_name: bool,
    pub skipped_cne: bool,
    pub dismissed_final: bool,
    /// A terminal status was written for this item; survives `reset`.
    pub terminal_persisted: bool,
    pub name_attempts: u32,
    pub cne_attempts: u32,
    pub validation_dismiss_count: u32,
    pub debounce: TextDebounce,
    pub last_action_at: Option<Instant>,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            item_id: None,
            step: FlowStep::AwaitingName,
            waiting_for_name: false,
            waiting_for_cne: false,
            filled_name: false,
            filled_cne: false,
            skipped_name: false,
            skipped_cne: false,
            dismissed_final: false,
            terminal_persisted: false,
            name_attempts: 0,
            cne_attempts: 0,
            validation_dismiss_count: 0,
            debounce: TextDebounce::default(),
            last_action_at: None,
        }
    }
}

impl FlowState {
    pub fn for_item(item_id: i64) -> Self {
        Self {
            item_id: Some(item_id),
            ..Self::default()
        }
    }

    pub fn name_resolved(&self) -> bool {
        self.filled_name || self.skipped_name
    }

    pub fn cne_resolved(&self) -> bool {
        self.filled_cne || self.skipped_cne
    }

    pub fn both_resolved(&self) -> bool {
        self.name_resolved() && self.cne_resolved()
    }

    /// Clears progress for the same item.
    pub fn reset(&mut self) {
        let item_id = self.item_id;
        let terminal_persisted = self.terminal_persisted;
        *self = Self {
            item_id,
            terminal_persisted,
            ..Self::default()
        };
    }

    /// True while the last action is younger than `interval`.
    pub fn rate_limited(&self, now: Instant, interval: Duration) -> bool {
        self.last_action_at
            .map(|t| now.saturating_duration_since(t) < interval)
            .unwrap_or(false)
    }
}
