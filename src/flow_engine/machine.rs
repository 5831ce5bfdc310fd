// Pure transitions of the per-item flow. Nothing here touches the UI or the
// store; every effect comes back as a `Command` for the handler to run.
use std::time::{Duration, Instant};

use crate::config::FlowConfig;
use crate::executor::text_input::FillOutcome;
use crate::flow_engine::classifier::Category;
use crate::flow_engine::state::{
    AckResetPolicy, Command, Continuation, DismissReason, FlowState, FlowStep, InputField,
};
use crate::store::model::ItemStatus;

pub struct FlowMachine {
    max_input_attempts: u32,
    message_max_len: usize,
    send_delay: Duration,
    dismiss_delay: Duration,
    reset_grace: Duration,
    ack_reset: AckResetPolicy,
    optimistic_ack_completion: bool,
}

/// First `max` characters of `text`, trimmed.
pub fn truncate_message(text: &str, max: usize) -> String {
    text.trim().chars().take(max).collect()
}

impl FlowMachine {
    pub fn new(cfg: &FlowConfig) -> Self {
        Self {
            max_input_attempts: cfg.max_input_attempts,
            message_max_len: cfg.message_max_len,
            send_delay: cfg.send_delay(),
            dismiss_delay: cfg.dismiss_delay(),
            reset_grace: cfg.reset_grace(),
            ack_reset: cfg.ack_reset,
            optimistic_ack_completion: cfg.optimistic_ack_completion,
        }
    }

    fn message(&self, prefix: &str, text: &str) -> Option<String> {
        Some(format!("{prefix}: {}", truncate_message(text, self.message_max_len)))
    }

    fn dismiss(&self, reason: DismissReason) -> Command {
        Command::Schedule {
            delay: self.dismiss_delay,
            step: Continuation::Dismiss(reason),
        }
    }

    /// Reacts to one classified observation of `text`.
    pub fn on_category(
        &self,
        state: &mut FlowState,
        category: Category,
        text: &str,
        now: Instant,
    ) -> Vec<Command> {
        match category {
            Category::NamePrompt => self.on_prompt(state, InputField::Name, now),
            Category::IdPrompt => self.on_prompt(state, InputField::Code, now),

            Category::AlreadyRegisteredMessage => {
                state.step = FlowStep::AlreadyRegistered;
                state.last_action_at = Some(now);
                let mut cmds = Vec::new();
                if !state.terminal_persisted {
                    state.terminal_persisted = true;
                    cmds.push(Command::Persist {
                        status: ItemStatus::AlreadyRegistered,
                        message: self.message("Already registered", text),
                    });
                }
                cmds.push(self.dismiss(DismissReason::AlreadyRegistered));
                cmds.push(Command::Reset);
                cmds
            }

            Category::SuccessMessage => {
                if state.dismissed_final {
                    return Vec::new();
                }
                state.dismissed_final = true;
                state.step = FlowStep::Done;
                state.last_action_at = Some(now);
                let mut cmds = Vec::new();
                if !state.terminal_persisted {
                    state.terminal_persisted = true;
                    cmds.push(Command::Persist {
                        status: ItemStatus::Completed,
                        message: self.message("Success", text),
                    });
                }
                cmds.push(self.dismiss(DismissReason::FinalSuccess));
                cmds
            }

            Category::GenericAckDialog => {
                state.step = FlowStep::AwaitingFinalAck;
                state.last_action_at = Some(now);
                let mut cmds = Vec::new();
                if !state.dismissed_final {
                    state.dismissed_final = true;
                    if self.optimistic_ack_completion && !state.terminal_persisted {
                        state.terminal_persisted = true;
                        cmds.push(Command::Persist {
                            status: ItemStatus::Completed,
                            message: self.message("Completed", text),
                        });
                    }
                }
                cmds.push(self.dismiss(DismissReason::Acknowledgement));
                cmds
            }

            Category::ErrorMessage => {
                state.step = FlowStep::Error;
                state.last_action_at = Some(now);
                let mut cmds = Vec::new();
                if !state.terminal_persisted {
                    state.terminal_persisted = true;
                    cmds.push(Command::Persist {
                        status: ItemStatus::Failed,
                        message: self.message("Error", text),
                    });
                }
                cmds.push(self.dismiss(DismissReason::Error));
                cmds.push(Command::Reset);
                cmds
            }

            Category::Unknown => Vec::new(),
        }
    }

    fn on_prompt(&self, state: &mut FlowState, field: InputField, now: Instant) -> Vec<Command> {
        state.debounce.record_retry();
        let attempts = match field {
            InputField::Name => {
                state.waiting_for_name = true;
                state.step = FlowStep::AwaitingName;
                state.name_attempts += 1;
                state.name_attempts
            }
            InputField::Code => {
                state.waiting_for_cne = true;
                state.step = FlowStep::AwaitingCne;
                state.cne_attempts += 1;
                state.cne_attempts
            }
        };

        if attempts <= self.max_input_attempts {
            return vec![Command::Fill(field)];
        }

        // Give up on this input: mark the step resolved so the flow can move
        // on, without claiming the value was entered.
        tracing::warn!(?field, attempts, "input attempts exhausted, skipping step");
        match field {
            InputField::Name => {
                state.skipped_name = true;
                state.waiting_for_name = false;
                state.step = FlowStep::NameFilled;
            }
            InputField::Code => {
                state.skipped_cne = true;
                state.waiting_for_cne = false;
                state.step = FlowStep::CneFilled;
            }
        }
        state.last_action_at = Some(now);
        vec![Command::Persist {
            status: field.filled_status(),
            message: Some(format!(
                "{} step skipped after {} attempts",
                match field {
                    InputField::Name => "Name",
                    InputField::Code => "Identity code",
                },
                attempts - 1
            )),
        }]
    }

    /// Follows up on a fill requested through `Command::Fill`.
    pub fn on_fill_outcome(
        &self,
        state: &mut FlowState,
        field: InputField,
        outcome: FillOutcome,
        now: Instant,
    ) -> Vec<Command> {
        if !outcome.succeeded() {
            tracing::debug!(?field, ?outcome, "fill not accepted");
            return Vec::new();
        }
        match field {
            InputField::Name => {
                state.filled_name = true;
                state.waiting_for_name = false;
                state.step = FlowStep::NameFilled;
            }
            InputField::Code => {
                state.filled_cne = true;
                state.waiting_for_cne = false;
                state.step = FlowStep::CneFilled;
            }
        }
        state.last_action_at = Some(now);
        vec![
            Command::Persist {
                status: field.filled_status(),
                message: None,
            },
            Command::MarkFilled(field.flag()),
            Command::Schedule {
                delay: self.send_delay,
                step: Continuation::ClickSend,
            },
        ]
    }

    /// Follows up on a dismissal click; `clicked` is false when no button was
    /// found or the dialog was gone.
    pub fn on_dismissed(
        &self,
        state: &mut FlowState,
        reason: DismissReason,
        clicked: bool,
    ) -> Vec<Command> {
        match reason {
            DismissReason::FinalSuccess => {
                if clicked {
                    state.validation_dismiss_count += 1;
                }
                vec![Command::Schedule {
                    delay: self.reset_grace,
                    step: Continuation::Reset,
                }]
            }
            DismissReason::Acknowledgement => {
                if !clicked {
                    return Vec::new();
                }
                state.validation_dismiss_count += 1;
                if self.ack_reset.resets_after(state.validation_dismiss_count) {
                    vec![Command::Schedule {
                        delay: self.reset_grace,
                        step: Continuation::Reset,
                    }]
                } else {
                    Vec::new()
                }
            }
            DismissReason::AlreadyRegistered | DismissReason::Error => Vec::new(),
        }
    }
}
