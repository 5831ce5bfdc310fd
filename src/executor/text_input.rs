// Text entry into a located field: an ordered ladder of strategies, stopping
// at the first one the host confirms.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::input;
use crate::executor::policy::FillFallbackPolicy;
use crate::perception::traits::UiDriver;
use crate::perception::types::{NodePath, UiNode};
use crate::perception::ui_tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    DirectSetText,
    FocusThenSetText,
    ClearThenSetText,
    ClipboardPaste,
    TapThenSetText,
}

pub const STRATEGY_ORDER: [FillStrategy; 5] = [
    FillStrategy::DirectSetText,
    FillStrategy::FocusThenSetText,
    FillStrategy::ClearThenSetText,
    FillStrategy::ClipboardPaste,
    FillStrategy::TapThenSetText,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "strategy", rename_all = "snake_case")]
pub enum FillOutcome {
    /// No text field in the tree.
    NoField,
    /// The host confirmed the text through this strategy.
    Filled(FillStrategy),
    /// Nothing confirmed; reported as success under `AssumeSuccess`.
    Assumed,
    /// Nothing confirmed under `Strict`.
    Unconfirmed,
}

impl FillOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, FillOutcome::Filled(_) | FillOutcome::Assumed)
    }
}

/// Runs the strategies in order against the field at `path`.
pub async fn fill_field(
    driver: &dyn UiDriver,
    path: &NodePath,
    node: &UiNode,
    text: &str,
    policy: FillFallbackPolicy,
    tap_retry_delay: Duration,
) -> FillOutcome {
    for strategy in STRATEGY_ORDER {
        if run_strategy(driver, path, node, text, strategy, tap_retry_delay).await {
            tracing::debug!(path = %path, ?strategy, "field filled");
            return FillOutcome::Filled(strategy);
        }
        tracing::debug!(path = %path, ?strategy, "fill strategy not confirmed");
    }

    if policy.assumes_success() {
        tracing::warn!(path = %path, "no fill strategy confirmed; assuming the text landed");
        FillOutcome::Assumed
    } else {
        tracing::warn!(path = %path, "no fill strategy confirmed");
        FillOutcome::Unconfirmed
    }
}

async fn run_strategy(
    driver: &dyn UiDriver,
    path: &NodePath,
    node: &UiNode,
    text: &str,
    strategy: FillStrategy,
    tap_retry_delay: Duration,
) -> bool {
    match strategy {
        FillStrategy::DirectSetText => input::set_text(driver, path, text).await,
        FillStrategy::FocusThenSetText => {
            input::click(driver, path).await;
            input::focus(driver, path).await;
            input::set_text(driver, path, text).await
        }
        FillStrategy::ClearThenSetText => {
            input::set_text(driver, path, "").await;
            input::set_text(driver, path, text).await
        }
        FillStrategy::ClipboardPaste => {
            if !input::set_clipboard(driver, text).await {
                return false;
            }
            input::select_all(driver, path).await;
            input::paste(driver, path).await
        }
        FillStrategy::TapThenSetText => {
            let (x, y) = node.bounds.center();
            if x <= 0 || y <= 0 {
                return false;
            }
            if !input::tap(driver, x, y).await {
                return false;
            }
            tokio::time::sleep(tap_retry_delay).await;
            // The tap may have rebuilt the window; look the field up again.
            let target = match driver.active_tree().await {
                Ok(Some(tree)) => ui_tree::find_first(&tree, UiNode::is_text_field)
                    .unwrap_or_else(|| path.clone()),
                _ => path.clone(),
            };
            input::set_text(driver, &target, text).await
        }
    }
}
