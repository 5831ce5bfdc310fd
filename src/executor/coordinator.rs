use std::sync::Arc;
use std::time::Duration;

use crate::config::{FlowConfig, KeywordConfig};
use crate::executor::dispatcher::{self, ClickTarget};
use crate::executor::input;
use crate::executor::policy::FillFallbackPolicy;
use crate::executor::text_input::{self, FillOutcome};
use crate::perception::traits::UiDriver;
use crate::perception::types::{UiNode, UiTree};
use crate::perception::ui_tree;

/// Stateless search-and-act engine over one tree snapshot.
pub struct ActionExecutor {
    driver: Arc<dyn UiDriver>,
    keywords: Arc<KeywordConfig>,
    fill_policy: FillFallbackPolicy,
    click_settle: Duration,
    tap_retry_delay: Duration,
}

impl ActionExecutor {
    pub fn new(driver: Arc<dyn UiDriver>, keywords: Arc<KeywordConfig>, flow: &FlowConfig) -> Self {
        Self {
            driver,
            keywords,
            fill_policy: flow.fill_fallback,
            click_settle: flow.click_settle(),
            tap_retry_delay: flow.tap_retry_delay(),
        }
    }

    pub fn driver(&self) -> &Arc<dyn UiDriver> {
        &self.driver
    }

    pub fn fill_policy(&self) -> FillFallbackPolicy {
        self.fill_policy
    }

    /// Fills the first text field of `tree` with `text`.
    pub async fn find_and_fill_field(&self, tree: &UiTree, text: &str) -> FillOutcome {
        let Some(path) = ui_tree::find_first(tree, UiNode::is_text_field) else {
            tracing::debug!(surface = %tree.surface, "no text field to fill");
            return FillOutcome::NoField;
        };
        let Some(node) = tree.node(&path) else {
            return FillOutcome::NoField;
        };
        text_input::fill_field(
            self.driver.as_ref(),
            &path,
            node,
            text,
            self.fill_policy,
            self.tap_retry_delay,
        )
        .await
    }

    /// Clicks the first button-like node whose label or view id matches.
    pub async fn find_and_click(&self, tree: &UiTree, labels: &[String], ids: &[String]) -> bool {
        let target = ClickTarget::labels(labels)
            .with_ids(ids)
            .with_button_ids(&self.keywords.button_ids);
        self.click_target(tree, &target).await
    }

    /// Broad dismiss set: ok / close / cancel in both languages.
    pub async fn find_first_ack_button(&self, tree: &UiTree) -> bool {
        let target = ClickTarget::labels(&self.keywords.dismiss_buttons)
            .with_button_ids(&self.keywords.button_ids);
        self.click_target(tree, &target).await
    }

    /// Positive / send / confirm, also by structural id for unlabeled buttons.
    pub async fn find_positive_button(&self, tree: &UiTree) -> bool {
        let target = ClickTarget::labels(&self.keywords.positive_buttons)
            .with_ids(&self.keywords.positive_ids);
        self.click_target(tree, &target).await
    }

    /// Submit after a fill: the positive button first, then the send labels.
    pub async fn click_send(&self, tree: &UiTree) -> bool {
        if self.find_positive_button(tree).await {
            return true;
        }
        let target = ClickTarget::labels(&self.keywords.send_buttons)
            .with_button_ids(&self.keywords.button_ids);
        self.click_target(tree, &target).await
    }

    async fn click_target(&self, tree: &UiTree, target: &ClickTarget<'_>) -> bool {
        let Some(path) = dispatcher::locate(tree, target) else {
            tracing::debug!(surface = %tree.surface, "no matching button");
            return false;
        };
        if input::click(self.driver.as_ref(), &path).await {
            tracing::debug!(path = %path, "button clicked");
            tokio::time::sleep(self.click_settle).await;
            true
        } else {
            tracing::debug!(path = %path, "button click not confirmed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PilotResult;
    use crate::executor::text_input::FillStrategy;
    use crate::perception::traits::NodeAction;
    use crate::perception::types::NodePath;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Accepts `SetText` only after `accept_after` attempts; records every call.
    struct CountingDriver {
        accept_after: usize,
        set_text_calls: Mutex<usize>,
        log: Mutex<Vec<(NodePath, NodeAction)>>,
        clipboard_ok: bool,
    }

    impl CountingDriver {
        fn new(accept_after: usize, clipboard_ok: bool) -> Self {
            Self {
                accept_after,
                set_text_calls: Mutex::new(0),
                log: Mutex::new(Vec::new()),
                clipboard_ok,
            }
        }
    }

    #[async_trait]
    impl UiDriver for CountingDriver {
        async fn active_tree(&self) -> PilotResult<Option<UiTree>> {
            Ok(None)
        }

        async fn perform(&self, target: &NodePath, action: NodeAction) -> PilotResult<bool> {
            self.log.lock().unwrap().push((target.clone(), action.clone()));
            match action {
                NodeAction::SetText(t) if !t.is_empty() => {
                    let mut n = self.set_text_calls.lock().unwrap();
                    *n += 1;
                    Ok(*n > self.accept_after)
                }
                NodeAction::Paste => Ok(self.clipboard_ok),
                NodeAction::Click => Ok(true),
                _ => Ok(false),
            }
        }

        async fn set_clipboard(&self, _text: &str) -> PilotResult<bool> {
            Ok(self.clipboard_ok)
        }

        async fn tap(&self, _x: i32, _y: i32) -> PilotResult<bool> {
            Ok(false)
        }
    }

    fn flow(policy: FillFallbackPolicy) -> FlowConfig {
        FlowConfig {
            fill_fallback: policy,
            click_settle_ms: 0,
            tap_retry_delay_ms: 0,
            ..FlowConfig::default()
        }
    }

    fn prompt() -> UiTree {
        UiTree::new(
            "com.android.phone",
            UiNode::container(vec![
                UiNode::text("Entrez votre nom"),
                UiNode::input(),
                UiNode::button("Envoyer", "android:id/button1"),
            ]),
        )
    }

    fn executor(driver: Arc<CountingDriver>, policy: FillFallbackPolicy) -> ActionExecutor {
        ActionExecutor::new(driver, Arc::new(KeywordConfig::default()), &flow(policy))
    }

    #[tokio::test]
    async fn direct_set_text_wins_first() {
        let driver = Arc::new(CountingDriver::new(0, false));
        let exec = executor(driver.clone(), FillFallbackPolicy::Strict);
        let outcome = exec.find_and_fill_field(&prompt(), "Jane Doe").await;
        assert_eq!(outcome, FillOutcome::Filled(FillStrategy::DirectSetText));
        let log = driver.log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, NodePath(vec![1]));
    }

    #[tokio::test]
    async fn later_strategy_used_when_earlier_ones_fail() {
        let driver = Arc::new(CountingDriver::new(2, false));
        let exec = executor(driver, FillFallbackPolicy::Strict);
        let outcome = exec.find_and_fill_field(&prompt(), "Jane Doe").await;
        assert_eq!(outcome, FillOutcome::Filled(FillStrategy::ClearThenSetText));
    }

    #[tokio::test]
    async fn clipboard_paste_is_a_fallback() {
        let driver = Arc::new(CountingDriver::new(usize::MAX, true));
        let exec = executor(driver, FillFallbackPolicy::Strict);
        let outcome = exec.find_and_fill_field(&prompt(), "Jane Doe").await;
        assert_eq!(outcome, FillOutcome::Filled(FillStrategy::ClipboardPaste));
    }

    #[tokio::test]
    async fn exhausted_ladder_follows_policy() {
        let strict = executor(
            Arc::new(CountingDriver::new(usize::MAX, false)),
            FillFallbackPolicy::Strict,
        );
        assert_eq!(
            strict.find_and_fill_field(&prompt(), "x").await,
            FillOutcome::Unconfirmed
        );

        let optimistic = executor(
            Arc::new(CountingDriver::new(usize::MAX, false)),
            FillFallbackPolicy::AssumeSuccess,
        );
        let outcome = optimistic.find_and_fill_field(&prompt(), "x").await;
        assert_eq!(outcome, FillOutcome::Assumed);
        assert!(outcome.succeeded());
    }

    #[tokio::test]
    async fn missing_field_is_never_assumed() {
        let tree = UiTree::new(
            "com.android.phone",
            UiNode::container(vec![UiNode::text("Merci")]),
        );
        let exec = executor(
            Arc::new(CountingDriver::new(0, true)),
            FillFallbackPolicy::AssumeSuccess,
        );
        assert_eq!(exec.find_and_fill_field(&tree, "x").await, FillOutcome::NoField);
    }

    #[tokio::test]
    async fn send_click_targets_positive_button() {
        let driver = Arc::new(CountingDriver::new(0, false));
        let exec = executor(driver.clone(), FillFallbackPolicy::Strict);
        assert!(exec.click_send(&prompt()).await);
        let log = driver.log.lock().unwrap();
        assert_eq!(log.last().unwrap(), &(NodePath(vec![2]), NodeAction::Click));
    }
}
