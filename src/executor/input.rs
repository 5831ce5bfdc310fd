// Primitive node actions. Driver errors are logged and read as "not done";
// a flaky host must never abort the flow.
use crate::perception::traits::{NodeAction, UiDriver};
use crate::perception::types::NodePath;

pub async fn perform(driver: &dyn UiDriver, target: &NodePath, action: NodeAction) -> bool {
    let label = action_label(&action);
    match driver.perform(target, action).await {
        Ok(done) => {
            tracing::trace!(path = %target, action = label, done, "node action");
            done
        }
        Err(e) => {
            tracing::warn!(path = %target, action = label, error = %e, "node action failed");
            false
        }
    }
}

pub async fn focus(driver: &dyn UiDriver, target: &NodePath) -> bool {
    perform(driver, target, NodeAction::Focus).await
}

pub async fn click(driver: &dyn UiDriver, target: &NodePath) -> bool {
    perform(driver, target, NodeAction::Click).await
}

pub async fn set_text(driver: &dyn UiDriver, target: &NodePath, text: &str) -> bool {
    perform(driver, target, NodeAction::SetText(text.to_string())).await
}

pub async fn select_all(driver: &dyn UiDriver, target: &NodePath) -> bool {
    perform(
        driver,
        target,
        NodeAction::SetSelection {
            start: 0,
            end: usize::MAX,
        },
    )
    .await
}

pub async fn paste(driver: &dyn UiDriver, target: &NodePath) -> bool {
    perform(driver, target, NodeAction::Paste).await
}

pub async fn set_clipboard(driver: &dyn UiDriver, text: &str) -> bool {
    driver.set_clipboard(text).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "clipboard write failed");
        false
    })
}

pub async fn tap(driver: &dyn UiDriver, x: i32, y: i32) -> bool {
    driver.tap(x, y).await.unwrap_or_else(|e| {
        tracing::warn!(x, y, error = %e, "tap failed");
        false
    })
}

fn action_label(action: &NodeAction) -> &'static str {
    match action {
        NodeAction::Focus => "focus",
        NodeAction::Click => "click",
        NodeAction::SetText(_) => "set_text",
        NodeAction::SetSelection { .. } => "set_selection",
        NodeAction::Paste => "paste",
    }
}
