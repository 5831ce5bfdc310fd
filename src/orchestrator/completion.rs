// Completion detection for one in-flight item. The dialogs give no reliable
// terminal signal, so besides terminal statuses written by the handler the
// wait falls back to progress-flag heuristics and a hard timeout.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::errors::PilotResult;
use crate::store::model::ItemStatus;
use crate::store::WorkItemStore;

pub const MSG_BOTH_FILLED: &str = "Completed (name and identity code filled)";
pub const MSG_STALLED: &str = "Completed (forced after name filled, identity code may have failed)";
pub const MSG_TIMEOUT_WITH_NAME: &str = "Completed (timeout but name was filled)";
pub const MSG_TIMEOUT: &str = "Timeout - registration may be incomplete";

/// Which optimistic completions the wait may force.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionPolicy {
    /// Both inputs accepted and no verdict after the grace period: COMPLETED.
    pub force_when_both_filled: bool,
    /// Status unchanged for too many polls with the name accepted: COMPLETED.
    pub force_on_stall: bool,
    /// Timeout with the name accepted: COMPLETED instead of FAILED.
    pub complete_on_timeout_with_name: bool,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            force_when_both_filled: true,
            force_on_stall: true,
            complete_on_timeout_with_name: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionVerdict {
    /// The handler wrote a terminal status.
    Terminal(ItemStatus),
    ForcedBothFilled,
    ForcedAfterStall,
    TimedOutWithName,
    TimedOut,
    Cancelled,
}

impl CompletionVerdict {
    /// Final status of the item, `None` when the wait was cancelled.
    pub fn status(&self) -> Option<ItemStatus> {
        match self {
            CompletionVerdict::Terminal(st) => Some(*st),
            CompletionVerdict::ForcedBothFilled
            | CompletionVerdict::ForcedAfterStall
            | CompletionVerdict::TimedOutWithName => Some(ItemStatus::Completed),
            CompletionVerdict::TimedOut => Some(ItemStatus::Failed),
            CompletionVerdict::Cancelled => None,
        }
    }
}

/// Sleeps for `d`; `false` if cancelled first.
async fn pause(d: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(d) => true,
    }
}

/// Polls the store until the item settles, forcing a verdict per `policy`
/// when the dialogs never produce one. Forced verdicts are written here.
pub async fn wait_for_completion(
    store: &dyn WorkItemStore,
    item_id: i64,
    cfg: &OrchestratorConfig,
    cancel: &CancellationToken,
) -> PilotResult<CompletionVerdict> {
    let policy = &cfg.completion;
    let deadline = Instant::now() + cfg.max_wait();
    let mut last_status: Option<ItemStatus> = None;
    let mut unchanged = 0u32;

    while Instant::now() < deadline {
        let item = store.get_by_id(item_id).await?;
        let status = item.as_ref().map(|i| i.status);
        let name_filled = item.as_ref().map(|i| i.name_filled).unwrap_or(false);
        let code_filled = item.as_ref().map(|i| i.code_filled).unwrap_or(false);

        // A verdict already written wins over a pending stop.
        if let Some(st) = status.filter(ItemStatus::is_terminal) {
            tracing::debug!(item_id, status = %st, "terminal status observed");
            pause(cfg.terminal_settle(), cancel).await;
            return Ok(CompletionVerdict::Terminal(st));
        }

        if cancel.is_cancelled() {
            return Ok(CompletionVerdict::Cancelled);
        }

        if policy.force_when_both_filled && name_filled && code_filled {
            tracing::debug!(item_id, "both inputs accepted, waiting for a final dialog");
            if !pause(cfg.both_filled_grace(), cancel).await {
                return Ok(CompletionVerdict::Cancelled);
            }
            let latest = store.get_by_id(item_id).await?.map(|i| i.status);
            if let Some(st) = latest.filter(ItemStatus::is_terminal) {
                pause(cfg.terminal_settle(), cancel).await;
                return Ok(CompletionVerdict::Terminal(st));
            }
            tracing::info!(item_id, "no final dialog, completing optimistically");
            store
                .update_status_with_message(item_id, ItemStatus::Completed, MSG_BOTH_FILLED)
                .await?;
            pause(cfg.terminal_settle(), cancel).await;
            return Ok(CompletionVerdict::ForcedBothFilled);
        }

        if status == last_status {
            unchanged += 1;
            if policy.force_on_stall && unchanged > cfg.stale_poll_limit && name_filled {
                tracing::info!(item_id, polls = unchanged, "status stalled after name, forcing completion");
                store
                    .update_status_with_message(item_id, ItemStatus::Completed, MSG_STALLED)
                    .await?;
                pause(cfg.terminal_settle(), cancel).await;
                return Ok(CompletionVerdict::ForcedAfterStall);
            }
        } else {
            last_status = status;
            unchanged = 0;
        }

        if !pause(cfg.poll_interval(), cancel).await {
            return Ok(CompletionVerdict::Cancelled);
        }
    }

    let item = store.get_by_id(item_id).await?;
    if let Some(st) = item.as_ref().map(|i| i.status).filter(ItemStatus::is_terminal) {
        return Ok(CompletionVerdict::Terminal(st));
    }
    let name_filled = item.map(|i| i.name_filled).unwrap_or(false);
    if name_filled && policy.complete_on_timeout_with_name {
        tracing::warn!(item_id, "timed out after the name step, completing");
        store
            .update_status_with_message(item_id, ItemStatus::Completed, MSG_TIMEOUT_WITH_NAME)
            .await?;
        Ok(CompletionVerdict::TimedOutWithName)
    } else {
        tracing::warn!(item_id, "timed out without progress");
        store
            .update_status_with_message(item_id, ItemStatus::Failed, MSG_TIMEOUT)
            .await?;
        Ok(CompletionVerdict::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::{NewWorkItem, ProgressFlag};
    use crate::store::MemoryStore;

    fn fast() -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval_ms: 5,
            max_wait_ms: 400,
            both_filled_grace_ms: 20,
            stale_poll_limit: 3,
            terminal_settle_ms: 1,
            ..OrchestratorConfig::default()
        }
    }

    async fn seeded(status: ItemStatus) -> (MemoryStore, i64) {
        let store = MemoryStore::new();
        let id = store
            .insert(NewWorkItem::new("0611111111", "1234", "Jane", "AB1"))
            .await
            .unwrap();
        store.update_status(id, status).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn terminal_status_ends_the_wait() {
        let (store, id) = seeded(ItemStatus::AlreadyRegistered).await;
        let v = wait_for_completion(&store, id, &fast(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(v, CompletionVerdict::Terminal(ItemStatus::AlreadyRegistered));
    }

    #[tokio::test]
    async fn both_flags_force_completion_after_grace() {
        let (store, id) = seeded(ItemStatus::CneFilled).await;
        store.update_field_filled(id, ProgressFlag::NameFilled, true).await.unwrap();
        store.update_field_filled(id, ProgressFlag::CodeFilled, true).await.unwrap();
        let v = wait_for_completion(&store, id, &fast(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(v, CompletionVerdict::ForcedBothFilled);
        let item = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.message.as_deref(), Some(MSG_BOTH_FILLED));
    }

    #[tokio::test]
    async fn stalled_after_name_is_forced() {
        let (store, id) = seeded(ItemStatus::NameFilled).await;
        store.update_field_filled(id, ProgressFlag::NameFilled, true).await.unwrap();
        let v = wait_for_completion(&store, id, &fast(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(v, CompletionVerdict::ForcedAfterStall);
    }

    #[tokio::test]
    async fn timeout_without_progress_fails() {
        let (store, id) = seeded(ItemStatus::UssdSent).await;
        let cfg = OrchestratorConfig {
            max_wait_ms: 40,
            ..fast()
        };
        let v = wait_for_completion(&store, id, &cfg, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(v, CompletionVerdict::TimedOut);
        let item = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.message.as_deref(), Some(MSG_TIMEOUT));
    }

    #[tokio::test]
    async fn strict_policy_never_forces() {
        let (store, id) = seeded(ItemStatus::CneFilled).await;
        store.update_field_filled(id, ProgressFlag::NameFilled, true).await.unwrap();
        store.update_field_filled(id, ProgressFlag::CodeFilled, true).await.unwrap();
        let cfg = OrchestratorConfig {
            max_wait_ms: 60,
            completion: CompletionPolicy {
                force_when_both_filled: false,
                force_on_stall: false,
                complete_on_timeout_with_name: false,
            },
            ..fast()
        };
        let v = wait_for_completion(&store, id, &cfg, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(v, CompletionVerdict::TimedOut);
    }

    #[tokio::test]
    async fn terminal_status_beats_a_pending_stop() {
        let (store, id) = seeded(ItemStatus::Completed).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let v = wait_for_completion(&store, id, &fast(), &cancel).await.unwrap();
        assert_eq!(v, CompletionVerdict::Terminal(ItemStatus::Completed));
    }

    #[tokio::test]
    async fn cancellation_is_observed() {
        let (store, id) = seeded(ItemStatus::UssdSent).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let v = wait_for_completion(&store, id, &fast(), &cancel).await.unwrap();
        assert_eq!(v, CompletionVerdict::Cancelled);
        assert_eq!(v.status(), None);
    }
}
