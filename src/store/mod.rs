pub mod memory;
pub mod model;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::watch;

use crate::errors::PilotResult;
use model::{BatchStats, ItemStatus, NewWorkItem, ProgressFlag, WorkItem};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Durable home of work items. Every mutation bumps the change revision seen
/// through `subscribe`.
#[async_trait]
pub trait WorkItemStore: Send + Sync {
    async fn insert(&self, item: NewWorkItem) -> PilotResult<i64>;

    async fn insert_all(&self, items: Vec<NewWorkItem>) -> PilotResult<Vec<i64>>;

    /// Overwrites every mutable column of an existing item.
    async fn update(&self, item: &WorkItem) -> PilotResult<()>;

    async fn get_by_id(&self, id: i64) -> PilotResult<Option<WorkItem>>;

    async fn get_by_phone(&self, phone: &str) -> PilotResult<Option<WorkItem>>;

    /// Oldest first.
    async fn get_by_status(&self, status: ItemStatus) -> PilotResult<Vec<WorkItem>>;

    /// Newest first.
    async fn get_all(&self) -> PilotResult<Vec<WorkItem>>;

    /// Lowest id still PENDING.
    async fn get_next_pending(&self) -> PilotResult<Option<WorkItem>>;

    async fn update_status(&self, id: i64, status: ItemStatus) -> PilotResult<()>;

    async fn update_status_with_message(
        &self,
        id: i64,
        status: ItemStatus,
        message: &str,
    ) -> PilotResult<()>;

    async fn update_field_filled(&self, id: i64, flag: ProgressFlag, value: bool)
        -> PilotResult<()>;

    async fn count_by_status(&self, status: ItemStatus) -> PilotResult<usize>;

    async fn count_all(&self) -> PilotResult<usize>;

    async fn delete_all(&self) -> PilotResult<()>;

    /// Change revision; increments on every mutation.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// Items in `status`, re-emitted after every store mutation.
pub fn watch_by_status(
    store: Arc<dyn WorkItemStore>,
    status: ItemStatus,
) -> impl Stream<Item = PilotResult<Vec<WorkItem>>> + Send {
    let rx = store.subscribe();
    futures_util::stream::unfold((store, rx, true), move |(store, mut rx, first)| async move {
        if first {
            let _ = rx.borrow_and_update();
        } else if rx.changed().await.is_err() {
            return None;
        }
        let items = store.get_by_status(status).await;
        Some((items, (store, rx, false)))
    })
}

pub async fn batch_stats(store: &dyn WorkItemStore) -> PilotResult<BatchStats> {
    let all = store.get_all().await?;
    let mut stats = BatchStats {
        total: all.len(),
        ..BatchStats::default()
    };
    for item in &all {
        match item.status {
            ItemStatus::Completed => stats.passed += 1,
            ItemStatus::AlreadyRegistered => stats.skipped += 1,
            ItemStatus::Failed => stats.failed += 1,
            ItemStatus::Pending => stats.pending += 1,
            _ => {}
        }
    }
    stats.last_response = all
        .iter()
        .filter(|i| i.status != ItemStatus::Pending && i.message.is_some())
        .max_by_key(|i| i.id)
        .and_then(|i| i.message.clone());
    Ok(stats)
}
