use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use crate::errors::{PilotError, PilotResult};
use crate::store::model::{ItemStatus, NewWorkItem, ProgressFlag, WorkItem};
use crate::store::WorkItemStore;

#[derive(Default)]
struct Inner {
    next_id: i64,
    items: BTreeMap<i64, WorkItem>,
}

/// Process-local store; used in tests and for dry runs.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    changes: watch::Sender<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                items: BTreeMap::new(),
            }),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("memory store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn bump(&self) {
        self.changes.send_modify(|rev| *rev += 1);
    }

    fn modify<F>(&self, id: i64, f: F) -> PilotResult<()>
    where
        F: FnOnce(&mut WorkItem),
    {
        {
            let mut inner = self.lock();
            let item = inner
                .items
                .get_mut(&id)
                .ok_or_else(|| PilotError::Store(format!("work item {id} not found")))?;
            f(item);
        }
        self.bump();
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkItemStore for MemoryStore {
    async fn insert(&self, item: NewWorkItem) -> PilotResult<i64> {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.items.insert(id, item.into_item(id, Utc::now()));
            id
        };
        self.bump();
        Ok(id)
    }

    async fn insert_all(&self, items: Vec<NewWorkItem>) -> PilotResult<Vec<i64>> {
        let ids = {
            let mut inner = self.lock();
            let now = Utc::now();
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.items.insert(id, item.into_item(id, now));
                ids.push(id);
            }
            ids
        };
        self.bump();
        Ok(ids)
    }

    async fn update(&self, item: &WorkItem) -> PilotResult<()> {
        let replacement = item.clone();
        self.modify(item.id, move |slot| *slot = replacement)
    }

    async fn get_by_id(&self, id: i64) -> PilotResult<Option<WorkItem>> {
        Ok(self.lock().items.get(&id).cloned())
    }

    async fn get_by_phone(&self, phone: &str) -> PilotResult<Option<WorkItem>> {
        Ok(self
            .lock()
            .items
            .values()
            .find(|i| i.phone == phone)
            .cloned())
    }

    async fn get_by_status(&self, status: ItemStatus) -> PilotResult<Vec<WorkItem>> {
        let mut items: Vec<WorkItem> = self
            .lock()
            .items
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items)
    }

    async fn get_all(&self) -> PilotResult<Vec<WorkItem>> {
        let mut items: Vec<WorkItem> = self.lock().items.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(items)
    }

    async fn get_next_pending(&self) -> PilotResult<Option<WorkItem>> {
        Ok(self
            .lock()
            .items
            .values()
            .find(|i| i.status == ItemStatus::Pending)
            .cloned())
    }

    async fn update_status(&self, id: i64, status: ItemStatus) -> PilotResult<()> {
        self.modify(id, |item| item.status = status)
    }

    async fn update_status_with_message(
        &self,
        id: i64,
        status: ItemStatus,
        message: &str,
    ) -> PilotResult<()> {
        let message = message.to_string();
        self.modify(id, move |item| {
            item.status = status;
            item.message = Some(message);
        })
    }

    async fn update_field_filled(
        &self,
        id: i64,
        flag: ProgressFlag,
        value: bool,
    ) -> PilotResult<()> {
        self.modify(id, |item| item.set_flag(flag, value))
    }

    async fn count_by_status(&self, status: ItemStatus) -> PilotResult<usize> {
        Ok(self
            .lock()
            .items
            .values()
            .filter(|i| i.status == status)
            .count())
    }

    async fn count_all(&self) -> PilotResult<usize> {
        Ok(self.lock().items.len())
    }

    async fn delete_all(&self) -> PilotResult<()> {
        self.lock().items.clear();
        self.bump();
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}
