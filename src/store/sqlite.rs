use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::watch;

use crate::errors::{PilotError, PilotResult};
use crate::store::model::{ItemStatus, NewWorkItem, ProgressFlag, WorkItem};
use crate::store::WorkItemStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS work_items (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    phone          TEXT NOT NULL,
    secret         TEXT NOT NULL,
    full_name      TEXT NOT NULL,
    id_code        TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'PENDING',
    message        TEXT,
    name_filled    INTEGER NOT NULL DEFAULT 0,
    code_filled    INTEGER NOT NULL DEFAULT 0,
    flow_initiated INTEGER NOT NULL DEFAULT 0,
    completed      INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(status);
CREATE INDEX IF NOT EXISTS idx_work_items_phone ON work_items(phone);
";

const COLUMNS: &str = "id, phone, secret, full_name, id_code, status, message, \
                       name_filled, code_filled, flow_initiated, completed, created_at";

/// SQLite-backed store. The connection lives behind a mutex and every query
/// runs on the blocking pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    changes: watch::Sender<u64>,
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("sqlite mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<WorkItem> {
    let status: String = row.get(5)?;
    let created_at: String = row.get(11)?;
    Ok(WorkItem {
        id: row.get(0)?,
        phone: row.get(1)?,
        secret: row.get(2)?,
        full_name: row.get(3)?,
        id_code: row.get(4)?,
        status: status.parse().unwrap_or_else(|_| {
            tracing::warn!(status = %status, "unknown status in database, reading as FAILED");
            ItemStatus::Failed
        }),
        message: row.get(6)?,
        name_filled: row.get(7)?,
        code_filled: row.get(8)?,
        flow_initiated: row.get(9)?,
        completed: row.get(10)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn insert_row(conn: &Connection, item: &NewWorkItem, created_at: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO work_items (phone, secret, full_name, id_code, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            item.phone,
            item.secret,
            item.full_name,
            item.id_code,
            ItemStatus::Pending.as_str(),
            created_at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn expect_row(changed: usize, id: i64) -> PilotResult<()> {
    if changed == 0 {
        return Err(PilotError::Store(format!("work item {id} not found")));
    }
    Ok(())
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> PilotResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        tracing::info!(path = %path.display(), "work item database opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> PilotResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> PilotResult<Self> {
        conn.execute_batch(SCHEMA)?;
        let (changes, _) = watch::channel(0);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> PilotResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> PilotResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn);
            f(&guard)
        })
        .await?
    }

    /// Like `call`, then bumps the change revision on success.
    async fn mutate<T, F>(&self, f: F) -> PilotResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> PilotResult<T> + Send + 'static,
    {
        let out = self.call(f).await?;
        self.changes.send_modify(|rev| *rev += 1);
        Ok(out)
    }

    async fn query_items(&self, sql: String, status: Option<ItemStatus>) -> PilotResult<Vec<WorkItem>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = match status {
                Some(st) => stmt
                    .query_map(params![st.as_str()], row_to_item)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
                None => stmt
                    .query_map([], row_to_item)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
            };
            Ok(rows)
        })
        .await
    }
}

#[async_trait]
impl WorkItemStore for SqliteStore {
    async fn insert(&self, item: NewWorkItem) -> PilotResult<i64> {
        self.mutate(move |conn| Ok(insert_row(conn, &item, &Utc::now().to_rfc3339())?))
            .await
    }

    async fn insert_all(&self, items: Vec<NewWorkItem>) -> PilotResult<Vec<i64>> {
        self.mutate(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let now = Utc::now().to_rfc3339();
            let mut ids = Vec::with_capacity(items.len());
            for item in &items {
                ids.push(insert_row(&tx, item, &now)?);
            }
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    async fn update(&self, item: &WorkItem) -> PilotResult<()> {
        let item = item.clone();
        self.mutate(move |conn| {
            let changed = conn.execute(
                "UPDATE work_items SET phone = ?2, secret = ?3, full_name = ?4, id_code = ?5,
                     status = ?6, message = ?7, name_filled = ?8, code_filled = ?9,
                     flow_initiated = ?10, completed = ?11
                 WHERE id = ?1",
                params![
                    item.id,
                    item.phone,
                    item.secret,
                    item.full_name,
                    item.id_code,
                    item.status.as_str(),
                    item.message,
                    item.name_filled,
                    item.code_filled,
                    item.flow_initiated,
                    item.completed
                ],
            )?;
            expect_row(changed, item.id)
        })
        .await
    }

    async fn get_by_id(&self, id: i64) -> PilotResult<Option<WorkItem>> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM work_items WHERE id = ?1"),
                    params![id],
                    row_to_item,
                )
                .optional()?)
        })
        .await
    }

    async fn get_by_phone(&self, phone: &str) -> PilotResult<Option<WorkItem>> {
        let phone = phone.to_string();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM work_items WHERE phone = ?1 ORDER BY id LIMIT 1"
                    ),
                    params![phone],
                    row_to_item,
                )
                .optional()?)
        })
        .await
    }

    async fn get_by_status(&self, status: ItemStatus) -> PilotResult<Vec<WorkItem>> {
        self.query_items(
            format!("SELECT {COLUMNS} FROM work_items WHERE status = ?1 ORDER BY created_at ASC, id ASC"),
            Some(status),
        )
        .await
    }

    async fn get_all(&self) -> PilotResult<Vec<WorkItem>> {
        self.query_items(
            format!("SELECT {COLUMNS} FROM work_items ORDER BY created_at DESC, id DESC"),
            None,
        )
        .await
    }

    async fn get_next_pending(&self) -> PilotResult<Option<WorkItem>> {
        self.call(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM work_items WHERE status = ?1 ORDER BY id ASC LIMIT 1"
                    ),
                    params![ItemStatus::Pending.as_str()],
                    row_to_item,
                )
                .optional()?)
        })
        .await
    }

    async fn update_status(&self, id: i64, status: ItemStatus) -> PilotResult<()> {
        self.mutate(move |conn| {
            let changed = conn.execute(
                "UPDATE work_items SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )?;
            expect_row(changed, id)
        })
        .await
    }

    async fn update_status_with_message(
        &self,
        id: i64,
        status: ItemStatus,
        message: &str,
    ) -> PilotResult<()> {
        let message = message.to_string();
        self.mutate(move |conn| {
            let changed = conn.execute(
                "UPDATE work_items SET status = ?2, message = ?3 WHERE id = ?1",
                params![id, status.as_str(), message],
            )?;
            expect_row(changed, id)
        })
        .await
    }

    async fn update_field_filled(
        &self,
        id: i64,
        flag: ProgressFlag,
        value: bool,
    ) -> PilotResult<()> {
        self.mutate(move |conn| {
            // Column names come from a closed enum, never from input.
            let sql = format!("UPDATE work_items SET {} = ?2 WHERE id = ?1", flag.column());
            let changed = conn.execute(&sql, params![id, value])?;
            expect_row(changed, id)
        })
        .await
    }

    async fn count_by_status(&self, status: ItemStatus) -> PilotResult<usize> {
        self.call(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM work_items WHERE status = ?1",
                params![status.as_str()],
                |r| r.get(0),
            )?;
            Ok(n.max(0) as usize)
        })
        .await
    }

    async fn count_all(&self) -> PilotResult<usize> {
        self.call(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM work_items", [], |r| r.get(0))?;
            Ok(n.max(0) as usize)
        })
        .await
    }

    async fn delete_all(&self) -> PilotResult<()> {
        self.mutate(|conn| {
            let n = conn.execute("DELETE FROM work_items", [])?;
            tracing::info!(deleted = n, "work items cleared");
            Ok(())
        })
        .await
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}
