use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{data_dir_or_cwd, JournalConfig};
use crate::errors::PilotResult;
use crate::store::model::ItemStatus;

/// One finished item, as appended to the run journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ts: i64,
    pub item_id: i64,
    pub phone: String,
    pub status: ItemStatus,
    pub message: Option<String>,
    pub elapsed_ms: u64,
}

/// JSON-lines journal of one batch run (`run_<uuid>.jsonl`).
pub struct RunJournal {
    pub session_id: String,
    file_path: Option<PathBuf>,
}

impl RunJournal {
    pub fn new(cfg: &JournalConfig) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let file_path = if cfg.enabled {
            let dir = cfg
                .dir
                .clone()
                .unwrap_or_else(|| data_dir_or_cwd().join("runs"));
            if let Err(e) = std::fs::create_dir_all(&dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "journal dir unavailable, journal off");
                None
            } else {
                Some(dir.join(format!("run_{session_id}.jsonl")))
            }
        } else {
            None
        };
        Self {
            session_id,
            file_path,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn entry(
        item_id: i64,
        phone: &str,
        status: ItemStatus,
        message: Option<String>,
        elapsed_ms: u64,
    ) -> JournalEntry {
        JournalEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            item_id,
            phone: phone.to_string(),
            status,
            message,
            elapsed_ms,
        }
    }

    /// Appends `entry` as one line.
    pub fn record(&self, entry: &JournalEntry) -> PilotResult<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let line = serde_json::to_string(entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")?;
        tracing::debug!(path = %path.display(), item_id = entry.item_id, "journal entry written");
        Ok(())
    }
}
