use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    InProgress,
    UssdSent,
    NameFilled,
    CneFilled,
    Completed,
    AlreadyRegistered,
    Failed,
    Cancelled,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 9] = [
        ItemStatus::Pending,
        ItemStatus::InProgress,
        ItemStatus::UssdSent,
        ItemStatus::NameFilled,
        ItemStatus::CneFilled,
        ItemStatus::Completed,
        ItemStatus::AlreadyRegistered,
        ItemStatus::Failed,
        ItemStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "PENDING",
            ItemStatus::InProgress => "IN_PROGRESS",
            ItemStatus::UssdSent => "USSD_SENT",
            ItemStatus::NameFilled => "NAME_FILLED",
            ItemStatus::CneFilled => "CNE_FILLED",
            ItemStatus::Completed => "COMPLETED",
            ItemStatus::AlreadyRegistered => "ALREADY_REGISTERED",
            ItemStatus::Failed => "FAILED",
            ItemStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed
                | ItemStatus::AlreadyRegistered
                | ItemStatus::Failed
                | ItemStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| PilotError::Store(format!("unknown status '{s}'")))
    }
}

/// Boolean progress markers of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressFlag {
    NameFilled,
    CodeFilled,
    FlowInitiated,
    Completed,
}

impl ProgressFlag {
    pub fn column(&self) -> &'static str {
        match self {
            ProgressFlag::NameFilled => "name_filled",
            ProgressFlag::CodeFilled => "code_filled",
            ProgressFlag::FlowInitiated => "flow_initiated",
            ProgressFlag::Completed => "completed",
        }
    }
}

/// One registration to drive through the dialog flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub phone: String,
    /// Short numeric secret appended to the dial code.
    pub secret: String,
    pub full_name: String,
    pub id_code: String,
    pub status: ItemStatus,
    pub message: Option<String>,
    pub name_filled: bool,
    pub code_filled: bool,
    pub flow_initiated: bool,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn flag(&self, flag: ProgressFlag) -> bool {
        match flag {
            ProgressFlag::NameFilled => self.name_filled,
            ProgressFlag::CodeFilled => self.code_filled,
            ProgressFlag::FlowInitiated => self.flow_initiated,
            ProgressFlag::Completed => self.completed,
        }
    }

    pub fn set_flag(&mut self, flag: ProgressFlag, value: bool) {
        match flag {
            ProgressFlag::NameFilled => self.name_filled = value,
            ProgressFlag::CodeFilled => self.code_filled = value,
            ProgressFlag::FlowInitiated => self.flow_initiated = value,
            ProgressFlag::Completed => self.completed = value,
        }
    }
}

/// Input for a new work item, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub phone: String,
    pub secret: String,
    pub full_name: String,
    pub id_code: String,
}

type Pattern = Result<Regex, regex::Error>;

/// Compiled once; a pattern that fails to compile surfaces as a validation
/// error naming it.
fn pattern(cell: &'static OnceLock<Pattern>, src: &str) -> PilotResult<&'static Regex> {
    cell.get_or_init(|| Regex::new(src))
        .as_ref()
        .map_err(|e| PilotError::Validation(format!("bad pattern {src}: {e}")))
}

const PHONE_PATTERN: &str = r"^0[67]\d{8}$";
const SECRET_PATTERN: &str = r"^\d{4}$";

fn phone_pattern() -> PilotResult<&'static Regex> {
    static RE: OnceLock<Pattern> = OnceLock::new();
    pattern(&RE, PHONE_PATTERN)
}

fn secret_pattern() -> PilotResult<&'static Regex> {
    static RE: OnceLock<Pattern> = OnceLock::new();
    pattern(&RE, SECRET_PATTERN)
}

impl NewWorkItem {
    pub fn new(
        phone: impl Into<String>,
        secret: impl Into<String>,
        full_name: impl Into<String>,
        id_code: impl Into<String>,
    ) -> Self {
        Self {
            phone: phone.into().trim().to_string(),
            secret: secret.into().trim().to_string(),
            full_name: full_name.into().trim().to_string(),
            id_code: id_code.into().trim().to_string(),
        }
    }

    /// Mobile number `06xxxxxxxx`/`07xxxxxxxx`, four-digit secret, non-blank
    /// name and identity code.
    pub fn validate(&self) -> PilotResult<()> {
        if !phone_pattern()?.is_match(&self.phone) {
            return Err(PilotError::Validation(format!(
                "invalid phone number '{}'",
                self.phone
            )));
        }
        if !secret_pattern()?.is_match(&self.secret) {
            return Err(PilotError::Validation(format!(
                "secret for {} must be exactly 4 digits",
                self.phone
            )));
        }
        if self.full_name.trim().is_empty() {
            return Err(PilotError::Validation(format!(
                "missing full name for {}",
                self.phone
            )));
        }
        if self.id_code.trim().is_empty() {
            return Err(PilotError::Validation(format!(
                "missing identity code for {}",
                self.phone
            )));
        }
        Ok(())
    }

    pub fn into_item(self, id: i64, created_at: DateTime<Utc>) -> WorkItem {
        WorkItem {
            id,
            phone: self.phone,
            secret: self.secret,
            full_name: self.full_name,
            id_code: self.id_code,
            status: ItemStatus::Pending,
            message: None,
            name_filled: false,
            code_filled: false,
            flow_initiated: false,
            completed: false,
            created_at,
        }
    }
}

/// Outcome counters of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    /// COMPLETED
    pub passed: usize,
    /// ALREADY_REGISTERED
    pub skipped: usize,
    /// FAILED
    pub failed: usize,
    pub pending: usize,
    /// Message of the latest item that left PENDING and carries one.
    pub last_response: Option<String>,
}
