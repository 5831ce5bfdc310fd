use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::perception::types::{NodePath, UiTree};

/// Node-level action understood by the host accessibility layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    Focus,
    Click,
    SetText(String),
    SetSelection { start: usize, end: usize },
    Paste,
}

/// Host seam: reads the active window and acts on it.
///
/// Implementations talk to the platform accessibility service. Action results
/// are the host's own report and may under-report success; the executor's
/// fallback policy decides what to make of a run of `false`s.
#[async_trait]
pub trait UiDriver: Send + Sync {
    /// Tree of the window currently in front, if any.
    async fn active_tree(&self) -> PilotResult<Option<UiTree>>;

    async fn perform(&self, target: &NodePath, action: NodeAction) -> PilotResult<bool>;

    async fn set_clipboard(&self, text: &str) -> PilotResult<bool>;

    /// Synthetic tap at physical screen coordinates.
    async fn tap(&self, x: i32, y: i32) -> PilotResult<bool>;
}
