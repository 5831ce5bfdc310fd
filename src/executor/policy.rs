// Optimistic-success policy for field fills.
use serde::{Deserialize, Serialize};

/// What a fill reports when every strategy ran and none confirmed success.
///
/// Some hosts never acknowledge `SetText` even though the text lands, so the
/// deployed default is to assume it worked and let the flow move on. That can
/// produce a false "filled"; `Strict` turns the assumption off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillFallbackPolicy {
    #[default]
    AssumeSuccess,
    Strict,
}

impl FillFallbackPolicy {
    pub fn assumes_success(&self) -> bool {
        matches!(self, FillFallbackPolicy::AssumeSuccess)
    }
}
