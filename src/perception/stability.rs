/// Debounce bookkeeping for a dialog that keeps re-announcing itself.
///
/// The host fires a content-changed notification for every redraw, so the same
/// dialog text arrives many times. A text is reprocessed at most
/// `max_retries` times; after that it is ignored until the text changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextDebounce {
    pub last_observed_text: String,
    pub retry_count: u32,
}

impl TextDebounce {
    /// Returns `false` when `text` is unchanged and its retry budget is spent.
    /// A new text restarts the budget.
    pub fn admit(&mut self, text: &str, max_retries: u32) -> bool {
        if text == self.last_observed_text {
            return self.retry_count < max_retries;
        }
        self.last_observed_text = text.to_string();
        self.retry_count = 0;
        true
    }

    /// Counts one more reprocessing of the current text.
    pub fn record_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.last_observed_text.clear();
        self.retry_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_is_dropped_once_budget_is_spent() {
        let mut d = TextDebounce::default();
        assert!(d.admit("enter name", 2));
        d.record_retry();
        assert!(d.admit("enter name", 2));
        d.record_retry();
        assert!(!d.admit("enter name", 2));
        assert!(!d.admit("enter name", 2));
    }

    #[test]
    fn new_text_restarts_budget() {
        let mut d = TextDebounce::default();
        d.admit("a", 1);
        d.record_retry();
        assert!(!d.admit("a", 1));
        assert!(d.admit("b", 1));
        assert_eq!(d.retry_count, 0);
    }
}
