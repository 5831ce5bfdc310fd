use tokio::sync::watch;

/// What the reactive side should type into the dialogs right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub item_id: i64,
    pub name: String,
    pub code: String,
}

/// Writer half of the single-slot expectation channel; owned by the
/// orchestrator.
pub struct ExpectationPublisher {
    tx: watch::Sender<Option<Expectation>>,
}

/// Reader half handed to the handler.
#[derive(Clone)]
pub struct ExpectationReader {
    rx: watch::Receiver<Option<Expectation>>,
}

pub fn channel() -> (ExpectationPublisher, ExpectationReader) {
    let (tx, rx) = watch::channel(None);
    (ExpectationPublisher { tx }, ExpectationReader { rx })
}

impl ExpectationPublisher {
    pub fn publish(&self, expectation: Expectation) {
        tracing::debug!(item_id = expectation.item_id, "expectation published");
        self.tx.send_replace(Some(expectation));
    }

    pub fn clear(&self) {
        if self.tx.send_replace(None).is_some() {
            tracing::debug!("expectation cleared");
        }
    }

    pub fn current(&self) -> Option<Expectation> {
        self.tx.borrow().clone()
    }

    pub fn reader(&self) -> ExpectationReader {
        ExpectationReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl ExpectationReader {
    /// Snapshot of the slot; never blocks the writer for long.
    pub fn current(&self) -> Option<Expectation> {
        self.rx.borrow().clone()
    }
}
