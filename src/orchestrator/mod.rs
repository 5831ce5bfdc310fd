pub mod completion;
pub mod expectation;
pub mod initiator;
pub mod lock;
pub mod queue;

pub use completion::{CompletionPolicy, CompletionVerdict};
pub use expectation::{Expectation, ExpectationPublisher, ExpectationReader};
pub use initiator::{CommandInitiator, FlowInitiator, UnconfiguredInitiator, UssdCode};
pub use lock::ProcessingLock;
pub use queue::{RunSummary, WorkQueueOrchestrator};
