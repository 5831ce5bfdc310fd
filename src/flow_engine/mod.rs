pub mod classifier;
pub mod event_bus;
pub mod handler;
pub mod history;
pub mod machine;
pub mod scheduler;
pub mod state;

pub use classifier::{Category, TextClassifier};
pub use event_bus::{EventBus, FlowEvent, HandlerInput, TreeNotifier};
pub use handler::FlowHandler;
pub use machine::FlowMachine;
pub use state::{FlowState, FlowStep};
