pub mod coordinator;
pub mod dispatcher;
pub mod input;
pub mod policy;
pub mod text_input;

pub use coordinator::ActionExecutor;
pub use text_input::{FillOutcome, FillStrategy};
