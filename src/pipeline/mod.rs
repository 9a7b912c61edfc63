//! Turn pipeline: bounded conversation state, lazy model resources, and the
//! mode-gated orchestrator that runs one turn at a time.

pub mod history;
pub mod orchestrator;
pub mod resources;

pub use history::ConversationHistory;
pub use orchestrator::{CancelToken, Pipeline, TurnEvent, TurnInput, TurnOutcome};
pub use resources::ResourceManager;
