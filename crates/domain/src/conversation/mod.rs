//! Per-user conversation state machine.

mod phase;
mod state;

pub use phase::Phase;
pub use state::ConversationState;
