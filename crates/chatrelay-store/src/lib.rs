pub mod conversation_store;

pub use conversation_store::{
    ConversationStore, StoreLimits, ThreadHandle, ThreadPhase, ThreadSeed, ThreadSummary,
};
