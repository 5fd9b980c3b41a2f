pub mod error;
pub mod message;
pub mod types;

pub use error::{Error, Result};
pub use message::{CompletionMessage, Message, MessageContent, Role, ToolCall};
pub use types::{ConversationMode, ThreadId};
