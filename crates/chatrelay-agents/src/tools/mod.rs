mod registry;
mod thread_title;
mod weather;
mod web_search;

use async_trait::async_trait;
use chatrelay_common::Result;
use chatrelay_store::ThreadHandle;
use serde::de::DeserializeOwned;

pub use registry::{ModeRule, ToolInvocation, ToolPolicy, ToolRegistry, ToolSet};
pub use thread_title::SetThreadTitle;
pub use weather::GetWeather;
pub use web_search::WebSearch;

/// Where a tool's handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOrigin {
    Local,
    Remote,
}

/// Per-request context handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub thread: ThreadHandle,
    pub user_id: Option<String>,
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::success(value.to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// A capability the model may call, described by a JSON Schema.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> serde_json::Value;

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Local
    }

    /// Only offered while the thread is still in its first turn.
    fn first_turn_only(&self) -> bool {
        false
    }

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput>;
}

/// Deserialize tool arguments into a typed struct, mapping failures to a tool error.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, args: serde_json::Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| {
        chatrelay_common::Error::Tool(format!("invalid arguments for {tool}: {e}"))
    })
}
