use async_trait::async_trait;
use chatrelay_common::{CompletionMessage, Result};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// A streaming, tool-calling completion service.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider identifier (e.g. "openai").
    fn provider_id(&self) -> &str;

    /// Submit a request in streaming mode and return its event stream.
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream>;
}

pub type CompletionStream = BoxStream<'static, Result<StreamEvent>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<CompletionMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// Function-calling declaration. `input_schema` is JSON Schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    TextDelta(String),
    /// Partial tool call. `id` and `name` usually arrive only on the first delta
    /// for an index; `arguments` is a fragment of the JSON argument string.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Finish {
        reason: Option<String>,
    },
    Usage(Usage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
