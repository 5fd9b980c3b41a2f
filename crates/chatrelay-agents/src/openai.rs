use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_common::{CompletionMessage, Error, MessageContent, Result, Role};
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::{
    CompletionProvider, CompletionRequest, CompletionStream, StreamEvent, ToolDefinition, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let openai_request = convert_request(request)?;
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "submitting streaming completion"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "OpenAI API error (status {}): {}",
                status.as_u16(),
                error_text
            )));
        }

        Ok(Box::pin(SseParser::new(response.bytes_stream())))
    }
}

fn convert_request(request: &CompletionRequest) -> Result<OpenAiRequest> {
    let messages = request
        .messages
        .iter()
        .map(convert_message)
        .collect::<Result<Vec<_>>>()?;

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(request.tools.iter().map(convert_tool).collect())
    };

    Ok(OpenAiRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        tools,
        stream: true,
        stream_options: Some(OpenAiStreamOptions {
            include_usage: true,
        }),
    })
}

fn convert_tool(tool: &ToolDefinition) -> OpenAiTool {
    OpenAiTool {
        kind: "function".to_string(),
        function: OpenAiFunctionDefinition {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        },
    }
}

fn convert_message(msg: &CompletionMessage) -> Result<OpenAiMessage> {
    match msg.role {
        Role::System => Ok(OpenAiMessage::System {
            content: msg.content.as_text(),
        }),
        Role::User => {
            let content = match &msg.content {
                MessageContent::Text(text) => serde_json::Value::String(text.clone()),
                // Content-part arrays are already in the wire shape.
                MessageContent::Structured(value @ serde_json::Value::Array(_)) => value.clone(),
                MessageContent::Structured(value) => serde_json::Value::String(value.to_string()),
            };
            Ok(OpenAiMessage::User { content })
        }
        Role::Assistant => {
            let text = msg.content.as_text();
            let tool_calls: Vec<OpenAiToolCall> = msg
                .tool_calls
                .iter()
                .map(|call| OpenAiToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: OpenAiFunctionCall {
                        name: call.name.clone(),
                        arguments: if call.arguments.trim().is_empty() {
                            "{}".to_string()
                        } else {
                            call.arguments.clone()
                        },
                    },
                })
                .collect();

            Ok(OpenAiMessage::Assistant {
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(text)
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            })
        }
        Role::Tool => {
            let tool_call_id = msg.tool_call_id.clone().ok_or_else(|| {
                Error::Provider("tool message is missing its tool_call_id".to_string())
            })?;
            Ok(OpenAiMessage::Tool {
                tool_call_id,
                content: msg.content.as_text(),
            })
        }
    }
}

// Request Types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System {
        content: String,
    },
    User {
        content: serde_json::Value,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Stream Parser
struct SseParser {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    queue: VecDeque<Result<StreamEvent>>,
    done: bool,
    /// Set once `[DONE]` or a `finish_reason` arrives.
    completed: bool,
}

impl SseParser {
    fn new(stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: Vec::new(),
            queue: VecDeque::new(),
            done: false,
            completed: false,
        }
    }

    /// Split complete SSE events off the buffer and queue their parsed contents.
    fn drain_events(&mut self) {
        while let Some((pos, len)) = find_event_boundary(&self.buffer) {
            let event_bytes: Vec<u8> = self.buffer.drain(..pos).collect();
            self.buffer.drain(..len);

            let Ok(event) = String::from_utf8(event_bytes) else {
                self.queue.push_back(Err(Error::Provider(
                    "stream event is not valid UTF-8".to_string(),
                )));
                continue;
            };

            for line in event.lines() {
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == "[DONE]" {
                    self.completed = true;
                    self.done = true;
                    continue;
                }
                self.push_chunk(data);
            }
        }
    }

    fn push_chunk(&mut self, data: &str) {
        let chunk = match serde_json::from_str::<OpenAiStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.queue
                    .push_back(Err(Error::Provider(format!("JSON parse error: {e}"))));
                return;
            }
        };

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                self.queue.push_back(Ok(StreamEvent::TextDelta(content)));
            }

            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                self.queue.push_back(Ok(StreamEvent::ToolCallDelta {
                    index: tc.index,
                    id: tc.id,
                    name,
                    arguments,
                }));
            }

            if let Some(reason) = choice.finish_reason {
                self.completed = true;
                self.queue.push_back(Ok(StreamEvent::Finish {
                    reason: Some(reason),
                }));
            }
        }

        if let Some(usage) = chunk.usage {
            self.queue.push_back(Ok(StreamEvent::Usage(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            })));
        }
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

impl Stream for SseParser {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.done {
                return Poll::Ready(None);
            }

            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.drain_events();
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(Error::Provider(format!("stream error: {e}")))));
                }
                Poll::Ready(None) => {
                    // Flush a final event that was not followed by a blank line.
                    if !self.buffer.is_empty() {
                        self.buffer.extend_from_slice(b"\n\n");
                        self.drain_events();
                    }
                    self.done = true;
                    if !self.completed {
                        self.queue.push_back(Err(Error::Provider(
                            "stream ended before completion".to_string(),
                        )));
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// Stream Response Types
#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionCall>,
}

#[derive(Deserialize)]
struct OpenAiStreamFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
