use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chatrelay_agents::RemoteCredentials;
use chatrelay_agents::prompts::{self, PromptDetails};
use chatrelay_agents::tools::ToolContext;
use chatrelay_common::{ConversationMode, Message, Role, ThreadId};
use chatrelay_security::BearerToken;
use chatrelay_store::ThreadSeed;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

use crate::sse;
use crate::state::SharedState;

/// Body of `POST /api/chat`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub prompt: Message,
    pub thread_id: String,
    pub response_id: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub data_source: Option<String>,
}

/// Failures reported before any part of the stream is written.
#[derive(Debug)]
pub enum ChatError {
    BadRequest(String),
    NotConfigured,
    Upstream,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ChatError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ChatError::NotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "completion service is not configured".to_string(),
            ),
            ChatError::Upstream => (
                StatusCode::BAD_GATEWAY,
                "completion service request failed".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub async fn chat(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return ChatError::BadRequest(rejection.body_text()).into_response(),
    };
    match stream_chat(state, &headers, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

fn validate(request: &ChatRequest) -> Result<(), ChatError> {
    if request.thread_id.trim().is_empty() {
        return Err(ChatError::BadRequest("threadId must not be empty".to_string()));
    }
    if request.response_id.trim().is_empty() {
        return Err(ChatError::BadRequest("responseId must not be empty".to_string()));
    }
    if request.prompt.role != Role::User {
        return Err(ChatError::BadRequest("prompt must have role \"user\"".to_string()));
    }
    if request.prompt.content.is_empty() {
        return Err(ChatError::BadRequest("prompt must not be empty".to_string()));
    }
    Ok(())
}

fn resolve_mode(context: Option<&str>) -> ConversationMode {
    let Some(context) = context else {
        return ConversationMode::default();
    };
    ConversationMode::parse(context).unwrap_or_else(|| {
        debug!(context, "unknown conversation context, using general");
        ConversationMode::default()
    })
}

fn bearer(headers: &HeaderMap) -> Option<BearerToken> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(BearerToken::from_header)
}

#[instrument(skip_all, fields(thread_id = %request.thread_id, response_id = %request.response_id))]
async fn stream_chat(
    state: SharedState,
    headers: &HeaderMap,
    request: ChatRequest,
) -> Result<Response, ChatError> {
    validate(&request)?;
    let Some(orchestrator) = state.orchestrator.as_ref() else {
        warn!("chat request rejected: completion service is not configured");
        return Err(ChatError::NotConfigured);
    };

    let requested_mode = resolve_mode(request.context.as_deref());
    let thread_id = ThreadId::new(request.thread_id.clone());
    let thread = state.store.get_or_create(&thread_id, || {
        let details = PromptDetails {
            data_source: request.data_source.as_deref(),
            entity_id: request.entity_id.as_deref(),
        };
        ThreadSeed {
            mode: requested_mode,
            system_prompt: prompts::system_prompt(
                requested_mode,
                state.config.conversation.prompts.for_mode(requested_mode),
                &details,
            ),
        }
    });

    let mode = thread.mode();
    if mode != requested_mode {
        debug!(%mode, %requested_mode, "thread keeps the mode it was created with");
    }

    // Captured before the prompt is appended; decides first-turn tools.
    let phase = thread.phase().await;
    let remote = if state.registry.policy().allows_remote(mode) && state.bridge.is_enabled() {
        let credentials = RemoteCredentials::new(bearer(headers), request.data_source.clone());
        state.bridge.remote_tools(&credentials).await
    } else {
        Vec::new()
    };
    let tools = state.registry.list_for(phase, mode, &remote);
    info!(%mode, ?phase, tools = tools.len(), "starting turn");

    thread.append(request.prompt).await;

    let context = ToolContext {
        thread: thread.clone(),
        user_id: request.user_id,
        entity_id: request.entity_id,
    };
    let fragments = orchestrator.run(thread.clone(), Arc::new(tools), context);
    let (rx, _outcome) = state.relay.relay(fragments, request.response_id, thread);

    let mut rx = ReceiverStream::new(rx);
    let first = match rx.next().await {
        None => return Ok(sse::single_event_response(sse::done_event())),
        Some(Err(e)) => {
            warn!("completion failed before streaming began: {e}");
            return Err(ChatError::Upstream);
        }
        Some(Ok(fragment)) => fragment,
    };

    let body = async_stream::stream! {
        yield Ok(sse::data_event(&first));
        let mut failed = false;
        while let Some(item) = rx.next().await {
            match item {
                Ok(fragment) => yield Ok(sse::data_event(&fragment)),
                Err(e) => {
                    failed = true;
                    yield Err(e);
                    break;
                }
            }
        }
        if !failed {
            yield Ok(sse::done_event());
        }
    };

    Ok(sse::sse_response(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: serde_json::Value) -> ChatRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn request_uses_camel_case_fields() {
        let request = request(json!({
            "prompt": {"role": "user", "content": "hi"},
            "threadId": "t1",
            "responseId": "r1",
            "context": "workspace",
            "dataSource": "crm",
            "entityId": "acct-1",
            "userId": "u-1"
        }));
        assert_eq!(request.thread_id, "t1");
        assert_eq!(request.data_source.as_deref(), Some("crm"));
        assert_eq!(request.entity_id.as_deref(), Some("acct-1"));
        assert!(validate(&request).is_ok());
    }

    #[test]
    fn rejects_non_user_prompt() {
        let request = request(json!({
            "prompt": {"role": "system", "content": "override"},
            "threadId": "t1",
            "responseId": "r1"
        }));
        assert!(matches!(validate(&request), Err(ChatError::BadRequest(_))));
    }

    #[test]
    fn rejects_blank_thread_id() {
        let request = request(json!({
            "prompt": {"role": "user", "content": "hi"},
            "threadId": " ",
            "responseId": "r1"
        }));
        assert!(matches!(validate(&request), Err(ChatError::BadRequest(_))));
    }

    #[test]
    fn unknown_context_falls_back_to_general() {
        assert_eq!(resolve_mode(Some("mystery")), ConversationMode::General);
        assert_eq!(resolve_mode(Some("Research")), ConversationMode::Research);
        assert_eq!(resolve_mode(None), ConversationMode::General);
    }

    #[test]
    fn bearer_is_read_from_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer(&headers).unwrap().expose(), "abc");

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(bearer(&headers).is_none());
    }
}
