use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use chatrelay_common::{Error, Message, Result, ToolCall};
use chatrelay_store::ThreadHandle;
use futures::{Stream, StreamExt};
use futures::future::join_all;
use futures::stream::BoxStream;
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, Span, debug, info, info_span};

use crate::providers::{CompletionProvider, CompletionRequest, StreamEvent};
use crate::tools::{ToolContext, ToolInvocation, ToolSet};

/// Text fragments produced by one turn, in order.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Inserted between the text of consecutive rounds.
const ROUND_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// Completion rounds allowed per turn, including the final text round.
    pub max_rounds: usize,
    /// Wall-clock bound on the whole turn.
    pub turn_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: None,
            temperature: None,
            max_rounds: 8,
            turn_timeout: Duration::from_secs(120),
        }
    }
}

/// Drives the ask model, call tools, continue loop for one turn.
pub struct CompletionOrchestrator {
    provider: Arc<dyn CompletionProvider>,
    config: OrchestratorConfig,
}

impl CompletionOrchestrator {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: OrchestratorConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Lazily run one turn against `thread`. Nothing happens until the
    /// returned stream is polled, and dropping it stops further rounds.
    ///
    /// Tool rounds are recorded on the thread as they complete. The final
    /// assistant text is left to the consumer.
    pub fn run(
        &self,
        thread: ThreadHandle,
        tools: Arc<ToolSet>,
        context: ToolContext,
    ) -> FragmentStream {
        let span = info_span!("turn", thread_id = %thread.id(), tools = tools.len());
        Box::pin(turn(
            Arc::clone(&self.provider),
            self.config.clone(),
            thread,
            tools,
            context,
            span,
        ))
    }
}

fn turn(
    provider: Arc<dyn CompletionProvider>,
    config: OrchestratorConfig,
    thread: ThreadHandle,
    tools: Arc<ToolSet>,
    context: ToolContext,
    span: Span,
) -> impl Stream<Item = Result<String>> + Send + 'static {
    try_stream! {
        let deadline = Instant::now() + config.turn_timeout;
        let definitions = tools.definitions();
        let mut finished = false;

        for round in 0..config.max_rounds {
            let request = CompletionRequest {
                model: config.model.clone(),
                messages: thread.snapshot().await,
                tools: definitions.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            };
            debug!(
                parent: &span,
                round,
                messages = request.messages.len(),
                "submitting completion round"
            );

            let submitted = provider.stream(&request).instrument(span.clone());
            let mut events = timeout_at(deadline, submitted)
                .await
                .map_err(|_| turn_timed_out(&config))??;

            let mut pending = PendingCalls::default();
            let mut round_text = false;
            loop {
                let next = timeout_at(deadline, events.next().instrument(span.clone()))
                    .await
                    .map_err(|_| turn_timed_out(&config))?;
                let Some(event) = next else {
                    break;
                };
                match event? {
                    StreamEvent::TextDelta(text) => {
                        if !text.is_empty() {
                            round_text = true;
                            yield text;
                        }
                    }
                    StreamEvent::ToolCallDelta { index, id, name, arguments } => {
                        pending.push(index, id, name, &arguments);
                    }
                    StreamEvent::Finish { reason } => {
                        debug!(
                            parent: &span,
                            round,
                            reason = reason.as_deref().unwrap_or("none"),
                            "round finished"
                        );
                    }
                    StreamEvent::Usage(usage) => {
                        debug!(
                            parent: &span,
                            round,
                            input_tokens = usage.input_tokens,
                            output_tokens = usage.output_tokens,
                            "token usage"
                        );
                    }
                }
            }

            let calls = pending.into_calls();
            if calls.is_empty() {
                finished = true;
                break;
            }
            if round_text {
                yield ROUND_SEPARATOR.to_string();
            }

            info!(parent: &span, round, calls = calls.len(), "dispatching tool calls");
            // Spawned so a running invocation completes and is recorded even
            // if this stream is dropped mid-round.
            let task = tokio::spawn(
                dispatch_round(thread.clone(), Arc::clone(&tools), context.clone(), calls)
                    .instrument(span.clone()),
            );
            timeout_at(deadline, task)
                .await
                .map_err(|_| turn_timed_out(&config))?
                .map_err(|e| Error::Stream(format!("tool dispatch task failed: {e}")))?;
        }

        if !finished {
            Err::<(), _>(Error::Stream(format!(
                "model kept requesting tools after {} rounds",
                config.max_rounds
            )))?;
        }
    }
}

fn turn_timed_out(config: &OrchestratorConfig) -> Error {
    Error::Stream(format!(
        "turn exceeded {}s timeout",
        config.turn_timeout.as_secs()
    ))
}

async fn dispatch_round(
    thread: ThreadHandle,
    tools: Arc<ToolSet>,
    context: ToolContext,
    calls: Vec<ToolCall>,
) {
    thread.append(Message::assistant_tool_calls(calls.clone())).await;
    let invocations = join_all(calls.iter().map(|call| tools.dispatch(&context, call))).await;
    thread
        .append_all(invocations.iter().map(ToolInvocation::to_message))
        .await;
}

#[derive(Default)]
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Tool calls of one round, assembled from streamed deltas by index.
#[derive(Default)]
struct PendingCalls {
    calls: BTreeMap<u32, PendingCall>,
}

impl PendingCalls {
    fn push(&mut self, index: u32, id: Option<String>, name: Option<String>, arguments: &str) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            call.id = Some(id);
        }
        if let Some(name) = name
            && call.name.is_empty()
        {
            call.name = name;
        }
        call.arguments.push_str(arguments);
    }

    /// Finalize in index order. Missing or repeated ids get a generated one,
    /// so ids are unique within the round.
    fn into_calls(self) -> Vec<ToolCall> {
        let mut seen = HashSet::new();
        self.calls
            .into_values()
            .map(|call| {
                let id = match call.id {
                    Some(id) if seen.insert(id.clone()) => id,
                    _ => {
                        let generated = format!("call_{}", uuid::Uuid::new_v4().simple());
                        seen.insert(generated.clone());
                        generated
                    }
                };
                ToolCall {
                    id,
                    name: call.name,
                    arguments: call.arguments,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CompletionStream;
    use crate::tools::{Tool, ToolOutput};
    use async_trait::async_trait;
    use chatrelay_common::{ConversationMode, Role, ThreadId};
    use chatrelay_store::{ConversationStore, ThreadSeed};
    use futures::TryStreamExt;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays one scripted event list per round and records each request.
    struct ScriptedProvider {
        rounds: Mutex<VecDeque<Vec<Result<StreamEvent>>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(rounds: Vec<Vec<Result<StreamEvent>>>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn provider_id(&self) -> &str {
            "scripted"
        }

        async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
            self.requests.lock().unwrap().push(request.clone());
            let events = self
                .rounds
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| vec![Ok(text("(no script)"))]);
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the arguments back"
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
            Ok(ToolOutput::json(&args))
        }
    }

    fn text(s: &str) -> StreamEvent {
        StreamEvent::TextDelta(s.to_string())
    }

    fn tool_delta(index: u32, id: Option<&str>, name: Option<&str>, arguments: &str) -> StreamEvent {
        StreamEvent::ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: arguments.to_string(),
        }
    }

    fn setup() -> (ThreadHandle, Arc<ToolSet>, ToolContext) {
        let store = ConversationStore::default();
        let thread = store.get_or_create(&ThreadId::new("t1"), || ThreadSeed {
            mode: ConversationMode::General,
            system_prompt: "sys".to_string(),
        });
        let mut tools = ToolSet::default();
        tools.insert(Arc::new(Echo));
        let context = ToolContext {
            thread: thread.clone(),
            user_id: None,
            entity_id: None,
        };
        (thread, Arc::new(tools), context)
    }

    fn orchestrator(provider: Arc<ScriptedProvider>, max_rounds: usize) -> CompletionOrchestrator {
        CompletionOrchestrator::new(
            provider,
            OrchestratorConfig {
                max_rounds,
                ..OrchestratorConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn text_only_turn_yields_fragments_in_order() {
        let provider = ScriptedProvider::new(vec![vec![Ok(text("Hel")), Ok(text("lo"))]]);
        let (thread, tools, context) = setup();
        thread.append(Message::user("hi")).await;

        let fragments: Vec<String> = orchestrator(provider.clone(), 4)
            .run(thread.clone(), tools, context)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(fragments, vec!["Hel", "lo"]);
        assert_eq!(provider.requests().len(), 1);
        assert_eq!(provider.requests()[0].tools.len(), 1);
        // The final assistant message is the relay's job.
        assert_eq!(thread.len().await, 2);
    }

    #[tokio::test]
    async fn stream_is_lazy_until_polled() {
        let provider = ScriptedProvider::new(vec![vec![Ok(text("x"))]]);
        let (thread, tools, context) = setup();

        let stream = orchestrator(provider.clone(), 4).run(thread, tools, context);
        assert!(provider.requests().is_empty());
        drop(stream);
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn tool_round_is_recorded_and_resubmitted() {
        let provider = ScriptedProvider::new(vec![
            vec![
                Ok(text("Checking")),
                Ok(tool_delta(0, Some("c1"), Some("echo"), "{\"q\":")),
                Ok(tool_delta(0, None, None, "1}")),
                Ok(StreamEvent::Finish {
                    reason: Some("tool_calls".to_string()),
                }),
            ],
            vec![Ok(text("Done"))],
        ]);
        let (thread, tools, context) = setup();
        thread.append(Message::user("go")).await;

        let fragments: Vec<String> = orchestrator(provider.clone(), 4)
            .run(thread.clone(), tools, context)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(fragments, vec!["Checking", "\n\n", "Done"]);

        let messages = thread.messages().await;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].tool_calls[0].id, "c1");
        assert_eq!(messages[2].tool_calls[0].arguments, "{\"q\":1}");
        assert_eq!(messages[3].role, Role::Tool);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[3].content.as_text(), "{\"q\":1}");

        let second = &provider.requests()[1];
        assert_eq!(second.messages.len(), 4);
        assert_eq!(second.messages[3].role, Role::Tool);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_content_and_round_continues() {
        let provider = ScriptedProvider::new(vec![
            vec![Ok(tool_delta(0, Some("c1"), Some("missing"), "{}"))],
            vec![Ok(text("Sorry"))],
        ]);
        let (thread, tools, context) = setup();

        let fragments: Vec<String> = orchestrator(provider, 4)
            .run(thread.clone(), tools, context)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(fragments, vec!["Sorry"]);
        let messages = thread.messages().await;
        let result: serde_json::Value =
            serde_json::from_str(&messages.last().unwrap().content.as_text()).unwrap();
        assert_eq!(result["tool"], "missing");
        assert_eq!(result["call_id"], "c1");
    }

    #[tokio::test]
    async fn duplicate_and_missing_call_ids_are_replaced() {
        let provider = ScriptedProvider::new(vec![
            vec![
                Ok(tool_delta(0, Some("dup"), Some("echo"), "{}")),
                Ok(tool_delta(1, Some("dup"), Some("echo"), "{}")),
                Ok(tool_delta(2, None, Some("echo"), "{}")),
            ],
            vec![Ok(text("ok"))],
        ]);
        let (thread, tools, context) = setup();

        let _: Vec<String> = orchestrator(provider, 4)
            .run(thread.clone(), tools, context)
            .try_collect()
            .await
            .unwrap();

        let messages = thread.messages().await;
        let ids: HashSet<String> = messages[1].tool_calls.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("dup"));
    }

    #[tokio::test]
    async fn runaway_tool_loop_is_bounded() {
        let round = || vec![Ok(tool_delta(0, Some("c"), Some("echo"), "{}"))];
        let provider = ScriptedProvider::new(vec![round(), round(), round()]);
        let (thread, tools, context) = setup();

        let result: Result<Vec<String>> = orchestrator(provider.clone(), 2)
            .run(thread, tools, context)
            .try_collect()
            .await;

        assert!(matches!(result, Err(Error::Stream(_))));
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn provider_error_surfaces_after_earlier_fragments() {
        let provider = ScriptedProvider::new(vec![vec![
            Ok(text("partial")),
            Err(Error::Provider("connection reset".to_string())),
        ]]);
        let (thread, tools, context) = setup();

        let items: Vec<Result<String>> = orchestrator(provider, 4)
            .run(thread, tools, context)
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        assert!(matches!(items[1], Err(Error::Provider(_))));
    }

    /// Records the span its calls run under.
    struct SpanRecorder {
        seen: Arc<Mutex<Vec<(String, bool)>>>,
    }

    #[async_trait]
    impl Tool for SpanRecorder {
        fn name(&self) -> &str {
            "record_span"
        }

        fn description(&self) -> &str {
            "Record the active span"
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _context: &ToolContext, _args: serde_json::Value) -> Result<ToolOutput> {
            let seen = tracing::Span::current().metadata().map(|meta| {
                (
                    meta.name().to_string(),
                    meta.fields().field("thread_id").is_some(),
                )
            });
            self.seen.lock().unwrap().extend(seen);
            Ok(ToolOutput::success("ok"))
        }
    }

    #[tokio::test]
    async fn tool_dispatch_runs_inside_turn_span() {
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry());
        let provider = ScriptedProvider::new(vec![
            vec![Ok(tool_delta(0, Some("c1"), Some("record_span"), "{}"))],
            vec![Ok(text("done"))],
        ]);
        let (thread, _, context) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut tools = ToolSet::default();
        tools.insert(Arc::new(SpanRecorder {
            seen: Arc::clone(&seen),
        }));

        let fragments: Vec<String> = orchestrator(provider, 4)
            .run(thread, Arc::new(tools), context)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(fragments, vec!["done"]);
        assert_eq!(*seen.lock().unwrap(), vec![("turn".to_string(), true)]);
    }
}
