use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chatrelay_common::{ConversationMode, Message, ToolCall};
use chatrelay_store::ThreadPhase;
use futures::FutureExt;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{Tool, ToolContext, ToolOrigin, ToolOutput};
use crate::providers::ToolDefinition;

/// Visibility rule for one conversation mode.
#[derive(Debug, Clone, Default)]
pub struct ModeRule {
    pub local: Vec<String>,
    pub remote: bool,
}

impl ModeRule {
    pub fn new(local: &[&str], remote: bool) -> Self {
        Self {
            local: local.iter().map(|name| name.to_string()).collect(),
            remote,
        }
    }

    fn allows_local(&self, name: &str) -> bool {
        self.local.iter().any(|allowed| allowed == name)
    }
}

/// Table mapping each conversation mode to the tools it may see.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    rules: HashMap<ConversationMode, ModeRule>,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            ConversationMode::General,
            ModeRule::new(&["web_search", "get_weather", "set_thread_title"], false),
        );
        rules.insert(
            ConversationMode::Research,
            ModeRule::new(&["web_search", "set_thread_title"], false),
        );
        rules.insert(
            ConversationMode::Workspace,
            ModeRule::new(&["get_weather", "set_thread_title"], true),
        );
        Self { rules }
    }
}

impl ToolPolicy {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn with_rule(mut self, mode: ConversationMode, rule: ModeRule) -> Self {
        self.rules.insert(mode, rule);
        self
    }

    pub fn rule(&self, mode: ConversationMode) -> Option<&ModeRule> {
        self.rules.get(&mode)
    }

    /// Whether remote tools are offered in `mode`.
    pub fn allows_remote(&self, mode: ConversationMode) -> bool {
        self.rule(mode).is_some_and(|rule| rule.remote)
    }
}

/// Statically declared local tools plus the policy deciding their visibility.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    policy: ToolPolicy,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(ToolPolicy::default())
    }
}

impl ToolRegistry {
    pub fn new(policy: ToolPolicy) -> Self {
        Self {
            tools: Vec::new(),
            policy,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            warn!("replacing previously registered tool: {}", tool.name());
            *existing = tool;
            return;
        }
        info!("registered tool: {}", tool.name());
        self.tools.push(tool);
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn local_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Assemble the tools offered for one turn.
    ///
    /// Pure in its inputs: the same phase, mode and remote catalogue always
    /// yield the same set. First-turn-only tools appear only in `ThreadPhase::New`.
    pub fn list_for(
        &self,
        phase: ThreadPhase,
        mode: ConversationMode,
        remote: &[Arc<dyn Tool>],
    ) -> ToolSet {
        let mut set = ToolSet::default();
        let Some(rule) = self.policy.rule(mode) else {
            return set;
        };

        let visible = |tool: &Arc<dyn Tool>| !tool.first_turn_only() || phase == ThreadPhase::New;

        for tool in self.tools.iter().filter(|t| rule.allows_local(t.name())) {
            if visible(tool) {
                set.insert(Arc::clone(tool));
            }
        }

        if rule.remote {
            for tool in remote.iter().filter(|t| visible(*t)) {
                if !set.insert(Arc::clone(tool)) {
                    warn!(
                        "remote tool '{}' collides with an existing tool name; skipping",
                        tool.name()
                    );
                }
            }
        }

        debug!(mode = %mode, ?phase, tools = ?set.names(), "assembled tool set");
        set
    }
}

/// The merged, name-unique set of tools offered to the model for one turn.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    /// Add a tool. Returns `false` and leaves the set unchanged on a name collision.
    pub fn insert(&mut self, tool: Arc<dyn Tool>) -> bool {
        if self.resolve(tool.name()).is_some() {
            return false;
        }
        self.tools.push(tool);
        true
    }

    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Invoke a tool call inside a failure boundary.
    ///
    /// Unknown names, malformed arguments, handler errors and panics all come
    /// back as an error `ToolInvocation`; this never fails.
    pub async fn dispatch(&self, context: &ToolContext, call: &ToolCall) -> ToolInvocation {
        let output = match self.resolve(&call.name) {
            None => ToolOutput::error(format!("unknown tool: {}", call.name)),
            Some(tool) => match parse_arguments(&call.arguments) {
                Err(e) => ToolOutput::error(format!("malformed arguments: {e}")),
                Ok(args) => {
                    debug!(
                        tool = %call.name,
                        call_id = %call.id,
                        remote = tool.origin() == ToolOrigin::Remote,
                        "dispatching tool call"
                    );
                    match AssertUnwindSafe(tool.execute(context, args))
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(output)) => output,
                        Ok(Err(e)) => ToolOutput::error(e.to_string()),
                        Err(_) => ToolOutput::error(format!("tool '{}' panicked", call.name)),
                    }
                }
            },
        };

        if output.is_error {
            warn!(tool = %call.name, call_id = %call.id, "tool call failed: {}", output.content);
        }

        ToolInvocation {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            output,
        }
    }
}

fn parse_arguments(raw: &str) -> serde_json::Result<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(serde::de::Error::custom("arguments must be a JSON object"))
    }
}

/// One executed tool call and its result.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub output: ToolOutput,
}

impl ToolInvocation {
    /// The `tool` role message reporting this result back to the model.
    pub fn to_message(&self) -> Message {
        let content = if self.output.is_error {
            json!({
                "error": self.output.content,
                "tool": self.name,
                "call_id": self.call_id,
            })
            .to_string()
        } else {
            self.output.content.clone()
        };
        Message::tool_result(self.call_id.clone(), content)
    }
}
