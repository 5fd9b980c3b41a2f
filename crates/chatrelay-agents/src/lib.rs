pub mod mcp;
pub mod openai;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod tools;

pub use mcp::{
    CapabilityConnection, CapabilityTransport, RemoteCapabilityBridge, RemoteCredentials,
    RemoteSession, RemoteToolInfo, SessionState,
};
pub use openai::OpenAiProvider;
pub use orchestrator::{CompletionOrchestrator, FragmentStream, OrchestratorConfig};
pub use providers::{
    CompletionProvider, CompletionRequest, CompletionStream, StreamEvent, ToolDefinition, Usage,
};
pub use tools::{
    Tool, ToolContext, ToolInvocation, ToolOrigin, ToolOutput, ToolPolicy, ToolRegistry, ToolSet,
};
