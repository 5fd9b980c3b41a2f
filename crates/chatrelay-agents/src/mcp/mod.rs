mod bridge;
#[cfg(feature = "mcp")]
mod http;
mod tool_bridge;
mod transport;

pub use bridge::{RemoteCapabilityBridge, RemoteSession, SessionState};
#[cfg(feature = "mcp")]
pub use http::McpHttpTransport;
pub use tool_bridge::RemoteTool;
pub use transport::{
    CapabilityConnection, CapabilityTransport, RemoteCallResult, RemoteCredentials,
    RemoteToolInfo,
};
