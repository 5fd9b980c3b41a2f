use async_trait::async_trait;
use chatrelay_common::Result;
use chatrelay_security::BearerToken;

/// Cached info about a tool discovered from the remote capability server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Outcome of a remote call. Application errors come back with `is_error`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCallResult {
    pub content: String,
    pub is_error: bool,
}

/// Credential context a session is opened with. Each distinct value gets its
/// own session; a live session's headers are never changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RemoteCredentials {
    pub bearer: Option<BearerToken>,
    pub data_source: Option<String>,
}

impl RemoteCredentials {
    pub fn new(bearer: Option<BearerToken>, data_source: Option<String>) -> Self {
        Self {
            bearer,
            data_source: data_source.filter(|s| !s.trim().is_empty()),
        }
    }
}

/// Opens connections to a remote capability server.
#[async_trait]
pub trait CapabilityTransport: Send + Sync {
    /// Open a connection and complete the protocol handshake.
    async fn open(&self, credentials: &RemoteCredentials) -> Result<Box<dyn CapabilityConnection>>;
}

/// One open connection. Calls may run concurrently.
#[async_trait]
pub trait CapabilityConnection: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>>;

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<RemoteCallResult>;

    /// Close the transport. Safe to call more than once.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}
