use std::sync::Arc;

use async_trait::async_trait;
use chatrelay_common::Result;

use super::bridge::{RemoteCapabilityBridge, RemoteSession};
use super::transport::RemoteToolInfo;
use crate::tools::{Tool, ToolContext, ToolOrigin, ToolOutput};

/// A tool discovered on the remote capability server, bound to the session
/// it was discovered on.
pub struct RemoteTool {
    info: RemoteToolInfo,
    description: String,
    bridge: Arc<RemoteCapabilityBridge>,
    session: Arc<RemoteSession>,
}

impl RemoteTool {
    pub fn new(
        info: RemoteToolInfo,
        bridge: Arc<RemoteCapabilityBridge>,
        session: Arc<RemoteSession>,
    ) -> Self {
        let description = info
            .description
            .clone()
            .unwrap_or_else(|| format!("Remote tool {}", info.name));
        Self {
            info,
            description,
            bridge,
            session,
        }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.info.input_schema.clone()
    }

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Remote
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        Ok(self.bridge.invoke(&self.session, &self.info.name, args).await)
    }
}
