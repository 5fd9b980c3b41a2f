use std::sync::Arc;
use std::time::Duration;

use chatrelay_agents::mcp::McpHttpTransport;
use chatrelay_agents::tools::{GetWeather, SetThreadTitle, WebSearch};
use chatrelay_agents::{
    CompletionOrchestrator, CompletionProvider, OpenAiProvider, OrchestratorConfig,
    RemoteCapabilityBridge, ToolPolicy, ToolRegistry,
};
use chatrelay_common::{Error, Result};
use chatrelay_config::{AppConfig, RemoteToolsConfig, ToolsConfig};
use chatrelay_store::{ConversationStore, StoreLimits};
use tracing::{info, warn};

use crate::relay::StreamRelay;

/// Everything a request handler needs, shared across connections.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<ConversationStore>,
    pub registry: ToolRegistry,
    /// `None` when no completion credential is configured.
    pub orchestrator: Option<CompletionOrchestrator>,
    pub bridge: Arc<RemoteCapabilityBridge>,
    pub relay: StreamRelay,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: ToolRegistry,
        provider: Option<Arc<dyn CompletionProvider>>,
        bridge: Arc<RemoteCapabilityBridge>,
    ) -> Self {
        let store = Arc::new(ConversationStore::new(StoreLimits {
            max_threads: Some(config.conversation.max_threads),
            idle_ttl: Some(Duration::from_secs(config.conversation.idle_ttl_secs)),
        }));
        let orchestrator =
            provider.map(|p| CompletionOrchestrator::new(p, orchestrator_config(&config)));
        let relay = StreamRelay::new(config.gateway.channel_capacity);

        Self {
            config,
            store,
            registry,
            orchestrator,
            bridge,
            relay,
        }
    }

    /// Wire up the OpenAI-compatible provider, local tools and the MCP bridge
    /// from configuration.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let provider = match &config.completion.api_key {
            Some(key) => {
                info!(
                    base_url = %config.completion.base_url,
                    model = %config.completion.model,
                    "completion provider configured"
                );
                Some(Arc::new(OpenAiProvider::new(
                    key.clone(),
                    Some(config.completion.base_url.clone()),
                )) as Arc<dyn CompletionProvider>)
            }
            None => {
                warn!("no completion API key configured, chat requests will be rejected");
                None
            }
        };

        let bridge = remote_bridge(&config.remote_tools);
        let registry = local_tools(&config.tools)?;
        Ok(Self::new(config, registry, provider, Arc::new(bridge)))
    }
}

pub fn orchestrator_config(config: &AppConfig) -> OrchestratorConfig {
    OrchestratorConfig {
        model: config.completion.model.clone(),
        max_tokens: config.completion.max_tokens,
        temperature: config.completion.temperature,
        max_rounds: config.completion.max_rounds,
        turn_timeout: Duration::from_secs(config.completion.turn_timeout_secs),
    }
}

/// The MCP bridge, or a disabled one when no endpoint is configured.
pub fn remote_bridge(config: &RemoteToolsConfig) -> RemoteCapabilityBridge {
    let Some(url) = config.url.as_deref().filter(|_| config.is_enabled()) else {
        return RemoteCapabilityBridge::disabled();
    };
    info!(%url, "remote capability server configured");
    let transport = McpHttpTransport::new(
        url.trim(),
        config.data_source_header.clone(),
        Duration::from_secs(config.connect_timeout_secs),
    );
    RemoteCapabilityBridge::new(
        Arc::new(transport),
        config.max_sessions,
        Duration::from_secs(config.call_timeout_secs),
    )
}

/// The built-in tools under the default mode policy.
pub fn local_tools(config: &ToolsConfig) -> Result<ToolRegistry> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

    let mut registry = ToolRegistry::new(ToolPolicy::default());
    registry.register(Arc::new(WebSearch::new(
        client.clone(),
        config.search_url.clone(),
        config.search_api_key.clone(),
    )));
    registry.register(Arc::new(GetWeather::new(client, config.weather_url.clone())));
    registry.register(Arc::new(SetThreadTitle));
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_remote_url_disables_the_bridge() {
        let with_url = |url: Option<&str>| RemoteToolsConfig {
            url: url.map(str::to_string),
            ..RemoteToolsConfig::default()
        };

        assert!(!remote_bridge(&with_url(Some("  "))).is_enabled());
        assert!(!remote_bridge(&with_url(Some(""))).is_enabled());
        assert!(!remote_bridge(&with_url(None)).is_enabled());
        assert!(remote_bridge(&with_url(Some("http://127.0.0.1:9/mcp"))).is_enabled());
    }
}
