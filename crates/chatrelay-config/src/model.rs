use chatrelay_common::ConversationMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub completion: CompletionConfig,
    pub remote_tools: RemoteToolsConfig,
    pub conversation: ConversationConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
    /// Fragments buffered between the orchestrator and a slow client.
    pub channel_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// Upper bound on model → tool → model rounds in one turn.
    pub max_rounds: usize,
    pub turn_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: None,
            temperature: None,
            max_rounds: 8,
            turn_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteToolsConfig {
    /// Streamable HTTP endpoint of the capability server. `None` disables remote tools.
    pub url: Option<String>,
    pub data_source_header: String,
    pub connect_timeout_secs: u64,
    pub call_timeout_secs: u64,
    pub max_sessions: usize,
}

impl Default for RemoteToolsConfig {
    fn default() -> Self {
        Self {
            url: None,
            data_source_header: "X-Data-Source".to_string(),
            connect_timeout_secs: 15,
            call_timeout_secs: 60,
            max_sessions: 32,
        }
    }
}

impl RemoteToolsConfig {
    pub fn is_enabled(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub max_threads: usize,
    pub idle_ttl_secs: u64,
    pub prompts: PromptConfig,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_threads: 10_000,
            idle_ttl_secs: 86_400,
            prompts: PromptConfig::default(),
        }
    }
}

/// Per-mode system prompt overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub general: Option<String>,
    pub research: Option<String>,
    pub workspace: Option<String>,
}

impl PromptConfig {
    pub fn for_mode(&self, mode: ConversationMode) -> Option<&str> {
        match mode {
            ConversationMode::General => self.general.as_deref(),
            ConversationMode::Research => self.research.as_deref(),
            ConversationMode::Workspace => self.workspace.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub search_url: String,
    pub search_api_key: Option<String>,
    pub weather_url: String,
    pub http_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            search_url: "https://api.tavily.com/search".to_string(),
            search_api_key: None,
            weather_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            http_timeout_secs: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_remote_tools() {
        let config = AppConfig::default();
        assert!(!config.remote_tools.is_enabled());
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.completion.max_rounds, 8);
    }

    #[test]
    fn blank_remote_url_counts_as_disabled() {
        let remote = RemoteToolsConfig {
            url: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(!remote.is_enabled());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config: AppConfig = serde_yaml::from_str(
            "completion:\n  model: gpt-4.1\nconversation:\n  prompts:\n    research: Dig deep.\n",
        )
        .unwrap();
        assert_eq!(config.completion.model, "gpt-4.1");
        assert_eq!(config.completion.base_url, "https://api.openai.com/v1");
        assert_eq!(
            config.conversation.prompts.for_mode(ConversationMode::Research),
            Some("Dig deep.")
        );
        assert_eq!(config.conversation.prompts.for_mode(ConversationMode::General), None);
    }
}
