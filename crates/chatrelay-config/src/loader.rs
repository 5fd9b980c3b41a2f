use std::path::{Path, PathBuf};

use chatrelay_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::model::AppConfig;

/// Loads `AppConfig` from an optional file, `.env`, and process environment.
pub struct ConfigLoader {
    path: Option<PathBuf>,
    load_dotenv: bool,
}

impl ConfigLoader {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            load_dotenv: true,
        }
    }

    /// Skip reading `.env`, for tests that control the environment themselves.
    pub fn without_dotenv(mut self) -> Self {
        self.load_dotenv = false;
        self
    }

    pub fn load(&self) -> Result<AppConfig> {
        if self.load_dotenv {
            match dotenvy::dotenv() {
                Ok(path) => debug!("loaded environment from {}", path.display()),
                Err(e) if e.not_found() => {}
                Err(e) => warn!("failed to read .env file: {e}"),
            }
        }

        let mut config = match &self.path {
            Some(path) => Self::load_file(path)?,
            None => AppConfig::default(),
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());

        for warning in validate(&config) {
            warn!("{warning}");
        }

        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<AppConfig> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let config = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&raw)
                .map_err(|e| Error::Config(format!("invalid YAML in {}: {e}", path.display())))?,
            "toml" => toml::from_str(&raw)
                .map_err(|e| Error::Config(format!("invalid TOML in {}: {e}", path.display())))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config format '{other}' for {} (expected .yaml, .yml or .toml)",
                    path.display()
                )));
            }
        };

        info!("loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Apply well-known environment variables on top of file configuration.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = non_empty("OPENAI_API_KEY") {
        config.completion.api_key = Some(key);
    }
    if let Some(base_url) = non_empty("OPENAI_BASE_URL") {
        config.completion.base_url = base_url;
    }
    if let Some(model) = non_empty("OPENAI_MODEL") {
        config.completion.model = model;
    }
    if let Some(host) = non_empty("CHATRELAY_HOST") {
        config.gateway.host = host;
    }
    if let Some(port) = non_empty("CHATRELAY_PORT") {
        match port.parse() {
            Ok(port) => config.gateway.port = port,
            Err(_) => warn!("ignoring invalid CHATRELAY_PORT value '{port}'"),
        }
    }
    if let Some(url) = non_empty("MCP_SERVER_URL") {
        config.remote_tools.url = Some(url);
    }
    if let Some(key) = non_empty("SEARCH_API_KEY") {
        config.tools.search_api_key = Some(key);
    }
}

/// Non-fatal configuration problems, reported as warnings at startup.
pub fn validate(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.completion.api_key.is_none() {
        warnings.push(
            "no completion API key configured; chat requests will fail until OPENAI_API_KEY is set"
                .to_string(),
        );
    }
    if url::Url::parse(&config.completion.base_url).is_err() {
        warnings.push(format!(
            "completion base_url '{}' is not a valid URL",
            config.completion.base_url
        ));
    }
    match config.remote_tools.url.as_deref() {
        Some(remote) if config.remote_tools.is_enabled() => {
            if url::Url::parse(remote).is_err() {
                warnings.push(format!("remote_tools.url '{remote}' is not a valid URL"));
            }
        }
        _ => warnings.push("no remote capability server configured; remote tools disabled".to_string()),
    }
    if config.completion.max_rounds == 0 {
        warnings.push("completion.max_rounds is 0; every turn will be rejected".to_string());
    }
    if config.tools.search_api_key.is_none() {
        warnings.push("no search API key configured; web_search will report an error".to_string());
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = AppConfig::default();
        let vars = env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("CHATRELAY_PORT", "9090"),
            ("MCP_SERVER_URL", "http://localhost:4000/mcp"),
        ]);
        apply_env_overrides(&mut config, |k| vars.get(k).cloned());

        assert_eq!(config.completion.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.gateway.port, 9090);
        assert!(config.remote_tools.is_enabled());
    }

    #[test]
    fn invalid_port_and_blank_values_are_ignored() {
        let mut config = AppConfig::default();
        let vars = env(&[("CHATRELAY_PORT", "not-a-port"), ("OPENAI_API_KEY", "   ")]);
        apply_env_overrides(&mut config, |k| vars.get(k).cloned());

        assert_eq!(config.gateway.port, 8080);
        assert!(config.completion.api_key.is_none());
    }

    #[test]
    fn loads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[gateway]\nport = 7000\n\n[completion]\nmax_rounds = 3").unwrap();

        let config = ConfigLoader::load_file(file.path()).unwrap();
        assert_eq!(config.gateway.port, 7000);
        assert_eq!(config.completion.max_rounds, 3);
    }

    #[test]
    fn rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = ConfigLoader::load_file(file.path()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn validate_warns_about_missing_credentials() {
        let warnings = validate(&AppConfig::default());
        assert!(warnings.iter().any(|w| w.contains("API key")));
        assert!(warnings.iter().any(|w| w.contains("remote tools disabled")));
    }
}
