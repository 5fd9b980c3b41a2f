use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("completion provider error: {0}")]
    Provider(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("remote capability error: {0}")]
    Mcp(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error came from configuration that is missing or malformed.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
