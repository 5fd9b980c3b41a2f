use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque client-supplied conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Conversation mode selecting the system prompt and the visible tool set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    #[default]
    General,
    Research,
    Workspace,
}

impl ConversationMode {
    pub const ALL: [ConversationMode; 3] = [
        ConversationMode::General,
        ConversationMode::Research,
        ConversationMode::Workspace,
    ];

    /// Parse the request's `context` selector. Returns `None` for unknown values.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "general" | "chat" => Some(Self::General),
            "research" | "search" => Some(Self::Research),
            "workspace" | "data" => Some(Self::Workspace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Research => "research",
            Self::Workspace => "workspace",
        }
    }
}

impl fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_modes_case_insensitively() {
        assert_eq!(ConversationMode::parse("Research"), Some(ConversationMode::Research));
        assert_eq!(ConversationMode::parse(" WORKSPACE "), Some(ConversationMode::Workspace));
        assert_eq!(ConversationMode::parse(""), Some(ConversationMode::General));
    }

    #[test]
    fn parse_unknown_mode_is_none() {
        assert_eq!(ConversationMode::parse("poetry"), None);
    }

    #[test]
    fn thread_id_serializes_as_plain_string() {
        let id = ThreadId::new("t-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"t-1\"");
    }
}
