use chatrelay_common::ConversationMode;

const GENERAL: &str = "You are a helpful assistant. Answer clearly and concisely. \
Use the available tools when they help answer the question, and say so when you \
are unsure.";

const RESEARCH: &str = "You are a research assistant. Search the web for current \
information before answering factual questions, cite the sources you used by URL, \
and distinguish what the sources say from your own inference.";

const WORKSPACE: &str = "You are a workspace assistant with access to the user's \
connected data through remote tools. Prefer querying those tools over guessing, \
and report when a tool returns an error.";

/// Details captured at thread creation that shape the system prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptDetails<'a> {
    pub data_source: Option<&'a str>,
    pub entity_id: Option<&'a str>,
}

pub fn default_prompt(mode: ConversationMode) -> &'static str {
    match mode {
        ConversationMode::General => GENERAL,
        ConversationMode::Research => RESEARCH,
        ConversationMode::Workspace => WORKSPACE,
    }
}

/// Build the system prompt a new thread is seeded with.
pub fn system_prompt(
    mode: ConversationMode,
    override_prompt: Option<&str>,
    details: &PromptDetails<'_>,
) -> String {
    let mut prompt = override_prompt
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| default_prompt(mode))
        .to_string();

    if mode == ConversationMode::Workspace {
        if let Some(source) = details.data_source {
            prompt.push_str(&format!("\n\nThe active data source is \"{source}\"."));
        }
        if let Some(entity) = details.entity_id {
            prompt.push_str(&format!(
                "\n\nThis conversation concerns the record with id \"{entity}\"."
            ));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_replaces_default() {
        let prompt = system_prompt(
            ConversationMode::General,
            Some("Be terse."),
            &PromptDetails::default(),
        );
        assert_eq!(prompt, "Be terse.");
    }

    #[test]
    fn blank_override_falls_back_to_default() {
        let prompt = system_prompt(ConversationMode::Research, Some("  "), &PromptDetails::default());
        assert_eq!(prompt, RESEARCH);
    }

    #[test]
    fn workspace_mentions_data_source_and_entity() {
        let details = PromptDetails {
            data_source: Some("crm"),
            entity_id: Some("acct-42"),
        };
        let prompt = system_prompt(ConversationMode::Workspace, None, &details);
        assert!(prompt.starts_with(WORKSPACE));
        assert!(prompt.contains("\"crm\""));
        assert!(prompt.contains("\"acct-42\""));
    }

    #[test]
    fn other_modes_ignore_workspace_details() {
        let details = PromptDetails {
            data_source: Some("crm"),
            entity_id: None,
        };
        assert_eq!(system_prompt(ConversationMode::General, None, &details), GENERAL);
    }
}
