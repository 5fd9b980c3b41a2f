use async_trait::async_trait;
use chatrelay_common::{Error, Result};
use serde::Deserialize;
use serde_json::json;

use super::{Tool, ToolContext, ToolOutput, parse_args};

const MAX_TITLE_CHARS: usize = 120;

/// Names the conversation. Only offered on a thread's first turn.
pub struct SetThreadTitle;

#[derive(Debug, Deserialize)]
struct TitleArgs {
    title: String,
}

#[async_trait]
impl Tool for SetThreadTitle {
    fn name(&self) -> &str {
        "set_thread_title"
    }

    fn description(&self) -> &str {
        "Give this conversation a short descriptive title. Call this once, at the start \
         of a new conversation."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "maxLength": MAX_TITLE_CHARS,
                    "description": "A title of a few words"
                }
            },
            "required": ["title"]
        })
    }

    fn first_turn_only(&self) -> bool {
        true
    }

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let args = parse_args::<TitleArgs>(self.name(), args)?;
        let title = args.title.trim();
        if title.is_empty() {
            return Err(Error::Tool("title must not be empty".to_string()));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(Error::Tool(format!(
                "title must be at most {MAX_TITLE_CHARS} characters"
            )));
        }

        context.thread.set_title(title).await;
        Ok(ToolOutput::json(&json!({ "title": title })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_common::{ConversationMode, ThreadId};
    use chatrelay_store::{ConversationStore, ThreadSeed};

    #[tokio::test]
    async fn records_trimmed_title_on_thread() {
        let store = ConversationStore::default();
        let thread = store.get_or_create(&ThreadId::new("t"), || ThreadSeed {
            mode: ConversationMode::General,
            system_prompt: "sys".to_string(),
        });
        let context = ToolContext {
            thread: thread.clone(),
            user_id: None,
            entity_id: None,
        };

        SetThreadTitle
            .execute(&context, json!({"title": "  Trip planning "}))
            .await
            .unwrap();

        assert_eq!(thread.title().await.as_deref(), Some("Trip planning"));
    }
}
