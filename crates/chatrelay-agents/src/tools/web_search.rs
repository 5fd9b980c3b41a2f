use async_trait::async_trait;
use chatrelay_common::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{Tool, ToolContext, ToolOutput, parse_args};

const MAX_RESULTS: u8 = 10;

/// Web search against a Tavily-compatible JSON API.
pub struct WebSearch {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl WebSearch {
    pub fn new(client: Client, endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebSearchArgs {
    query: String,
    #[serde(default = "default_max_results")]
    max_results: u8,
}

fn default_max_results() -> u8 {
    5
}

impl WebSearchArgs {
    fn validate(self) -> Result<Self> {
        if self.query.trim().is_empty() {
            return Err(Error::Tool("query must not be empty".to_string()));
        }
        if !(1..=MAX_RESULTS).contains(&self.max_results) {
            return Err(Error::Tool(format!(
                "max_results must be between 1 and {MAX_RESULTS}"
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns a list of results with title, \
         url and a short snippet."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_RESULTS,
                    "description": "Number of results to return (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let args = parse_args::<WebSearchArgs>(self.name(), args)?.validate()?;
        let Some(api_key) = &self.api_key else {
            return Ok(ToolOutput::error("web search is not configured"));
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "api_key": api_key,
                "query": args.query,
                "max_results": args.max_results,
            }))
            .send()
            .await
            .map_err(|e| Error::Tool(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Tool(format!(
                "search API returned status {}",
                response.status().as_u16()
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::Tool(format!("invalid search response: {e}")))?;

        let results: Vec<serde_json::Value> = body
            .results
            .into_iter()
            .take(usize::from(args.max_results))
            .map(|hit| json!({ "title": hit.title, "url": hit.url, "snippet": hit.content }))
            .collect();

        Ok(ToolOutput::json(&json!({ "results": results })))
    }
}
