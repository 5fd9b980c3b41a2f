use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chatrelay_common::{Error, Result};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use rmcp::ServiceExt;
use rmcp::model::{CallToolRequestParams, RawContent};
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use tracing::{info, warn};

use super::transport::{
    CapabilityConnection, CapabilityTransport, RemoteCallResult, RemoteCredentials,
    RemoteToolInfo,
};

/// MCP over Streamable HTTP. The bearer credential and data-source selector
/// travel as default headers on the underlying HTTP client.
pub struct McpHttpTransport {
    url: String,
    data_source_header: String,
    connect_timeout: Duration,
}

impl McpHttpTransport {
    pub fn new(url: impl Into<String>, data_source_header: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            data_source_header: data_source_header.into(),
            connect_timeout,
        }
    }

    fn headers(&self, credentials: &RemoteCredentials) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(bearer) = &credentials.bearer {
            let value = HeaderValue::from_str(&bearer.header_value())
                .map_err(|_| Error::Mcp("bearer token is not a valid header value".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        if let Some(source) = &credentials.data_source {
            let name = HeaderName::from_bytes(self.data_source_header.as_bytes()).map_err(|_| {
                Error::Config(format!(
                    "invalid data source header name '{}'",
                    self.data_source_header
                ))
            })?;
            let value = HeaderValue::from_str(source)
                .map_err(|_| Error::Mcp("data source is not a valid header value".to_string()))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl CapabilityTransport for McpHttpTransport {
    async fn open(&self, credentials: &RemoteCredentials) -> Result<Box<dyn CapabilityConnection>> {
        let client = reqwest::Client::builder()
            .default_headers(self.headers(credentials)?)
            .build()
            .map_err(|e| Error::Mcp(format!("failed to build HTTP client: {e}")))?;

        let transport = StreamableHttpClientTransport::with_client(
            client,
            StreamableHttpClientTransportConfig::with_uri(self.url.clone()),
        );

        let secs = self.connect_timeout.as_secs();
        let service = tokio::time::timeout(self.connect_timeout, ().serve(transport))
            .await
            .map_err(|_| Error::Mcp(format!("MCP handshake timed out after {secs}s")))?
            .map_err(|e| Error::Mcp(format!("MCP handshake failed: {e}")))?;

        info!(url = %self.url, "MCP server connected");
        let peer = service.peer().clone();
        Ok(Box::new(McpHttpConnection {
            peer,
            service: Mutex::new(Some(service)),
        }))
    }
}

struct McpHttpConnection {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

#[async_trait]
impl CapabilityConnection for McpHttpConnection {
    async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|e| Error::Mcp(format!("failed to list tools: {e}")))?;

        Ok(tools
            .into_iter()
            .map(|t| RemoteToolInfo {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()),
                input_schema: serde_json::to_value(&*t.input_schema).unwrap_or_default(),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<RemoteCallResult> {
        let params = CallToolRequestParams {
            meta: None,
            task: None,
            name: name.to_string().into(),
            arguments: arguments.as_object().cloned(),
        };

        let result = self
            .peer
            .call_tool(params)
            .await
            .map_err(|e| Error::Mcp(format!("call to '{name}' failed: {e}")))?;

        let text: Vec<String> = result
            .content
            .iter()
            .filter_map(|c| match &c.raw {
                RawContent::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect();

        let content = if text.is_empty() {
            result
                .structured_content
                .map(|v| v.to_string())
                .unwrap_or_default()
        } else {
            text.join("\n")
        };

        Ok(RemoteCallResult {
            content,
            is_error: result.is_error.unwrap_or(false),
        })
    }

    async fn close(&self) {
        let service = match self.service.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(service) = service
            && let Err(e) = service.cancel().await
        {
            warn!("error cancelling MCP session: {e}");
        }
    }

    fn is_closed(&self) -> bool {
        match self.service.lock() {
            Ok(guard) => guard.as_ref().is_none_or(|s| s.is_closed()),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_security::BearerToken;

    fn transport(header: &str) -> McpHttpTransport {
        McpHttpTransport::new("http://127.0.0.1:1/mcp", header, Duration::from_secs(1))
    }

    #[test]
    fn credentials_become_default_headers() {
        let creds = RemoteCredentials::new(Some(BearerToken::new("tok-1")), Some("crm".to_string()));
        let headers = transport("X-Tenant-Source").headers(&creds).unwrap();

        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok-1");
        assert_eq!(headers.get("x-tenant-source").unwrap(), "crm");
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn missing_credentials_send_no_headers() {
        let headers = transport("X-Data-Source")
            .headers(&RemoteCredentials::default())
            .unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn invalid_header_values_are_rejected() {
        let bad_token = RemoteCredentials::new(Some(BearerToken::new("tok\ninjected")), None);
        assert!(matches!(
            transport("X-Data-Source").headers(&bad_token),
            Err(Error::Mcp(_))
        ));

        let source = RemoteCredentials::new(None, Some("crm".to_string()));
        assert!(matches!(
            transport("bad header").headers(&source),
            Err(Error::Config(_))
        ));
    }
}
