//! Streamable HTTP MCP client
//!
//! Speaks to any MCP server exposing a single POST endpoint. The server may
//! answer with plain JSON or an SSE stream; either way the first JSON-RPC
//! response carrying our request id is taken.

use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::events::{NoOpEventSink, SharedSink};
use crate::protocol::{
    CallToolResult, Direction, Implementation, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, LogEntry, ToolDefinition, MCP_PROTOCOL_VERSION,
    MCP_SESSION_ID_HEADER,
};

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

pub struct McpClient {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
    session_id: RwLock<Option<String>>,
    server_info: RwLock<Option<Implementation>>,
    events: SharedSink,
}

impl McpClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
            server_info: RwLock::new(None),
            events: Arc::new(NoOpEventSink),
        })
    }

    /// Report every message sent and received to `events`
    pub fn with_events(mut self, events: SharedSink) -> Self {
        self.events = events;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    pub async fn server_info(&self) -> Option<Implementation> {
        self.server_info.read().await.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.session_id.read().await.is_some()
    }

    /// `initialize` followed by `notifications/initialized`
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "wirefy",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = self.request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(result)?;

        if self.session_id.read().await.is_none() {
            return Err(AppError::Mcp(
                "server did not return an mcp-session-id header".to_string(),
            ));
        }
        *self.server_info.write().await = Some(result.server_info.clone());

        self.notify("notifications/initialized").await?;
        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            "MCP session established"
        );
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        self.ensure_initialized().await?;
        let result = self.request("tools/list", None).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(tools)?)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.ensure_initialized().await?;
        let result = self
            .request("tools/call", Some(json!({"name": name, "arguments": arguments})))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// End the session with `DELETE`; the local session is forgotten even if
    /// the server rejects the request
    pub async fn close(&self) -> Result<()> {
        let Some(session_id) = self.session_id.write().await.take() else {
            return Ok(());
        };
        *self.server_info.write().await = None;

        let response = self
            .client
            .delete(&self.endpoint)
            .header(MCP_SESSION_ID_HEADER, &session_id)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "MCP server rejected session close");
        }
        Ok(())
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized().await {
            Ok(())
        } else {
            Err(AppError::McpNotInitialized)
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = serde_json::to_value(JsonRpcRequest::new(id, method, params))?;

        let response = self
            .post(&message)
            .await?
            .ok_or_else(|| AppError::Mcp(format!("no response to {method}")))?;
        let response = find_response(&response, id)
            .ok_or_else(|| AppError::Mcp(format!("no response with id {id} to {method}")))?;

        if let Some(err) = response.error {
            return Err(AppError::Mcp(format!("{}: {}", err.code, err.message)));
        }
        response
            .result
            .ok_or_else(|| AppError::Mcp(format!("empty result for {method}")))
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let message = serde_json::to_value(JsonRpcNotification::new(method))?;
        self.post(&message).await?;
        Ok(())
    }

    /// POST one message; returns the raw body, or `None` for 202
    async fn post(&self, message: &Value) -> Result<Option<String>> {
        let session_id = self.session_id.read().await.clone();
        self.events
            .emit_log(&LogEntry::new(Direction::Out, message, session_id.as_deref()))
            .await;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, ACCEPT_BOTH)
            .json(message);
        if let Some(ref sid) = session_id {
            request = request.header(MCP_SESSION_ID_HEADER, sid);
        }

        let response = request.send().await?;
        let status = response.status();

        if let Some(sid) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            debug!(session_id = sid, "Captured MCP session id");
            *self.session_id.write().await = Some(sid.to_string());
        }

        if status == StatusCode::ACCEPTED {
            return Ok(None);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Mcp(format!("HTTP {status}: {body}")));
        }

        for value in json_messages(&body) {
            let sid = self.session_id.read().await.clone();
            self.events
                .emit_log(&LogEntry::new(Direction::In, &value, sid.as_deref()))
                .await;
        }
        Ok(Some(body))
    }
}

/// Every JSON value in a body that is either plain JSON or an SSE stream
fn json_messages(body: &str) -> Vec<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return match value {
            Value::Array(items) => items,
            other => vec![other],
        };
    }
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .filter_map(|data| serde_json::from_str::<Value>(data).ok())
        .collect()
}

fn find_response(body: &str, id: u64) -> Option<JsonRpcResponse> {
    json_messages(body)
        .into_iter()
        .filter(|v| v.get("id").and_then(Value::as_u64) == Some(id))
        .find_map(|v| serde_json::from_value::<JsonRpcResponse>(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::figma::FigmaClient;
    use crate::mcp_server::{DispatchOutcome, McpDispatcher};
    use crate::test_support::{figma_router, spawn, RecordingEventSink};
    use crate::tools::ToolRegistry;
    use axum::{
        extract::State,
        http::{HeaderMap, StatusCode as AxumStatus},
        response::{IntoResponse, Response},
        routing::post,
        Json, Router,
    };

    #[derive(Clone)]
    struct Fake {
        dispatcher: McpDispatcher,
        sse: bool,
    }

    async fn mcp_post(State(fake): State<Fake>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
        let session = headers.get(MCP_SESSION_ID_HEADER).and_then(|v| v.to_str().ok());
        match fake.dispatcher.handle(session, body).await {
            DispatchOutcome::Accepted => AxumStatus::ACCEPTED.into_response(),
            DispatchOutcome::Response { body, session_id } => {
                let payload = serde_json::to_string(&body).unwrap();
                let mut response = if fake.sse {
                    (
                        [("content-type", "text/event-stream")],
                        format!("event: message\ndata: {payload}\n\n"),
                    )
                        .into_response()
                } else {
                    ([("content-type", "application/json")], payload).into_response()
                };
                if let Some(sid) = session_id {
                    response
                        .headers_mut()
                        .insert(MCP_SESSION_ID_HEADER, sid.parse().unwrap());
                }
                response
            }
        }
    }

    async fn mcp_delete(State(fake): State<Fake>, headers: HeaderMap) -> AxumStatus {
        let session = headers
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if fake.dispatcher.close_session(session).await {
            AxumStatus::NO_CONTENT
        } else {
            AxumStatus::NOT_FOUND
        }
    }

    async fn server(sse: bool) -> (String, McpDispatcher) {
        let figma_base = spawn(figma_router()).await;
        let figma = FigmaClient::new(
            format!("{figma_base}/v1"),
            Some("figd_test".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        let dispatcher = McpDispatcher::new(ToolRegistry::with_figma(figma));
        let router = Router::new()
            .route("/mcp", post(mcp_post).delete(mcp_delete))
            .with_state(Fake { dispatcher: dispatcher.clone(), sse });
        (format!("{}/mcp", spawn(router).await), dispatcher)
    }

    #[tokio::test]
    async fn test_calls_before_initialize_fail() {
        let (url, _) = server(false).await;
        let client = McpClient::new(url).unwrap();
        assert!(matches!(client.list_tools().await, Err(AppError::McpNotInitialized)));
        assert!(matches!(
            client.call_tool("parse_figma_link", json!({})).await,
            Err(AppError::McpNotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_handshake_and_discovery_json() {
        let (url, dispatcher) = server(false).await;
        let sink = RecordingEventSink::new();
        let client = McpClient::new(url).unwrap().with_events(Arc::new(sink.clone()));

        let init = client.initialize().await.unwrap();
        assert_eq!(init.server_info.name, "wirefy");
        let sid = client.session_id().await.unwrap();
        assert!(dispatcher.session(&sid).await.unwrap().ready);

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 6);

        let events = sink.events();
        assert_eq!(events[0], "log:out:initialize");
        assert!(events.contains(&"log:out:notifications/initialized".to_string()));
        assert!(events.contains(&"log:out:tools/list".to_string()));
    }

    #[tokio::test]
    async fn test_call_tool_over_sse() {
        let (url, _) = server(true).await;
        let client = McpClient::new(url).unwrap();
        client.initialize().await.unwrap();

        let result = client
            .call_tool(
                "parse_figma_link",
                json!({"figma_link": "https://www.figma.com/design/ABC/x?node-id=1-2"}),
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.joined_text().contains("ABC"));
    }

    #[tokio::test]
    async fn test_json_rpc_error_is_formatted() {
        let (url, _) = server(false).await;
        let client = McpClient::new(url).unwrap();
        client.initialize().await.unwrap();
        let err = client.call_tool("no_such_tool", json!({})).await.unwrap_err();
        assert!(matches!(err, AppError::Mcp(ref m) if m.starts_with("-32602: ")));
    }

    #[tokio::test]
    async fn test_close_forgets_session() {
        let (url, dispatcher) = server(false).await;
        let client = McpClient::new(url).unwrap();
        client.initialize().await.unwrap();
        assert_eq!(dispatcher.session_count().await, 1);

        client.close().await.unwrap();
        assert!(!client.is_initialized().await);
        assert_eq!(dispatcher.session_count().await, 0);
        assert!(matches!(client.list_tools().await, Err(AppError::McpNotInitialized)));
    }

    #[test]
    fn test_find_response_in_sse_stream() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\n\n";
        let response = find_response(body, 7).unwrap();
        assert_eq!(response.result.unwrap()["ok"], true);
        assert!(find_response(body, 8).is_none());
    }
}
