//! MCP dispatcher
//!
//! Transport-independent handling of Streamable HTTP JSON-RPC messages over a
//! [`ToolRegistry`]. The HTTP layer passes in the `mcp-session-id` header and
//! the parsed body, and turns the [`DispatchOutcome`] back into a response.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::protocol::{
    CallToolResult, Implementation, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    INVALID_PARAMS, INVALID_REQUEST, MCP_PROTOCOL_VERSION, METHOD_NOT_FOUND,
};
use crate::tools::ToolRegistry;

pub const SERVER_NAME: &str = "wirefy";

/// Sessions kept before the least recently seen one is evicted
pub const MAX_SESSIONS: usize = 1024;

/// Sessions idle longer than this are dropped
pub const SESSION_IDLE_MINUTES: i64 = 30;

/// Per-session bookkeeping
#[derive(Debug, Clone)]
pub struct SessionState {
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Set once the client sent `notifications/initialized`
    pub ready: bool,
    pub client_info: Option<Implementation>,
}

/// What the transport should send back
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// A JSON-RPC response, plus the session id to echo in the header
    Response {
        body: JsonRpcResponse,
        session_id: Option<String>,
    },
    /// Notification handled, nothing to send (HTTP 202)
    Accepted,
}

#[derive(Clone)]
pub struct McpDispatcher {
    registry: ToolRegistry,
    sessions: Arc<RwLock<HashMap<String, SessionState>>>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl McpDispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            sessions: Arc::default(),
            max_sessions: MAX_SESSIONS,
            idle_timeout: Duration::minutes(SESSION_IDLE_MINUTES),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn session(&self, id: &str) -> Option<SessionState> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop a session; returns whether it existed
    pub async fn close_session(&self, id: &str) -> bool {
        let existed = self.sessions.write().await.remove(id).is_some();
        if existed {
            info!(session_id = id, "MCP session closed");
        }
        existed
    }

    pub async fn handle(&self, session: Option<&str>, message: Value) -> DispatchOutcome {
        let raw_id = match message.get("id") {
            Some(id @ (Value::String(_) | Value::Number(_))) => id.clone(),
            _ => Value::Null,
        };
        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed JSON-RPC message");
                return respond(
                    JsonRpcResponse::failure(raw_id, INVALID_REQUEST, format!("Invalid request: {e}")),
                    None,
                );
            }
        };
        debug!(method = %request.method, session = ?session, "MCP message");

        if request.method == "initialize" {
            return self.initialize(request).await;
        }

        let known = match session {
            Some(id) => self.touch(id).await,
            None => false,
        };
        let session_id = match session {
            Some(id) if known => id.to_string(),
            _ => {
                if request.is_notification() {
                    return DispatchOutcome::Accepted;
                }
                let id = request.id.unwrap_or(Value::Null);
                return respond(
                    JsonRpcResponse::failure(id, INVALID_REQUEST, "session not initialized"),
                    None,
                );
            }
        };

        let Some(id) = request.id.clone() else {
            if request.method == "notifications/initialized" {
                if let Some(state) = self.sessions.write().await.get_mut(&session_id) {
                    state.ready = true;
                }
                debug!(session_id = %session_id, "MCP session ready");
            }
            return DispatchOutcome::Accepted;
        };

        let body = match request.method.as_str() {
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": self.registry.list() })),
            "tools/call" => self.call_tool(id, request.params).await,
            other => JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
        };
        respond(body, Some(session_id))
    }

    /// Refresh a session's last-seen time; false when unknown or expired
    async fn touch(&self, id: &str) -> bool {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(state) if now - state.last_seen < self.idle_timeout => {
                state.last_seen = now;
                true
            }
            Some(_) => {
                sessions.remove(id);
                info!(session_id = id, "MCP session expired");
                false
            }
            None => false,
        }
    }

    async fn initialize(&self, request: JsonRpcRequest) -> DispatchOutcome {
        // a session id only reaches the client through a response
        let Some(id) = request.id else {
            warn!("Ignoring initialize sent as a notification");
            return DispatchOutcome::Accepted;
        };
        let session_id = Uuid::new_v4().to_string();
        let client_info = request
            .params
            .as_ref()
            .and_then(|p| p.get("clientInfo"))
            .and_then(|c| serde_json::from_value::<Implementation>(c.clone()).ok());

        info!(
            session_id = %session_id,
            client = client_info.as_ref().map(|c| c.name.as_str()).unwrap_or("unknown"),
            "MCP session initialized"
        );
        let now = Utc::now();
        {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|_, state| now - state.last_seen < self.idle_timeout);
            while sessions.len() >= self.max_sessions {
                let Some(oldest) = sessions
                    .iter()
                    .min_by_key(|(_, state)| state.last_seen)
                    .map(|(key, _)| key.clone())
                else {
                    break;
                };
                sessions.remove(&oldest);
                debug!(session_id = %oldest, "Evicted least recently used MCP session");
            }
            sessions.insert(
                session_id.clone(),
                SessionState {
                    created_at: now,
                    last_seen: now,
                    ready: false,
                    client_info,
                },
            );
        }

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: json!({ "tools": { "listChanged": false } }),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let body = match serde_json::to_value(result) {
            Ok(v) => JsonRpcResponse::success(id, v),
            Err(e) => JsonRpcResponse::failure(id, crate::protocol::INTERNAL_ERROR, e.to_string()),
        };
        respond(body, Some(session_id))
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params = params.unwrap_or(Value::Null);
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::failure(id, INVALID_PARAMS, "tools/call requires a tool name");
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let result = match self.registry.call(name, arguments).await {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                CallToolResult::text(text, false)
            }
            Err(AppError::UnknownTool(name)) => {
                return JsonRpcResponse::failure(id, INVALID_PARAMS, format!("Unknown tool: {name}"));
            }
            Err(e) => CallToolResult::text(e.to_string(), true),
        };

        match serde_json::to_value(result) {
            Ok(v) => JsonRpcResponse::success(id, v),
            Err(e) => JsonRpcResponse::failure(id, crate::protocol::INTERNAL_ERROR, e.to_string()),
        }
    }
}

fn respond(body: JsonRpcResponse, session_id: Option<String>) -> DispatchOutcome {
    DispatchOutcome::Response { body, session_id }
}
