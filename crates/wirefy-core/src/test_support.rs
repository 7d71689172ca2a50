//! In-process HTTP fakes for Figma and the LLM gateway

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::events::EventSink;
use crate::protocol::LogEntry;

/// Serve `router` on an ephemeral port and return its base URL
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn sample_document() -> Value {
    json!({
        "id": "38:2",
        "name": "Dashboard",
        "type": "FRAME",
        "absoluteBoundingBox": {"x": 0, "y": 0, "width": 1440, "height": 900},
        "fills": [{"type": "SOLID", "color": {"r": 0.96, "g": 0.96, "b": 0.96, "a": 1.0}}],
        "itemSpacing": 24,
        "children": [
            {
                "id": "38:3", "name": "Header", "type": "TEXT",
                "characters": "MCP SERVER",
                "style": {"fontFamily": "Inter", "fontSize": 32, "fontWeight": 700}
            },
            {
                "id": "38:4", "name": "Grid", "type": "FRAME",
                "children": [
                    {"id": "38:5", "name": "Block", "type": "RECTANGLE", "cornerRadius": 8,
                     "fills": [{"type": "SOLID", "color": {"r": 0.2, "g": 0.4, "b": 0.8, "a": 1.0}}]}
                ]
            }
        ]
    })
}

fn has_token(headers: &HeaderMap) -> bool {
    headers.get("x-figma-token").is_some()
}

async fn nodes(
    Path(key): Path<String>,
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !has_token(&headers) || key == "FORBIDDEN" {
        return (StatusCode::FORBIDDEN, r#"{"status":403,"err":"Invalid token"}"#).into_response();
    }
    let ids = q.get("ids").cloned().unwrap_or_default();
    let mut map = serde_json::Map::new();
    for id in ids.split(',') {
        let entry = if id == "38:2" {
            json!({"document": sample_document(), "components": {}, "styles": {"S:1": {"name": "Body"}}})
        } else {
            Value::Null
        };
        map.insert(id.to_string(), entry);
    }
    Json(json!({"name": "MCP-Test", "nodes": map})).into_response()
}

async fn file(Path(key): Path<String>, headers: HeaderMap) -> Response {
    if !has_token(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    Json(json!({"name": "MCP-Test", "key": key, "document": {"id": "0:0", "type": "DOCUMENT"}}))
        .into_response()
}

async fn images(
    Path(_key): Path<String>,
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !has_token(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let host = headers
        .get("host")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("127.0.0.1")
        .to_string();
    let ids = q.get("ids").cloned().unwrap_or_default();
    let mut map = serde_json::Map::new();
    for id in ids.split(',') {
        let url = if id == "38:2" {
            Value::String(format!("http://{host}/cdn/{}.png", id.replace(':', "-")))
        } else {
            Value::Null
        };
        map.insert(id.to_string(), url);
    }
    Json(json!({"err": null, "images": map})).into_response()
}

async fn cdn() -> impl IntoResponse {
    (
        [("content-type", "image/png")],
        b"\x89PNG\r\n\x1a\nfake-image-bytes".to_vec(),
    )
}

/// Fake of the Figma REST API mounted under `/v1`
pub fn figma_router() -> Router {
    Router::new()
        .route("/v1/files/:key/nodes", get(nodes))
        .route("/v1/files/:key", get(file))
        .route("/v1/images/:key", get(images))
        .route("/cdn/:name", get(cdn))
}

/// Fake chat-completions endpoint replaying canned responses in order
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    pub responses: Arc<Mutex<VecDeque<(StatusCode, Value)>>>,
    pub requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

impl ScriptedGateway {
    pub fn new(responses: Vec<(StatusCode, Value)>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            requests: Arc::default(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1/chat/completions", post(scripted_completion))
            .with_state(self.clone())
    }

    pub fn request_bodies(&self) -> Vec<Value> {
        self.requests.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }
}

async fn scripted_completion(
    State(gw): State<ScriptedGateway>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    gw.requests.lock().unwrap().push((headers, body));
    let next = gw.responses.lock().unwrap().pop_front();
    match next {
        Some((status, value)) => (status, Json(value)).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "script exhausted").into_response(),
    }
}

/// A plain assistant reply in chat-completions shape
pub fn text_completion(content: &str) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({
            "id": "gen-1",
            "model": "openai/gpt-3.5-turbo",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20}
        }),
    )
}

/// An assistant reply requesting one tool call
pub fn tool_call_completion(call_id: &str, name: &str, arguments: Value) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({
            "id": "gen-2",
            "model": "openai/gpt-3.5-turbo",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": call_id,
                        "type": "function",
                        "function": {"name": name, "arguments": arguments.to_string()}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }),
    )
}

/// Collects event names in memory
#[derive(Default, Clone)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events as `kind:detail` strings, in emission order
    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn emit_log(&self, entry: &LogEntry) {
        self.push(format!(
            "log:{}:{}",
            entry.direction,
            entry.method.as_deref().unwrap_or("-")
        ));
    }

    async fn emit_tool_called(&self, tool: &str, _arguments: &serde_json::Value) {
        self.push(format!("tool_called:{tool}"));
    }

    async fn emit_tool_finished(&self, tool: &str, ok: bool) {
        self.push(format!("tool_finished:{tool}:{ok}"));
    }

    async fn emit_plan_saved(&self, path: &std::path::Path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.push(format!("plan_saved:{name}"));
    }
}
