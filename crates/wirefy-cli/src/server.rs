//! HTTP backend
//!
//! REST endpoints over the design agent plus a Streamable HTTP MCP endpoint
//! at `/mcp` backed by the same tool registry.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use wirefy_core::agent::{resolve_link, DesignAgent, DEFAULT_MAX_ROUNDS};
use wirefy_core::figma::ComponentInfo;
use wirefy_core::mcp_server::{DispatchOutcome, McpDispatcher};
use wirefy_core::protocol::{JsonRpcResponse, INVALID_REQUEST, MCP_SESSION_ID_HEADER, PARSE_ERROR};
use wirefy_core::{parse_url, AppError};

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub agent: DesignAgent,
    pub dispatcher: McpDispatcher,
}

impl AppState {
    pub fn new(agent: DesignAgent) -> Self {
        let dispatcher = McpDispatcher::new(agent.tools().clone());
        Self { agent, dispatcher }
    }
}

/// Error response with a status derived from the failure kind
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

pub fn error_status(error: &AppError) -> StatusCode {
    match error {
        AppError::InvalidLink(_) | AppError::InvalidArguments(_) => StatusCode::BAD_REQUEST,
        AppError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        e if e.is_upstream() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_message(error: &AppError) -> String {
    match error {
        AppError::InvalidLink(message) => message.clone(),
        other => other.to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = error_status(&self.0);
        warn!(%status, error = %self.0, "Request failed");
        (status, Json(json!({ "error": error_message(&self.0) }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct FigmaLinkRequest {
    pub figma_link: String,
    #[serde(default)]
    pub out_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub file_key: String,
    pub component_id: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_info: Option<ComponentInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_used: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AgentQuery {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub max_rounds: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/parse-figma-link", post(parse_figma_link))
        .route("/analyze", post(analyze))
        .route("/analyze-from-link", post(analyze_from_link))
        .route("/generate-plan", post(generate_plan))
        .route("/generate-plan-from-link", post(generate_plan_from_link))
        .route("/tools", get(list_tools))
        .route("/agent", post(run_agent))
        .route("/generate", post(generate))
        .route("/vision", post(vision))
        .route("/usage", get(usage))
        .route("/mcp", post(mcp_post).delete(mcp_delete))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Bind and serve until the process is stopped
pub async fn serve(state: AppState, host: &str, port: u16) -> wirefy_core::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Io(format!("Failed to bind to {addr}: {e}")))?;

    info!("Wirefy backend listening on http://{addr}");
    info!("MCP endpoint at http://{addr}/mcp");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| AppError::Io(format!("Server error: {e}")))
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "Wirefy Figma MCP backend",
        "status": "running",
        "mcp_mode": if state.agent.figma().has_token() { "initialized" } else { "fallback" },
        "agent_ready": state.agent.gateway().has_api_key(),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Local::now().to_rfc3339(),
        "components": {
            "figma": state.agent.figma().has_token(),
            "gateway": state.agent.gateway().has_api_key(),
            "tools": state.dispatcher.registry().count(),
            "mcp_sessions": state.dispatcher.session_count().await,
        }
    }))
}

async fn parse_figma_link(Json(req): Json<FigmaLinkRequest>) -> Json<Value> {
    Json(json!(parse_url(&req.figma_link)))
}

async fn analyze(State(state): State<AppState>, Json(req): Json<AnalyzeRequest>) -> Response {
    analyze_component(&state, &req.file_key, &req.component_id).await
}

async fn analyze_from_link(State(state): State<AppState>, Json(req): Json<FigmaLinkRequest>) -> Response {
    match resolve_link(&req.figma_link) {
        Ok((file_key, component_id)) => analyze_component(&state, &file_key, &component_id).await,
        Err(e) => ApiError(e).into_response(),
    }
}

async fn analyze_component(state: &AppState, file_key: &str, component_id: &str) -> Response {
    match state.agent.analyze_component(file_key, component_id).await {
        Ok(result) => Json(AnalyzeResponse {
            success: true,
            message: "Analysis complete".to_string(),
            component_info: Some(result.component),
            analysis: Some(result.analysis),
            markdown: Some(result.markdown),
            tools_used: Some(result.tools_used),
            error: None,
        })
        .into_response(),
        Err(e) => {
            let status = error_status(&e);
            warn!(%status, error = %e, "Analysis failed");
            (
                status,
                Json(AnalyzeResponse {
                    success: false,
                    message: "Analysis failed".to_string(),
                    component_info: None,
                    analysis: None,
                    markdown: None,
                    tools_used: None,
                    error: Some(error_message(&e)),
                }),
            )
                .into_response()
        }
    }
}

async fn generate_plan(State(state): State<AppState>, Json(req): Json<AnalyzeRequest>) -> ApiResult<Value> {
    plan_component(&state, &req.file_key, &req.component_id).await
}

async fn generate_plan_from_link(
    State(state): State<AppState>,
    Json(req): Json<FigmaLinkRequest>,
) -> ApiResult<Value> {
    let (file_key, component_id) = resolve_link(&req.figma_link)?;
    plan_component(&state, &file_key, &component_id).await
}

async fn plan_component(state: &AppState, file_key: &str, component_id: &str) -> ApiResult<Value> {
    let plan = state.agent.generate_plan(file_key, component_id).await?;
    Ok(Json(json!({
        "success": true,
        "component": plan.component,
        "plan": plan.plan,
        "saved_files": plan.saved_files,
        "message": "Implementation plan generated and saved",
    })))
}

async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools = state.dispatcher.registry().list();
    Json(json!({
        "count": tools.len(),
        "tools": tools,
        "mode": "mcp",
    }))
}

async fn run_agent(State(state): State<AppState>, Json(query): Json<AgentQuery>) -> Json<AgentResponse> {
    debug!(query = %query.query, "Agent query");
    Json(match state.agent.run(&query.query).await {
        Ok(response) => AgentResponse {
            success: true,
            response: Some(response),
            error: None,
        },
        Err(e) => AgentResponse {
            success: false,
            response: None,
            error: Some(error_message(&e)),
        },
    })
}

async fn generate(State(state): State<AppState>, Json(req): Json<GenerateRequest>) -> Response {
    let Some(prompt) = req.prompt.filter(|p| !p.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "prompt is required" }))).into_response();
    };
    let max_rounds = req.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS);

    match state.agent.run_with_tools(&prompt, max_rounds).await {
        Ok(response) => Json(json!({ "success": true, "response": response })).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn vision(State(state): State<AppState>, Json(req): Json<FigmaLinkRequest>) -> ApiResult<Value> {
    let (file_key, node_id) = resolve_link(&req.figma_link)?;
    let out_dir = req
        .out_dir
        .as_deref()
        .map(|dir| state.agent.writer().output_subdir(dir))
        .transpose()?;
    let result = state
        .agent
        .analyze_vision(&file_key, &node_id, out_dir.as_deref())
        .await?;
    Ok(Json(json!({
        "success": true,
        "markdown": result.markdown,
        "path": result.path,
    })))
}

async fn usage(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.agent.gateway().usage().snapshot().await))
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(MCP_SESSION_ID_HEADER).and_then(|v| v.to_str().ok())
}

/// Streamable HTTP: one JSON-RPC message or a batch per POST
async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to parse MCP request body: {e}");
            let failure = JsonRpcResponse::failure(Value::Null, PARSE_ERROR, format!("Parse error: {e}"));
            return (StatusCode::BAD_REQUEST, Json(failure)).into_response();
        }
    };

    let mut session = session_header(&headers).map(str::to_string);
    let (messages, batch) = match message {
        Value::Array(items) if items.is_empty() => {
            let failure = JsonRpcResponse::failure(Value::Null, INVALID_REQUEST, "Invalid Request: empty batch");
            return (StatusCode::BAD_REQUEST, Json(failure)).into_response();
        }
        Value::Array(items) => (items, true),
        single => (vec![single], false),
    };

    let mut responses = Vec::new();
    for message in messages {
        if let DispatchOutcome::Response { body, session_id } =
            state.dispatcher.handle(session.as_deref(), message).await
        {
            if session_id.is_some() {
                session = session_id;
            }
            responses.push(body);
        }
    }

    let mut response = match responses.as_slice() {
        [] => return StatusCode::ACCEPTED.into_response(),
        [only] if !batch => Json(only).into_response(),
        all => Json(all).into_response(),
    };
    if let Some(value) = session.and_then(|s| HeaderValue::from_str(&s).ok()) {
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    response
}

async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let Some(session) = session_header(&headers) else {
        return StatusCode::BAD_REQUEST;
    };
    if state.dispatcher.close_session(session).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use wirefy_core::Config;

    fn app(tmp: &TempDir) -> Router {
        let root = tmp.path().to_string_lossy().to_string();
        let config = Config::from_lookup(|key| match key {
            "WORKSPACE_ROOT" => Some(root.clone()),
            "FIGMA_API_URL" => Some("http://127.0.0.1:1/v1".to_string()),
            _ => None,
        })
        .unwrap();
        router(AppState::new(DesignAgent::from_config(&config).unwrap()))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>, session: Option<&str>) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(sid) = session {
            builder = builder.header(MCP_SESSION_ID_HEADER, sid);
        }
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, json)
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);

        let (status, _, body) = call(&app, "GET", "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["mcp_mode"], "fallback");
        assert_eq!(body["agent_ready"], false);

        let (_, _, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["tools"], 6);
    }

    #[tokio::test]
    async fn test_parse_figma_link() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        let (status, _, body) = call(
            &app,
            "POST",
            "/parse-figma-link",
            Some(json!({"figma_link": "https://www.figma.com/design/ABC/x?node-id=38-2"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["file_key"], "ABC");
        assert_eq!(body["node_id"], "38:2");
        assert_eq!(body["is_valid"], true);
    }

    #[tokio::test]
    async fn test_link_errors_are_bad_requests() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);

        let (status, _, body) = call(
            &app,
            "POST",
            "/generate-plan-from-link",
            Some(json!({"figma_link": "https://example.com/nothing"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Could not extract file key from link");

        let (status, _, body) = call(
            &app,
            "POST",
            "/analyze-from-link",
            Some(json!({"figma_link": "https://www.figma.com/design/ABC/x"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Could not extract component ID from link. Make sure you're sharing a specific component."
        );
    }

    #[tokio::test]
    async fn test_missing_figma_token_is_internal_error() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        let (status, _, body) = call(
            &app,
            "POST",
            "/analyze",
            Some(json!({"file_key": "ABC", "component_id": "38:2"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("FIGMA_ACCESS_TOKEN"));
    }

    #[tokio::test]
    async fn test_agent_reports_failure_in_envelope() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        let (status, _, body) = call(&app, "POST", "/agent", Some(json!({"query": "hello"})), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("OPENROUTER_API_KEY"));
    }

    #[tokio::test]
    async fn test_generate_requires_prompt() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        let (status, _, body) = call(&app, "POST", "/generate", Some(json!({})), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "prompt is required");
    }

    #[tokio::test]
    async fn test_tools_and_usage() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        let (_, _, body) = call(&app, "GET", "/tools", None, None).await;
        assert_eq!(body["count"], 6);
        assert_eq!(body["mode"], "mcp");
        assert_eq!(body["tools"][0]["name"], "parse_figma_link");

        let (_, _, body) = call(&app, "GET", "/usage", None, None).await;
        assert_eq!(body["total_tokens"], 0);
    }

    #[tokio::test]
    async fn test_mcp_session_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);

        let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
        let (status, headers, body) = call(&app, "POST", "/mcp", Some(init), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["serverInfo"]["name"], "wirefy");
        let sid = headers[MCP_SESSION_ID_HEADER].to_str().unwrap().to_string();

        let notify = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let (status, _, _) = call(&app, "POST", "/mcp", Some(notify), Some(&sid)).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
        let (_, headers, body) = call(&app, "POST", "/mcp", Some(list), Some(&sid)).await;
        assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 6);
        assert_eq!(headers[MCP_SESSION_ID_HEADER], sid.as_str());

        let (status, _, _) = call(&app, "DELETE", "/mcp", None, Some(&sid)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _, _) = call(&app, "DELETE", "/mcp", None, Some(&sid)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_mcp_parse_error() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_mcp_batch_keeps_array_shape() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);

        let batch = json!([{"jsonrpc": "2.0", "id": 7, "method": "initialize", "params": {}}]);
        let (status, headers, body) = call(&app, "POST", "/mcp", Some(batch), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.contains_key(MCP_SESSION_ID_HEADER));
        let replies = body.as_array().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["id"], 7);

        let (status, _, body) = call(&app, "POST", "/mcp", Some(json!([])), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_vision_rejects_out_dir_outside_output() {
        let tmp = TempDir::new().unwrap();
        let app = app(&tmp);
        let link = "https://www.figma.com/design/ABC/x?node-id=38-2";

        for out_dir in ["/tmp/x", "../escape", "plans/../../escape"] {
            let (status, _, body) = call(
                &app,
                "POST",
                "/vision",
                Some(json!({"figma_link": link, "out_dir": out_dir})),
                None,
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{out_dir}");
            assert!(body["error"].as_str().unwrap().contains("out_dir"));
        }
        assert!(!tmp.path().join("escape").exists());
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(error_status(&AppError::InvalidLink("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(error_status(&AppError::QuotaExceeded("x".into())), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            error_status(&AppError::Figma { status: 404, message: "x".into() }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&AppError::Gateway { status: 500, message: "x".into() }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(error_status(&AppError::Config("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
