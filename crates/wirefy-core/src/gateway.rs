//! LLM gateway client
//!
//! OpenRouter speaks the OpenAI `/chat/completions` format. This client adds
//! the attribution headers OpenRouter expects, classifies quota failures so
//! callers can react to them, and retries once on a cheaper model when a
//! fallback is configured.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::config::GatewayConfig;
use crate::error::{AppError, Result};
use crate::token_budget::UsageLedger;

const VISION_TEMPERATURE: f32 = 0.2;
const VISION_MAX_TOKENS: u32 = 1500;

/// Message body: a plain string or multimodal parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as the model produced them
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Decoded arguments; blank arguments decode to an empty object
    pub fn arguments(&self) -> Result<Value> {
        if self.function.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.function.arguments).map_err(|e| {
            AppError::InvalidArguments(format!(
                "tool '{}' called with malformed arguments: {e}",
                self.function.name
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(MessageContent::Text(content.into())),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text("assistant", content)
    }

    /// User message carrying a PNG screenshot as a data URL
    pub fn user_with_image(text: impl Into<String>, base64_png: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/png;base64,{base64_png}"),
                    },
                },
            ])),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant turn that requested tool calls
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.map(MessageContent::Text),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Result of one tool call
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(MessageContent::Text(content.into())),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens,
            temperature,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    /// Offer `tools`; `tool_choice` is set to `auto` only when there are any
    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tool_choice = (!tools.is_empty()).then(|| "auto".to_string());
        self.tools = tools;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// First choice of a completion, flattened
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub model: String,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

// Wire-only shapes

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<Value>,
}

/// Whether a gateway failure means the account or request ran out of budget
pub fn is_quota_error(status: StatusCode, message: &str) -> bool {
    if status == StatusCode::PAYMENT_REQUIRED || status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    let lower = message.to_lowercase();
    ["quota", "credits", "max_tokens", "requires more credits"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Client for an OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: Client,
    config: GatewayConfig,
    usage: UsageLedger,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            usage: UsageLedger::new(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    pub fn has_api_key(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Request with the configured model, token cap and temperature
    pub fn request(&self, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest::new(
            self.config.model.clone(),
            messages,
            self.config.max_tokens,
            self.config.temperature,
        )
    }

    /// Send `request`, retrying once on the fallback model after a quota error
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        match self.send(&request).await {
            Err(AppError::QuotaExceeded(message)) => {
                let Some(fallback) = self
                    .config
                    .fallback_model
                    .as_deref()
                    .filter(|m| *m != request.model)
                else {
                    return Err(AppError::QuotaExceeded(message));
                };

                warn!(
                    model = %request.model,
                    fallback,
                    %message,
                    "Gateway quota exceeded, retrying on fallback model"
                );
                let mut retry = request;
                retry.model = fallback.to_string();
                retry.max_tokens = (retry.max_tokens / 2).max(1);
                self.send(&retry).await
            }
            other => other,
        }
    }

    /// One system + user exchange returning the reply text
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = self.request(vec![ChatMessage::system(system), ChatMessage::user(user)]);
        let response = self.chat(request).await?;
        require_content(response)
    }

    /// Ask the vision model about a PNG screenshot
    pub async fn complete_with_image(&self, system: &str, text: &str, base64_png: &str) -> Result<String> {
        let request = ChatRequest::new(
            self.config.vision_model.clone(),
            vec![
                ChatMessage::system(system),
                ChatMessage::user_with_image(text, base64_png),
            ],
            VISION_MAX_TOKENS,
            VISION_TEMPERATURE,
        );
        let response = self.chat(request).await?;
        require_content(response)
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("OPENROUTER_API_KEY is not set".to_string()))?;

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            max_tokens = request.max_tokens,
            "Sending gateway request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(request)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "Full gateway request payload");
        }

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!(url = %self.config.api_url, error = %e, "Gateway request failed (transport)");
                AppError::from(e)
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }
        // OpenRouter can report upstream failures inside a 200 body
        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
            return Err(classify_failure(status, &envelope_message(status, &envelope)));
        }

        let parsed: CompletionBody = serde_json::from_str(&body).map_err(|e| AppError::Gateway {
            status: status.as_u16(),
            message: format!("failed to parse response body: {e}"),
        })?;

        let model = parsed.model.unwrap_or_else(|| request.model.clone());
        if let Some(usage) = parsed.usage {
            self.usage
                .record(&model, usage.prompt_tokens, usage.completion_tokens)
                .await;
        }

        let choice = parsed.choices.into_iter().next().ok_or_else(|| AppError::Gateway {
            status: status.as_u16(),
            message: "response contained no choices".to_string(),
        })?;
        debug!(
            %model,
            tool_calls = choice.message.tool_calls.len(),
            "Received gateway response"
        );

        Ok(ChatResponse {
            model,
            content: choice.message.content,
            tool_calls: choice.message.tool_calls,
            usage: parsed.usage,
        })
    }
}

fn require_content(response: ChatResponse) -> Result<String> {
    response
        .content
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Gateway {
            status: 200,
            message: "empty or missing content in response".to_string(),
        })
}

fn envelope_message(status: StatusCode, envelope: &ErrorEnvelope) -> String {
    let code = envelope
        .error
        .code
        .as_ref()
        .map(|v| match v {
            Value::String(s) => format!(" [code={s}]"),
            other => format!(" [code={other}]"),
        })
        .unwrap_or_default();
    format!("HTTP {status}{code}: {}", envelope.error.message)
}

fn classify_failure(status: StatusCode, body: &str) -> AppError {
    let message = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope_message(status, &envelope),
        Err(_) => body.to_string(),
    };
    error!(%status, %message, "Gateway returned an error");

    if is_quota_error(status, &message) {
        AppError::QuotaExceeded(message)
    } else {
        AppError::Gateway {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn, text_completion, tool_call_completion, ScriptedGateway};
    use axum::http::StatusCode as S;
    use serde_json::json;

    async fn gateway(script: Vec<(S, Value)>, fallback: Option<&str>) -> (GatewayClient, ScriptedGateway) {
        let fake = ScriptedGateway::new(script);
        let base = spawn(fake.router()).await;
        let config = GatewayConfig {
            api_key: Some("sk-or-test".into()),
            api_url: format!("{base}/api/v1/chat/completions"),
            fallback_model: fallback.map(str::to_string),
            ..GatewayConfig::default()
        };
        (GatewayClient::new(config).unwrap(), fake)
    }

    #[tokio::test]
    async fn test_complete_sends_attribution_headers() {
        let (client, fake) = gateway(vec![text_completion("hello")], None).await;
        assert_eq!(client.complete("sys", "hi").await.unwrap(), "hello");

        let requests = fake.requests.lock().unwrap();
        let (headers, body) = &requests[0];
        assert_eq!(headers["authorization"], "Bearer sk-or-test");
        assert_eq!(headers["http-referer"], "http://localhost:8000");
        assert_eq!(headers["x-title"], "Wirefy");
        assert_eq!(body["model"], "openai/gpt-3.5-turbo");
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[tokio::test]
    async fn test_usage_is_recorded() {
        let (client, _) = gateway(vec![text_completion("a"), text_completion("b")], None).await;
        client.complete("s", "u").await.unwrap();
        client.complete("s", "u").await.unwrap();
        let snap = client.usage().snapshot().await;
        assert_eq!(snap.total_tokens, 40);
        assert_eq!(snap.models["openai/gpt-3.5-turbo"].requests, 2);
    }

    #[tokio::test]
    async fn test_tool_calls_are_parsed() {
        let (client, fake) = gateway(
            vec![tool_call_completion("call_1", "figma_get_image", json!({"file_key": "K", "node_id": "1:2"}))],
            None,
        )
        .await;
        let request = client
            .request(vec![ChatMessage::user("render it")])
            .with_tools(vec![json!({"type": "function", "function": {"name": "figma_get_image"}})]);
        let response = client.chat(request).await.unwrap();

        assert!(response.content.is_none());
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].arguments().unwrap()["node_id"], "1:2");
        assert_eq!(fake.request_bodies()[0]["tool_choice"], "auto");
    }

    #[tokio::test]
    async fn test_quota_error_without_fallback() {
        let (client, _) = gateway(
            vec![(S::PAYMENT_REQUIRED, json!({"error": {"message": "Insufficient credits", "code": 402}}))],
            None,
        )
        .await;
        let err = client.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded(ref m) if m.contains("Insufficient credits")));
    }

    #[tokio::test]
    async fn test_quota_error_retries_on_fallback() {
        let (client, fake) = gateway(
            vec![
                (
                    S::BAD_REQUEST,
                    json!({"error": {"message": "This request requires more credits, or fewer max_tokens"}}),
                ),
                text_completion("cheap answer"),
            ],
            Some("mistralai/mistral-7b-instruct"),
        )
        .await;

        assert_eq!(client.complete("s", "u").await.unwrap(), "cheap answer");
        let bodies = fake.request_bodies();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[1]["model"], "mistralai/mistral-7b-instruct");
        assert_eq!(bodies[1]["max_tokens"], 500);
    }

    #[tokio::test]
    async fn test_other_errors_are_gateway_errors() {
        let (client, _) = gateway(
            vec![(S::INTERNAL_SERVER_ERROR, json!({"error": {"message": "upstream exploded"}}))],
            Some("fallback/model"),
        )
        .await;
        let err = client.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, AppError::Gateway { status: 500, ref message } if message.contains("upstream exploded")));
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let (client, _) = gateway(vec![(S::OK, json!({"choices": []}))], None).await;
        let err = client.chat(client.request(vec![ChatMessage::user("x")])).await.unwrap_err();
        assert!(matches!(err, AppError::Gateway { ref message, .. } if message.contains("no choices")));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = GatewayClient::new(GatewayConfig::default()).unwrap();
        let err = client.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, AppError::Config(ref m) if m == "OPENROUTER_API_KEY is not set"));
    }

    #[tokio::test]
    async fn test_vision_request_shape() {
        let (client, fake) = gateway(vec![text_completion("# Plan")], None).await;
        client.complete_with_image("sys", "describe", "QUJD").await.unwrap();

        let body = &fake.request_bodies()[0];
        assert_eq!(body["model"], "openai/gpt-4o");
        assert_eq!(body["max_tokens"], 1500);
        let parts = &body["messages"][1]["content"];
        assert_eq!(parts[0], json!({"type": "text", "text": "describe"}));
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,QUJD");
    }

    #[test]
    fn test_quota_detection() {
        assert!(is_quota_error(StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(is_quota_error(StatusCode::BAD_REQUEST, "You exceeded your current quota"));
        assert!(!is_quota_error(StatusCode::BAD_REQUEST, "invalid model"));
    }

    #[test]
    fn test_tool_message_serialization() {
        let msg = ChatMessage::tool("call_9", "{}");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_9");
        assert!(v.get("tool_calls").is_none());
    }
}
