//! Backend bridge client
//!
//! Lets another service drive a running Wirefy backend over HTTP. Results are
//! always returned as a [`BridgeResult`]; transport and backend failures
//! become `success: false` with an `error` message.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::defaults::DEFAULT_BACKEND_URL;
use crate::error::{AppError, Result};

const PLAN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
}

impl BridgeResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendBridge {
    client: Client,
    backend_url: String,
}

impl BackendBridge {
    pub fn new(backend_url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Http(format!("Failed to create HTTP client: {e}")))?;
        let backend_url = backend_url
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self { client, backend_url })
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    /// Ask the backend for an implementation plan
    pub async fn analyze_figma_link(&self, figma_link: &str) -> BridgeResult {
        match self
            .post("/generate-plan-from-link", figma_link, Some(PLAN_TIMEOUT))
            .await
        {
            Ok(result) => BridgeResult {
                success: true,
                component_name: result
                    .pointer("/component/name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                plan: string_field(&result, "plan"),
                files: Some(result.get("saved_files").cloned().unwrap_or_else(|| json!({}))),
                message: Some("Analysis complete".to_string()),
                ..BridgeResult::default()
            },
            Err(e) => BridgeResult::failure(e.to_string()),
        }
    }

    /// Validate the link, then fetch the component analysis
    pub async fn get_component_info(&self, figma_link: &str) -> BridgeResult {
        let parsed = match self.post("/parse-figma-link", figma_link, None).await {
            Ok(parsed) => parsed,
            Err(e) => return BridgeResult::failure(e.to_string()),
        };
        if parsed.get("is_valid").and_then(Value::as_bool) != Some(true) {
            return BridgeResult::failure("Invalid Figma link");
        }

        match self.post("/analyze-from-link", figma_link, None).await {
            Ok(result) => BridgeResult {
                success: true,
                component_name: result
                    .pointer("/component_info/name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                component: result.get("component_info").cloned(),
                analysis: string_field(&result, "analysis"),
                markdown: string_field(&result, "markdown"),
                message: string_field(&result, "message"),
                ..BridgeResult::default()
            },
            Err(e) => BridgeResult::failure(e.to_string()),
        }
    }

    async fn post(&self, path: &str, figma_link: &str, timeout: Option<Duration>) -> Result<Value> {
        let url = format!("{}{path}", self.backend_url);
        debug!(%url, "Bridge request");

        let mut request = self.client.post(&url).json(&json!({ "figma_link": figma_link }));
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);

        if !status.is_success() || error.is_some() {
            warn!(%status, %url, "Backend returned an error");
            let message = error.unwrap_or(body);
            return Err(AppError::Other(format!("Error: {message}")));
        }
        Ok(value)
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}
