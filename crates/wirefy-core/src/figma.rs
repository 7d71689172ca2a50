//! Figma REST client
//!
//! Covers the handful of endpoints the design pipeline needs: node lookup,
//! file lookup, image rendering, and image download. Node ids may be passed
//! in URL form (`38-2`) or API form (`38:2`).

use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::FigmaConfig;
use crate::error::{AppError, Result};
use crate::figma_link::to_api_node_id;
use crate::tokens::DesignTokens;

/// Children are outlined this many levels below the component root
const CHILD_DEPTH: usize = 3;

/// Summary of a node's descendants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildNode>,
}

/// Structured description of one Figma component or frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Component id as the caller supplied it
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub description: String,
    pub image_url: String,
    pub children: Vec<ChildNode>,
    #[serde(default)]
    pub components: Value,
    #[serde(default)]
    pub styles: Value,
    #[serde(default)]
    pub tokens: DesignTokens,
}

impl ComponentInfo {
    /// Number of direct children
    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// Thin client over `api.figma.com/v1`
#[derive(Debug, Clone)]
pub struct FigmaClient {
    client: Client,
    api_url: String,
    token: Option<String>,
}

impl FigmaClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &FigmaConfig) -> Result<Self> {
        Self::new(
            config.api_url.clone(),
            config.access_token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| AppError::Config("FIGMA_ACCESS_TOKEN is not set".to_string()))
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.api_url, path);
        debug!(%url, "Figma request");

        let response = self
            .client
            .get(&url)
            .header("X-Figma-Token", self.token()?)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            warn!(%status, %url, "Figma API returned an error");
            return Err(AppError::Figma {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(response.json::<Value>().await?)
    }

    /// `GET /files/{key}/nodes?ids=…`
    pub async fn get_nodes(&self, file_key: &str, ids: &[&str]) -> Result<Value> {
        let ids = ids.iter().map(|id| to_api_node_id(id)).collect::<Vec<_>>().join(",");
        self.get_json(&format!("/files/{file_key}/nodes"), &[("ids", ids)])
            .await
    }

    /// `GET /files/{key}` limited to the top two levels of the tree
    pub async fn get_file(&self, file_key: &str) -> Result<Value> {
        self.get_json(&format!("/files/{file_key}"), &[("depth", "2".to_string())])
            .await
    }

    /// `GET /images/{key}` — rendered image URLs keyed by API node id
    pub async fn get_image_urls(
        &self,
        file_key: &str,
        ids: &[&str],
        format: &str,
    ) -> Result<HashMap<String, Option<String>>> {
        let ids = ids.iter().map(|id| to_api_node_id(id)).collect::<Vec<_>>().join(",");
        let data = self
            .get_json(
                &format!("/images/{file_key}"),
                &[("ids", ids), ("format", format.to_string())],
            )
            .await?;

        if let Some(err) = data.get("err").and_then(Value::as_str) {
            return Err(AppError::Figma {
                status: 400,
                message: err.to_string(),
            });
        }

        let images = data
            .get("images")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string)))
                    .collect()
            })
            .unwrap_or_default();
        Ok(images)
    }

    /// Image URL for a single node, empty when Figma could not render it
    pub async fn get_image_url(&self, file_key: &str, node_id: &str) -> Result<String> {
        let api_id = to_api_node_id(node_id);
        let mut images = self.get_image_urls(file_key, &[&api_id], "png").await?;
        Ok(images.remove(&api_id).flatten().unwrap_or_default())
    }

    /// Download an absolute URL (rendered images live on a CDN, no token)
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Figma {
                status: status.as_u16(),
                message: format!("Failed to download image from {url}"),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Render a node to PNG and return it base64-encoded
    pub async fn render_png_base64(&self, file_key: &str, node_id: &str) -> Result<String> {
        let image_url = self.get_image_url(file_key, node_id).await?;
        if image_url.is_empty() {
            return Err(AppError::Figma {
                status: 404,
                message: format!("Unable to retrieve image URL for node {node_id}"),
            });
        }
        let bytes = self.download(&image_url).await?;
        info!(file_key, node_id, bytes = bytes.len(), "Downloaded node screenshot");
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Fetch a node and summarize it as a [`ComponentInfo`]
    pub async fn extract_component_info(
        &self,
        file_key: &str,
        component_id: &str,
    ) -> Result<ComponentInfo> {
        let api_id = to_api_node_id(component_id);
        info!(file_key, node_id = %api_id, "Fetching component");

        let data = self.get_nodes(file_key, &[&api_id]).await?;
        let node = data
            .get("nodes")
            .and_then(|n| n.get(&api_id))
            .filter(|n| !n.is_null())
            .ok_or_else(|| AppError::Figma {
                status: 404,
                message: format!("Node {api_id} not found in file {file_key}"),
            })?;

        let document = node.get("document").cloned().unwrap_or(Value::Null);

        let image_url = match self.get_image_url(file_key, &api_id).await {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Could not render component image");
                String::new()
            }
        };

        let info = component_info_from_node(component_id, node, &document, image_url);
        info!(name = %info.name, children = info.child_count(), "Found component");
        Ok(info)
    }
}

/// Build a [`ComponentInfo`] from a `/nodes` entry
pub fn component_info_from_node(
    component_id: &str,
    node: &Value,
    document: &Value,
    image_url: String,
) -> ComponentInfo {
    let str_field = |key: &str, default: &str| {
        document
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };

    ComponentInfo {
        id: component_id.to_string(),
        name: str_field("name", "Unknown"),
        node_type: str_field("type", "Unknown"),
        description: str_field("description", ""),
        image_url,
        children: outline_children(document, CHILD_DEPTH),
        components: node.get("components").cloned().unwrap_or_else(|| Value::Object(Default::default())),
        styles: node.get("styles").cloned().unwrap_or_else(|| Value::Object(Default::default())),
        tokens: DesignTokens::from_node(document),
    }
}

fn outline_children(node: &Value, depth: usize) -> Vec<ChildNode> {
    if depth == 0 {
        return Vec::new();
    }
    node.get("children")
        .and_then(Value::as_array)
        .map(|children| {
            children
                .iter()
                .map(|child| {
                    let field = |k: &str| child.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
                    ChildNode {
                        id: field("id"),
                        name: field("name"),
                        node_type: field("type"),
                        children: outline_children(child, depth - 1),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{figma_router, spawn};

    async fn client(with_token: bool) -> FigmaClient {
        let base = spawn(figma_router()).await;
        let token = with_token.then(|| "figd_test".to_string());
        FigmaClient::new(format!("{base}/v1"), token, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_extract_component_info() {
        let figma = client(true).await;
        let info = figma.extract_component_info("FILEKEY", "38-2").await.unwrap();

        assert_eq!(info.id, "38-2");
        assert_eq!(info.name, "Dashboard");
        assert_eq!(info.node_type, "FRAME");
        assert_eq!(info.child_count(), 2);
        assert_eq!(info.children[0].name, "Header");
        assert_eq!(info.children[1].children.len(), 1);
        assert!(info.image_url.ends_with("/cdn/38-2.png"));
        assert_eq!(info.tokens.texts, vec!["MCP SERVER".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_token_is_config_error() {
        let figma = client(false).await;
        let err = figma.extract_component_info("FILEKEY", "38:2").await.unwrap_err();
        assert!(matches!(err, AppError::Config(ref m) if m.contains("FIGMA_ACCESS_TOKEN")));
    }

    #[tokio::test]
    async fn test_unknown_node_is_404() {
        let figma = client(true).await;
        let err = figma.extract_component_info("FILEKEY", "9:9").await.unwrap_err();
        assert!(matches!(err, AppError::Figma { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_api_error_status_propagates() {
        let figma = client(true).await;
        let err = figma.get_nodes("FORBIDDEN", &["1:1"]).await.unwrap_err();
        assert!(matches!(err, AppError::Figma { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_render_png_base64() {
        let figma = client(true).await;
        let b64 = figma.render_png_base64("FILEKEY", "38:2").await.unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        assert_eq!(&decoded[..4], b"\x89PNG");
    }

    #[test]
    fn test_component_defaults() {
        let info = component_info_from_node("1:1", &Value::Null, &Value::Null, String::new());
        assert_eq!(info.name, "Unknown");
        assert_eq!(info.node_type, "Unknown");
        assert!(info.children.is_empty());
        assert!(info.components.is_object());
    }
}
