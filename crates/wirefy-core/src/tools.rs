//! MCP tool registry
//!
//! Tools are what the MCP endpoint advertises through `tools/list` and what
//! the agent offers the model as callable functions. The built-in set wraps
//! the Figma REST client.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::figma::FigmaClient;
use crate::figma_link::{format_share_link, parse_url, to_api_node_id};
use crate::protocol::ToolDefinition;

/// A callable tool
#[async_trait]
pub trait McpTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, args: Value) -> Result<Value>;
}

/// Ordered collection of tools, cheap to clone
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn McpTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in Figma tool
    pub fn with_figma(figma: FigmaClient) -> Self {
        let mut registry = Self::new();
        registry.register(ParseLinkTool);
        registry.register(GetFileTool { figma: figma.clone() });
        registry.register(GetComponentTool { figma: figma.clone() });
        registry.register(GetImageTool { figma: figma.clone() });
        registry.register(ExtractComponentInfoTool { figma: figma.clone() });
        registry.register(DesignContextTool { figma });
        registry
    }

    /// Add a tool; a tool with the same name replaces the earlier one
    pub fn register<T: McpTool + 'static>(&mut self, tool: T) {
        let name = tool.definition().name;
        self.tools.retain(|t| t.definition().name != name);
        self.tools.push(Arc::new(tool));
    }

    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.definition().name).collect()
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub async fn call(&self, name: &str, args: Value) -> Result<Value> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.definition().name == name)
            .ok_or_else(|| AppError::UnknownTool(name.to_string()))?;

        debug!(tool = name, %args, "Calling tool");
        let result = tool.call(args).await;
        match &result {
            Ok(_) => info!(tool = name, "Tool call succeeded"),
            Err(e) => info!(tool = name, error = %e, "Tool call failed"),
        }
        result
    }

    /// Definitions in the gateway's `tools` array shape
    pub fn openai_tools(&self) -> Vec<Value> {
        self.list()
            .into_iter()
            .map(|def| {
                json!({
                    "type": "function",
                    "function": {
                        "name": def.name,
                        "description": def.description,
                        "parameters": def.input_schema,
                    }
                })
            })
            .collect()
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::InvalidArguments(format!("missing required string argument '{key}'")))
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn file_key_prop() -> Value {
    json!({"type": "string", "description": "Figma file key from the share link"})
}

/// Parse a share link into file key and node id
pub struct ParseLinkTool;

#[async_trait]
impl McpTool for ParseLinkTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "parse_figma_link".into(),
            description: "Extract the file key and node id from a Figma share link".into(),
            input_schema: object_schema(
                json!({"figma_link": {"type": "string", "description": "Full Figma share link"}}),
                &["figma_link"],
            ),
        }
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let link = required_str(&args, "figma_link")?;
        Ok(serde_json::to_value(parse_url(link))?)
    }
}

/// Fetch a whole file
pub struct GetFileTool {
    figma: FigmaClient,
}

#[async_trait]
impl McpTool for GetFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "figma_get_file".into(),
            description: "Get a Figma file by key".into(),
            input_schema: object_schema(json!({"file_key": file_key_prop()}), &["file_key"]),
        }
    }

    async fn call(&self, args: Value) -> Result<Value> {
        self.figma.get_file(required_str(&args, "file_key")?).await
    }
}

/// Raw node data for one component
pub struct GetComponentTool {
    figma: FigmaClient,
}

#[async_trait]
impl McpTool for GetComponentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "figma_get_component".into(),
            description: "Get a specific component from Figma".into(),
            input_schema: object_schema(
                json!({
                    "file_key": file_key_prop(),
                    "component_id": {"type": "string", "description": "Node id, e.g. 38:2 or 38-2"}
                }),
                &["file_key", "component_id"],
            ),
        }
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let file_key = required_str(&args, "file_key")?;
        let component_id = required_str(&args, "component_id")?;
        self.figma.get_nodes(file_key, &[component_id]).await
    }
}

/// Rendered image URL for a node
pub struct GetImageTool {
    figma: FigmaClient,
}

#[async_trait]
impl McpTool for GetImageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "figma_get_image".into(),
            description: "Get image URL for a node".into(),
            input_schema: object_schema(
                json!({
                    "file_key": file_key_prop(),
                    "node_id": {"type": "string", "description": "Node id, e.g. 38:2 or 38-2"}
                }),
                &["file_key", "node_id"],
            ),
        }
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let file_key = required_str(&args, "file_key")?;
        let node_id = required_str(&args, "node_id")?;
        let image_url = self.figma.get_image_url(file_key, node_id).await?;
        Ok(json!({"node_id": node_id, "image_url": image_url}))
    }
}

/// Structured component summary
pub struct ExtractComponentInfoTool {
    figma: FigmaClient,
}

#[async_trait]
impl McpTool for ExtractComponentInfoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "figma_extract_component_info".into(),
            description: "Extract structured information from a component".into(),
            input_schema: object_schema(
                json!({
                    "file_key": file_key_prop(),
                    "component_id": {"type": "string", "description": "Node id, e.g. 38:2 or 38-2"}
                }),
                &["file_key", "component_id"],
            ),
        }
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let file_key = required_str(&args, "file_key")?;
        let component_id = required_str(&args, "component_id")?;
        let info = self.figma.extract_component_info(file_key, component_id).await?;
        Ok(serde_json::to_value(info)?)
    }
}

/// Component summary plus rendered design tokens, addressed by link or ids
pub struct DesignContextTool {
    figma: FigmaClient,
}

impl DesignContextTool {
    fn resolve_target(args: &Value) -> Result<(String, String)> {
        if let Ok(link) = required_str(args, "figma_link") {
            let parsed = parse_url(link);
            return match (parsed.file_key, parsed.node_id) {
                (Some(key), Some(node)) => Ok((key, node)),
                (None, _) => Err(AppError::InvalidLink("Could not extract file key from link".into())),
                (_, None) => Err(AppError::InvalidLink(
                    "Could not extract component ID from link".into(),
                )),
            };
        }

        let file_key = required_str(args, "file_key")?;
        let node_id = required_str(args, "node_id")
            .or_else(|_| required_str(args, "frame_id"))
            .map_err(|_| {
                AppError::InvalidArguments(
                    "provide either 'figma_link' or 'file_key' with 'node_id'".into(),
                )
            })?;
        Ok((file_key.to_string(), to_api_node_id(node_id)))
    }
}

#[async_trait]
impl McpTool for DesignContextTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_design_context".into(),
            description: "Extract structured design data (layout, children, design tokens) from a Figma frame".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "figma_link": {"type": "string", "description": "Figma share link with a node-id"},
                    "file_key": file_key_prop(),
                    "node_id": {"type": "string", "description": "ID of the Figma frame"}
                }
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let (file_key, node_id) = Self::resolve_target(&args)?;
        let info = self.figma.extract_component_info(&file_key, &node_id).await?;
        let tokens_markdown = info.tokens.to_markdown();
        Ok(json!({
            "share_link": format_share_link(&file_key, Some(&node_id)),
            "component": info,
            "design_tokens_markdown": tokens_markdown,
        }))
    }
}
