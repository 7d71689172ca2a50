//! Wirefy Core Library
//!
//! Turns Figma designs into implementation plans. This crate holds
//! everything independent of the HTTP backend and the CLI: the Figma client,
//! the LLM gateway client, the MCP server and client, and the agent that
//! ties them together.
//!
//! # Modules
//!
//! - [`figma_link`] - Share-link parsing
//! - [`figma`] - Figma REST client and component summaries
//! - [`tokens`] - Design token extraction
//! - [`protocol`] - JSON-RPC / MCP wire types
//! - [`tools`] - MCP tool registry
//! - [`mcp_server`] - MCP dispatcher over the registry
//! - [`mcp_client`] - Streamable HTTP MCP client
//! - [`gateway`] - OpenRouter chat-completions client
//! - [`token_budget`] - Prompt budgeting and usage accounting
//! - [`prompts`] - Agent prompt templates
//! - [`planner`] - Markdown output
//! - [`agent`] - Design agent pipelines and tool loop
//! - [`bridge`] - HTTP client for a running backend
//! - [`events`] - Event sink trait for progress reporting
//! - [`config`] - Environment configuration
//! - [`error`] - Error types

pub mod agent;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod figma;
pub mod figma_link;
pub mod gateway;
pub mod mcp_client;
pub mod mcp_server;
pub mod planner;
pub mod prompts;
pub mod protocol;
pub mod token_budget;
pub mod tokens;
pub mod tools;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use agent::{resolve_link, Analysis, DesignAgent, Plan, VisionPlan, DEFAULT_MAX_ROUNDS};
pub use bridge::{BackendBridge, BridgeResult};
pub use config::Config;
pub use error::{AppError, Result};
pub use events::{EventSink, NoOpEventSink, SharedSink, StdoutEventSink};
pub use figma::{ComponentInfo, FigmaClient};
pub use figma_link::{parse_url, ParsedLink};
pub use gateway::GatewayClient;
pub use mcp_client::McpClient;
pub use mcp_server::{DispatchOutcome, McpDispatcher};
pub use planner::{PlanWriter, SavedFiles};
pub use protocol::{Direction, LogEntry, ToolDefinition};
pub use token_budget::{UsageLedger, UsageSnapshot};
pub use tools::{McpTool, ToolRegistry};
