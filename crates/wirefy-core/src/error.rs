//! Application-wide error types
//!
//! This module defines a centralized error type using `thiserror` for
//! clean error handling across the library and the HTTP backend.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
///
/// Variants are serializable so the HTTP backend can hand them to
/// clients as JSON without a separate error envelope.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    /// The input is not a usable Figma share link
    #[error("Invalid Figma link: {0}")]
    InvalidLink(String),

    /// Figma REST API returned a non-success status
    #[error("Figma API error (HTTP {status}): {message}")]
    Figma { status: u16, message: String },

    /// LLM gateway returned a non-success status or an unusable body
    #[error("LLM gateway error (HTTP {status}): {message}")]
    Gateway { status: u16, message: String },

    /// LLM gateway refused the request because of credits or token limits
    #[error("LLM gateway quota exceeded: {0}")]
    QuotaExceeded(String),

    /// MCP peer answered with a JSON-RPC error or a malformed message
    #[error("MCP error: {0}")]
    Mcp(String),

    /// A tool call was attempted before the MCP handshake completed
    #[error("MCP session not initialized; call initialize first")]
    McpNotInitialized,

    /// No tool with this name is registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool arguments are missing or have the wrong shape
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transport-level HTTP failure (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// True when the failure happened on a remote service rather than locally
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AppError::Figma { .. } | AppError::Gateway { .. } | AppError::Mcp(_) | AppError::Http(_)
        )
    }
}

impl From<AppError> for String {
    fn from(error: AppError) -> String {
        error.to_string()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Http(format!("request timed out: {err}"))
        } else {
            Self::Http(err.to_string())
        }
    }
}
