//! Event Sink Trait
//!
//! Progress reporting for agent runs and MCP traffic. The agent and the
//! MCP client emit events without knowing whether a terminal, an HTTP
//! handler, or a test is listening.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::protocol::{Direction, LogEntry};

/// Event sink for emitting progress events to listeners
#[async_trait]
pub trait EventSink: Send + Sync {
    /// A JSON-RPC message was sent or received
    async fn emit_log(&self, entry: &LogEntry);

    /// The agent is about to run a tool
    async fn emit_tool_called(&self, tool: &str, arguments: &serde_json::Value);

    /// A tool finished; `ok` is false when it returned an error
    async fn emit_tool_finished(&self, tool: &str, ok: bool);

    /// A markdown file was written
    async fn emit_plan_saved(&self, path: &Path);
}

/// Shared handle to a sink
pub type SharedSink = Arc<dyn EventSink>;

/// No-op event sink for tests and the HTTP backend
#[derive(Default, Clone)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit_log(&self, _entry: &LogEntry) {}
    async fn emit_tool_called(&self, _tool: &str, _arguments: &serde_json::Value) {}
    async fn emit_tool_finished(&self, _tool: &str, _ok: bool) {}
    async fn emit_plan_saved(&self, _path: &Path) {}
}

/// Stdout event sink for CLI mode - prints events to stderr so stdout stays
/// clean for the command's result
#[derive(Default, Clone)]
pub struct StdoutEventSink {
    /// Whether to print in JSON format
    pub json_output: bool,
}

impl StdoutEventSink {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }
}

#[async_trait]
impl EventSink for StdoutEventSink {
    async fn emit_log(&self, entry: &LogEntry) {
        if self.json_output {
            eprintln!("{}", serde_json::to_string(entry).unwrap_or_default());
        } else {
            let arrow = match entry.direction {
                Direction::In => "←",
                Direction::Out => "→",
            };
            eprintln!(
                "[{}] {} {} ({} tokens)",
                format_timestamp(entry.timestamp),
                arrow,
                entry.method.as_deref().unwrap_or("-"),
                entry.token_count
            );
        }
    }

    async fn emit_tool_called(&self, tool: &str, arguments: &serde_json::Value) {
        if self.json_output {
            eprintln!(
                "{}",
                serde_json::json!({"event": "tool_called", "tool": tool, "arguments": arguments})
            );
        } else {
            eprintln!("🔧 {tool} {arguments}");
        }
    }

    async fn emit_tool_finished(&self, tool: &str, ok: bool) {
        if self.json_output {
            eprintln!("{}", serde_json::json!({"event": "tool_finished", "tool": tool, "ok": ok}));
        } else if ok {
            eprintln!("✅ {tool} finished");
        } else {
            eprintln!("❌ {tool} failed");
        }
    }

    async fn emit_plan_saved(&self, path: &Path) {
        if self.json_output {
            eprintln!(
                "{}",
                serde_json::json!({"event": "plan_saved", "path": path.display().to_string()})
            );
        } else {
            eprintln!("💾 Saved {}", path.display());
        }
    }
}

fn format_timestamp(micros: u64) -> String {
    let millis = micros / 1000;
    let secs = millis / 1000;
    let mins = secs / 60;
    let hours = mins / 60;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        hours % 24,
        mins % 60,
        secs % 60,
        millis % 1000
    )
}
