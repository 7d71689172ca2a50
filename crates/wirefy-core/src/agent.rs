//! Design agent
//!
//! Orchestrates the pipelines that turn a Figma share link into something a
//! developer can build from: a component analysis, an implementation plan,
//! or a screenshot-based design document. Free-form requests go either to a
//! plain completion or to the tool-calling loop.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::events::{NoOpEventSink, SharedSink};
use crate::figma::{ComponentInfo, FigmaClient};
use crate::figma_link::{extract_link_from_text, parse_url, ParsedLink};
use crate::gateway::{ChatMessage, GatewayClient};
use crate::planner::{render_analysis_markdown, PlanWriter, SavedFiles};
use crate::prompts::{
    format_analysis_prompt, format_planning_prompt, ANALYSIS_SYSTEM_PROMPT,
    GENERAL_ASSISTANT_PROMPT, PLANNING_AGENT_PROMPT, TOOL_AGENT_PROMPT, VISION_AGENT_PROMPT,
    VISION_USER_PROMPT,
};
use crate::token_budget::fit_to_budget;
use crate::tools::ToolRegistry;

pub const DEFAULT_MAX_ROUNDS: usize = 4;

pub const MISSING_FILE_KEY: &str = "Could not extract file key from link";
pub const MISSING_COMPONENT_ID: &str =
    "Could not extract component ID from link. Make sure you're sharing a specific component.";

/// Result of the analysis pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub component: ComponentInfo,
    pub analysis: String,
    pub markdown: String,
    pub saved_to: PathBuf,
    pub tools_used: Vec<String>,
}

/// Result of the planning pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub component: ComponentInfo,
    pub plan: String,
    pub saved_files: SavedFiles,
}

/// Result of the screenshot pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionPlan {
    pub markdown: String,
    pub path: PathBuf,
}

/// Split a share link into `(file_key, node_id)`, both required
pub fn resolve_link(link: &str) -> Result<(String, String)> {
    let parsed = parse_url(link);
    let file_key = parsed
        .file_key
        .ok_or_else(|| AppError::InvalidLink(MISSING_FILE_KEY.to_string()))?;
    let node_id = parsed
        .node_id
        .ok_or_else(|| AppError::InvalidLink(MISSING_COMPONENT_ID.to_string()))?;
    Ok((file_key, node_id))
}

#[derive(Clone)]
pub struct DesignAgent {
    figma: FigmaClient,
    tools: ToolRegistry,
    gateway: GatewayClient,
    writer: PlanWriter,
    events: SharedSink,
    prompt_budget: u64,
}

impl DesignAgent {
    pub fn new(figma: FigmaClient, gateway: GatewayClient, writer: PlanWriter) -> Self {
        let prompt_budget = gateway.config().prompt_token_budget;
        Self {
            tools: ToolRegistry::with_figma(figma.clone()),
            figma,
            gateway,
            writer,
            events: Arc::new(NoOpEventSink),
            prompt_budget,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let figma = FigmaClient::from_config(&config.figma)?;
        let gateway = GatewayClient::new(config.gateway.clone())?;
        let writer = PlanWriter::new(&config.output.plans_dir, &config.output.output_dir);
        Ok(Self::new(figma, gateway, writer))
    }

    pub fn with_events(mut self, events: SharedSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_prompt_budget(mut self, budget: u64) -> Self {
        self.prompt_budget = budget;
        self
    }

    pub fn figma(&self) -> &FigmaClient {
        &self.figma
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    pub fn writer(&self) -> &PlanWriter {
        &self.writer
    }

    pub fn parse_link(&self, link: &str) -> Result<ParsedLink> {
        let parsed = parse_url(link);
        if !parsed.is_valid {
            return Err(AppError::InvalidLink(MISSING_FILE_KEY.to_string()));
        }
        Ok(parsed)
    }

    /// Fetch, ask the gateway for an analysis, and save the document
    pub async fn analyze_component(&self, file_key: &str, component_id: &str) -> Result<Analysis> {
        let component = self.figma.extract_component_info(file_key, component_id).await?;

        let prompt = format_analysis_prompt(&component, self.prompt_budget);
        let analysis = self.gateway.complete(ANALYSIS_SYSTEM_PROMPT, &prompt).await?;

        let markdown = render_analysis_markdown(&component, &analysis);
        let saved_to = self.writer.save_analysis(file_key, component_id, &markdown).await?;
        self.events.emit_plan_saved(&saved_to).await;

        Ok(Analysis {
            component,
            analysis,
            markdown,
            saved_to,
            tools_used: vec![
                "figma_extract_component_info".to_string(),
                "gateway_analysis".to_string(),
            ],
        })
    }

    /// Fetch, ask the gateway for a plan, and save the plan files
    pub async fn generate_plan(&self, file_key: &str, component_id: &str) -> Result<Plan> {
        let component = self.figma.extract_component_info(file_key, component_id).await?;

        let prompt = format_planning_prompt(&component, self.prompt_budget);
        let plan = self.gateway.complete(PLANNING_AGENT_PROMPT, &prompt).await?;

        let saved_files = self
            .writer
            .save_plan(&component, file_key, component_id, &plan, Local::now().naive_local())
            .await?;
        for path in saved_files.paths() {
            self.events.emit_plan_saved(path).await;
        }

        Ok(Plan {
            component,
            plan,
            saved_files,
        })
    }

    /// Screenshot the node and have the vision model describe it
    ///
    /// The document is saved as `initial_plan.md` under `out_dir`, or under
    /// the output directory when none is given.
    pub async fn analyze_vision(
        &self,
        file_key: &str,
        node_id: &str,
        out_dir: Option<&Path>,
    ) -> Result<VisionPlan> {
        let screenshot = self.figma.render_png_base64(file_key, node_id).await?;
        info!(file_key, node_id, "Sending screenshot to vision model");

        let markdown = self
            .gateway
            .complete_with_image(VISION_AGENT_PROMPT, VISION_USER_PROMPT, &screenshot)
            .await?;

        let dir = out_dir.unwrap_or_else(|| self.writer.output_dir());
        let path = self.writer.save_initial_plan(dir, &markdown).await?;
        self.events.emit_plan_saved(&path).await;
        Ok(VisionPlan { markdown, path })
    }

    pub async fn general_query(&self, query: &str) -> Result<String> {
        let prompt = fit_to_budget(query, self.prompt_budget);
        self.gateway.complete(GENERAL_ASSISTANT_PROMPT, &prompt).await
    }

    /// Route free text to the matching pipeline and render the result
    pub async fn run(&self, input: &str) -> Result<String> {
        let Some(link) = extract_link_from_text(input) else {
            return self.general_query(input).await;
        };

        let lower = input.to_lowercase();
        if lower.contains("parse") {
            let parsed = self.parse_link(&link)?;
            return Ok(render_parsed(&parsed));
        }

        let (file_key, node_id) = resolve_link(&link)?;
        if lower.contains("vision") || lower.contains("screenshot") {
            let vision = self.analyze_vision(&file_key, &node_id, None).await?;
            return Ok(format!(
                "{}\n\n_Saved to {}_\n",
                vision.markdown,
                vision.path.display()
            ));
        }
        if lower.contains("analyze") {
            let analysis = self.analyze_component(&file_key, &node_id).await?;
            return Ok(render_analysis(&analysis));
        }
        if ["plan", "implement", "generate"].iter().any(|k| lower.contains(k)) {
            let plan = self.generate_plan(&file_key, &node_id).await?;
            return Ok(render_plan(&plan));
        }

        let analysis = self.analyze_component(&file_key, &node_id).await?;
        Ok(render_analysis(&analysis))
    }

    /// Let the model call Figma tools until it produces an answer
    ///
    /// Fails with [`AppError::Other`] when the model still wants tools after
    /// `max_rounds` rounds of tool execution.
    pub async fn run_with_tools(&self, prompt: &str, max_rounds: usize) -> Result<String> {
        let tools = self.tools.openai_tools();
        let mut messages = vec![
            ChatMessage::system(TOOL_AGENT_PROMPT),
            ChatMessage::user(fit_to_budget(prompt, self.prompt_budget)),
        ];
        let mut rounds = 0;

        loop {
            let request = self.gateway.request(messages.clone()).with_tools(tools.clone());
            let response = self.gateway.chat(request).await?;

            if response.tool_calls.is_empty() {
                return Ok(response.content.unwrap_or_default());
            }
            if rounds == max_rounds {
                warn!(max_rounds, "Tool loop did not converge");
                return Err(AppError::Other(format!(
                    "model still requested tools after {max_rounds} rounds"
                )));
            }
            rounds += 1;
            debug!(round = rounds, calls = response.tool_calls.len(), "Executing tool calls");

            messages.push(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let content = self.execute_tool_call(&call.function.name, call.arguments()).await;
                messages.push(ChatMessage::tool(call.id.clone(), content));
            }
        }
    }

    async fn execute_tool_call(&self, name: &str, arguments: Result<Value>) -> String {
        let outcome = match arguments {
            Ok(args) => {
                self.events.emit_tool_called(name, &args).await;
                self.tools.call(name, args).await
            }
            Err(e) => {
                self.events.emit_tool_called(name, &Value::Null).await;
                Err(e)
            }
        };
        self.events.emit_tool_finished(name, outcome.is_ok()).await;

        match outcome {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                fit_to_budget(&text, self.prompt_budget)
            }
            Err(e) => json!({ "error": e.to_string() }).to_string(),
        }
    }
}

fn render_parsed(parsed: &ParsedLink) -> String {
    format!(
        "## Parsed Figma Link\n\n- **File Key**: `{}`\n- **Node ID**: `{}`\n",
        parsed.file_key.as_deref().unwrap_or("-"),
        parsed.node_id.as_deref().unwrap_or("not present"),
    )
}

fn render_analysis(analysis: &Analysis) -> String {
    format!(
        "{}\n_Saved to {}_\n",
        analysis.markdown,
        analysis.saved_to.display()
    )
}

fn render_plan(plan: &Plan) -> String {
    let c = &plan.component;
    let files = plan
        .saved_files
        .paths()
        .iter()
        .map(|p| format!("- {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "## Implementation Plan for {name}\n\n{body}\n\n### Component Summary\n\
         - **Name:** {name}\n\
         - **Type:** {kind}\n\
         - **Elements:** {count}\n\n\
         ### Saved Files\n{files}\n",
        name = c.name,
        body = plan.plan,
        kind = c.node_type,
        count = c.child_count(),
    )
}
