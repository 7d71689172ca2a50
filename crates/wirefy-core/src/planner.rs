//! Markdown output
//!
//! Writes generated plans and analyses to disk. Plans go to the plans
//! directory with a timestamped base name; analyses go to the output
//! directory keyed by file key and component id.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::info;

use crate::error::{AppError, Result};
use crate::figma::ComponentInfo;
use crate::prompts::snake_case;

const IMPLEMENTATION_MARKER: &str = "### Implementation Plan";
const TASK_MARKER: &str = "### Task";

/// Paths written by [`PlanWriter::save_plan`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedFiles {
    pub complete: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation_plan: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<PathBuf>,
}

impl SavedFiles {
    pub fn paths(&self) -> Vec<&Path> {
        std::iter::once(self.complete.as_path())
            .chain(self.implementation_plan.as_deref())
            .chain(self.task.as_deref())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PlanWriter {
    plans_dir: PathBuf,
    output_dir: PathBuf,
}

impl PlanWriter {
    pub fn new(plans_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            plans_dir: plans_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn plans_dir(&self) -> &Path {
        &self.plans_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Resolve a caller-supplied directory under the output directory
    ///
    /// Only plain relative paths are accepted; absolute paths and `..`
    /// components fail with [`AppError::InvalidArguments`].
    pub fn output_subdir(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        if path.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
            return Err(AppError::InvalidArguments(format!(
                "out_dir must be a relative path inside the output directory: {relative}"
            )));
        }
        Ok(self.output_dir.join(path))
    }

    /// Save a generated plan
    ///
    /// Always writes `<base>_complete.md`. When the plan has both an
    /// implementation section and a task section it is also split into
    /// `<base>_implementation_plan.md` and `<base>_task.md`.
    pub async fn save_plan(
        &self,
        info: &ComponentInfo,
        file_key: &str,
        component_id: &str,
        plan: &str,
        now: NaiveDateTime,
    ) -> Result<SavedFiles> {
        create_dir(&self.plans_dir).await?;
        let base = format!("{}_{}", snake_case(&info.name), now.format("%Y%m%d_%H%M%S"));

        let complete = self.plans_dir.join(format!("{base}_complete.md"));
        let header = format!(
            "# Implementation Plan for {name}\n\n\
             ## Component Information\n\
             - **File Key**: {file_key}\n\
             - **Component ID**: {component_id}\n\
             - **Generated**: {generated}\n\n",
            name = info.name,
            generated = now.format("%Y-%m-%d %H:%M:%S"),
        );
        write_file(&complete, &format!("{header}{plan}")).await?;

        let mut saved = SavedFiles {
            complete,
            implementation_plan: None,
            task: None,
        };

        if let Some((implementation, task)) = split_plan(plan) {
            let implementation_path = self.plans_dir.join(format!("{base}_implementation_plan.md"));
            write_file(
                &implementation_path,
                &format!(
                    "# Implementation Plan: {}\n\nGenerated from Figma component: {file_key}:{component_id}\n\n{implementation}",
                    info.name
                ),
            )
            .await?;

            let task_path = self.plans_dir.join(format!("{base}_task.md"));
            write_file(&task_path, &format!("# Task: Implement {}\n\n{task}", info.name)).await?;

            saved.implementation_plan = Some(implementation_path);
            saved.task = Some(task_path);
        }

        info!(files = saved.paths().len(), base = %base, "Saved implementation plan");
        Ok(saved)
    }

    /// Write an analysis document to `<output_dir>/<file_key>_<id>.md`
    pub async fn save_analysis(&self, file_key: &str, component_id: &str, markdown: &str) -> Result<PathBuf> {
        create_dir(&self.output_dir).await?;
        let path = self
            .output_dir
            .join(format!("{file_key}_{}.md", component_id.replace(':', "-")));
        write_file(&path, markdown).await?;
        info!(path = %path.display(), "Saved analysis");
        Ok(path)
    }

    /// Write the vision pipeline's document to `<dir>/initial_plan.md`
    pub async fn save_initial_plan(&self, dir: &Path, markdown: &str) -> Result<PathBuf> {
        create_dir(dir).await?;
        let path = dir.join("initial_plan.md");
        write_file(&path, markdown).await?;
        info!(path = %path.display(), "Saved initial plan");
        Ok(path)
    }
}

/// Split at the first task heading, if the plan has both sections
fn split_plan(plan: &str) -> Option<(&str, &str)> {
    if !plan.contains(IMPLEMENTATION_MARKER) {
        return None;
    }
    let at = plan.find(TASK_MARKER)?;
    Some(plan.split_at(at))
}

/// Analysis document for a component
pub fn render_analysis_markdown(info: &ComponentInfo, analysis: &str) -> String {
    let structure =
        serde_json::to_string_pretty(&info.children).unwrap_or_else(|_| "[]".to_string());
    let image = if info.image_url.is_empty() {
        "No image available"
    } else {
        info.image_url.as_str()
    };

    format!(
        "# {name}\n\n\
         ## Summary\n\
         - **Type**: {kind}\n\
         - **Component ID**: {id}\n\
         - **Child elements**: {count}\n\n\
         ## Design Analysis\n\n{analysis}\n\n\
         ## Design Tokens\n\n{tokens}\n\
         ## Component Structure\n\n```json\n{structure}\n```\n\n\
         ## Image Reference\n\n{image}\n",
        name = info.name,
        kind = info.node_type,
        id = info.id,
        count = info.child_count(),
        tokens = info.tokens.to_markdown(),
    )
}

async fn create_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::Io(format!("Failed to create directory {}: {e}", dir.display())))
}

async fn write_file(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| AppError::Io(format!("Failed to write {}: {e}", path.display())))
}
