//! Prompt rendering (spec §4.4).
//!
//! Templates are compiled once into a `minijinja::Environment` with
//! autoescape disabled — these prompts carry titles/descriptions
//! verbatim into an agent's context, not into HTML.

pub mod templates;

use crate::bead::{BeadDetail, NEEDS_HUMAN_LABEL};
use crate::{RalphError, Result};
use minijinja::{Environment, context};
use serde::Serialize;

/// Which of the four role-specific prompts to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Task,
    Epic,
    Verify,
    MergeResolution,
}

impl PromptKind {
    fn template_name(self) -> &'static str {
        match self {
            PromptKind::Task => "task",
            PromptKind::Epic => "epic",
            PromptKind::Verify => "verify",
            PromptKind::MergeResolution => "merge_resolution",
        }
    }
}

/// A child bead summary as surfaced to the `verify` template.
#[derive(Debug, Clone, Serialize)]
struct ChildSummary {
    id: String,
    title: String,
    status: String,
    needs_human: bool,
}

/// Renders the four role-specific agent prompts from bead data.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_name| minijinja::AutoEscape::None);
        env.add_template_owned("task", templates::TASK_TEMPLATE.to_string())?;
        env.add_template_owned("epic", templates::EPIC_TEMPLATE.to_string())?;
        env.add_template_owned("verify", templates::VERIFY_TEMPLATE.to_string())?;
        env.add_template_owned(
            "merge_resolution",
            templates::MERGE_RESOLUTION_TEMPLATE.to_string(),
        )?;
        Ok(Self { env })
    }

    /// Override one of the four default templates.
    pub fn with_template(mut self, kind: PromptKind, source: impl Into<String>) -> Result<Self> {
        self.env
            .add_template_owned(kind.template_name(), source.into())?;
        Ok(self)
    }

    /// Render the `task` prompt for a single bead.
    pub fn task_prompt(&self, bead: &BeadDetail) -> Result<String> {
        self.render(PromptKind::Task, context! { bead })
    }

    /// Render the `epic` prompt for an epic bead.
    pub fn epic_prompt(&self, bead: &BeadDetail) -> Result<String> {
        self.render(PromptKind::Epic, context! { bead })
    }

    /// Render the `verify` audit prompt, summarizing each child as the
    /// `OutcomeAssessor` would classify it.
    pub fn verify_prompt(&self, bead: &BeadDetail) -> Result<String> {
        let children: Vec<ChildSummary> = bead
            .dependents
            .iter()
            .filter(|d| d.dependency_type == "parent" || d.dependency_type == "child")
            .map(|d| ChildSummary {
                id: d.id.clone(),
                title: d.title.clone(),
                status: format!("{:?}", d.status).to_lowercase(),
                needs_human: d.is_open() && d.has_label(NEEDS_HUMAN_LABEL),
            })
            .collect();
        self.render(PromptKind::Verify, context! { bead, children })
    }

    /// Render the `merge-resolution` prompt for a conflicted merge.
    pub fn merge_resolution_prompt(
        &self,
        source_branch: &str,
        target_branch: &str,
        conflicting_files: &[String],
    ) -> Result<String> {
        self.render(
            PromptKind::MergeResolution,
            context! { source_branch, target_branch, conflicting_files },
        )
    }

    fn render(&self, kind: PromptKind, ctx: minijinja::Value) -> Result<String> {
        let tmpl = self.env.get_template(kind.template_name()).map_err(|e| {
            RalphError::Template(e)
        })?;
        tmpl.render(ctx).map_err(RalphError::Template)
    }
}
