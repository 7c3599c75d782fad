//! Plan artifacts and revision control.
//!
//! A plan is an immutable, revision-numbered JSON artifact. Revising never
//! edits in place: the controller clears the approval marker first, then
//! writes a new artifact at revision k+1. That ordering guarantees a crash
//! between the two steps leaves the run unapproved rather than approved
//! against a plan that no longer exists.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::approval::ApprovalGate;
use crate::audit::{AuditEvent, AuditLog};
use crate::config::Layout;
use crate::errors::{GenerateError, PipelineError};
use crate::scope::{ScopeAnalysis, Tier};
use crate::util::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanArtifact {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    /// 0 for the original plan, k+1 for each revision.
    pub revision_index: u32,
    /// Human-readable conversion plan presented at the approval gate.
    pub source_text: String,
    pub is_revision: bool,
}

impl PlanArtifact {
    pub fn save(&self, layout: &Layout) -> Result<()> {
        let path = layout.plan_file(&self.run_id, self.revision_index);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize plan")?;
        write_atomic(&path, &json)
    }

    /// Highest-revision plan for the run, or None if never planned.
    pub fn load_latest(layout: &Layout, run_id: &str) -> Result<Option<PlanArtifact>> {
        let dir = layout.plans_dir();
        if !dir.exists() {
            return Ok(None);
        }
        let mut latest: Option<PlanArtifact> = None;
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to list plans dir: {}", dir.display()))?
        {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(&format!("{run_id}-plan-rev")) || !name.ends_with(".json") {
                continue;
            }
            let artifact = Self::load(&path)?;
            if latest
                .as_ref()
                .map(|l| artifact.revision_index > l.revision_index)
                .unwrap_or(true)
            {
                latest = Some(artifact);
            }
        }
        Ok(latest)
    }

    fn load(path: &Path) -> Result<PlanArtifact> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plan: {}", path.display()))
    }
}

/// Seam for plan generation backends.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn generate(&self, analysis: &ScopeAnalysis) -> Result<String, GenerateError>;

    /// Produce a revised plan from the prior text plus reviewer feedback.
    async fn revise(
        &self,
        analysis: &ScopeAnalysis,
        prior_text: &str,
        feedback: &str,
    ) -> Result<String, GenerateError>;
}

/// Default planner: a deterministic tier-by-tier outline built from the
/// analysis alone. Good enough to review and approve without any
/// generation backend configured.
pub struct TemplatePlanner;

#[async_trait]
impl Planner for TemplatePlanner {
    async fn generate(&self, analysis: &ScopeAnalysis) -> Result<String, GenerateError> {
        let mut text = format!(
            "# Conversion plan: {}\n\nFeature root: {}\nArtifacts: {}\n",
            analysis.feature_name,
            analysis.feature_root,
            analysis.nodes.len()
        );
        for tier in [Tier::Database, Tier::Backend, Tier::Frontend] {
            let nodes: Vec<_> = analysis.nodes_in_tier(tier).collect();
            if nodes.is_empty() {
                continue;
            }
            text.push_str(&format!("\n## Tier {} ({tier})\n", tier.letter()));
            for (i, node) in nodes.iter().enumerate() {
                text.push_str(&format!(
                    "- Step {}{}: convert {} ({} bytes)\n",
                    tier.letter(),
                    i + 1,
                    node.rel_path,
                    node.size_bytes
                ));
            }
        }
        Ok(text)
    }

    async fn revise(
        &self,
        analysis: &ScopeAnalysis,
        _prior_text: &str,
        feedback: &str,
    ) -> Result<String, GenerateError> {
        let mut text = self.generate(analysis).await?;
        text.push_str(&format!("\n## Reviewer feedback incorporated\n{feedback}\n"));
        Ok(text)
    }
}

/// Drives plan revision atomically with respect to the approval gate.
pub struct PlanRevisionController<'a> {
    layout: &'a Layout,
    gate: &'a ApprovalGate,
}

impl<'a> PlanRevisionController<'a> {
    pub fn new(layout: &'a Layout, gate: &'a ApprovalGate) -> Self {
        Self { layout, gate }
    }

    pub async fn revise(
        &self,
        run_id: &str,
        analysis: &ScopeAnalysis,
        planner: &dyn Planner,
        feedback: &str,
    ) -> Result<PlanArtifact, PipelineError> {
        let prior = PlanArtifact::load_latest(self.layout, run_id)?.ok_or_else(|| {
            PipelineError::NoPlanToRevise {
                run_id: run_id.to_string(),
            }
        })?;

        // Approval dies before the new plan is born. A crash in between
        // leaves a still-valid prior plan that simply needs re-approval.
        if self.gate.revoke()? {
            tracing::info!(run_id, "cleared approval for superseded plan");
        }

        let text = planner
            .revise(analysis, &prior.source_text, feedback)
            .await
            .map_err(|source| PipelineError::Generation {
                run_id: run_id.to_string(),
                step_id: format!("plan-rev{}", prior.revision_index + 1),
                source,
            })?;

        let revised = PlanArtifact {
            run_id: run_id.to_string(),
            generated_at: Utc::now(),
            revision_index: prior.revision_index + 1,
            source_text: text,
            is_revision: true,
        };
        revised.save(self.layout)?;
        AuditLog::new(self.layout.audit_log(run_id), run_id).append(AuditEvent::PlanRevised {
            revision_index: revised.revision_index,
        })?;
        tracing::info!(
            run_id,
            revision = revised.revision_index,
            "wrote revised plan"
        );
        Ok(revised)
    }
}
