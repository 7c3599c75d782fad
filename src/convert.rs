//! Conversion step execution.
//!
//! Steps run sequentially in plan order. Each step writes its output file
//! first and records its checkpoint second, so a crash between the two
//! replays an already-written step instead of skipping a missing one.
//! Outcome classification happens at the generation boundary: a leading
//! `AMBIGUOUS:` or `BLOCKED:` sentinel in the generated text marks a step
//! that needs human attention without failing the run.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audit::{AuditEvent, AuditLog};
use crate::checkpoint::{CheckpointEntry, CheckpointStore, Stage, StepStatus};
use crate::errors::{GenerateError, PipelineError};
use crate::scope::Tier;
use crate::util::write_atomic;

pub const AMBIGUOUS_PREFIX: &str = "AMBIGUOUS:";
pub const BLOCKED_PREFIX: &str = "BLOCKED:";

/// One unit of conversion work derived from the approved plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionStep {
    /// "Step A1", "Step B2", ...
    pub step_id: String,
    pub tier: Tier,
    /// Legacy artifact, relative to the feature root.
    pub source_ref: String,
    /// Output artifact, relative to the output root.
    pub target_ref: String,
    /// Which conversion mapping produced this step.
    pub mapping_id: String,
    pub rule_ids: Vec<String>,
}

/// Classified result of generating one step's output. All three variants
/// are terminal for the step: the checkpoint records `completed` either
/// way and the step is never retried on resume.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Clean conversion; `String` is the generated content.
    Written(String),
    /// The generator flagged a semantic ambiguity. Logged, no file written.
    Ambiguous { reason: String },
    /// Generation refused the step. Logged, no file written.
    Blocked { reason: String },
}

impl StepOutcome {
    /// Classify raw generated text by its leading sentinel, if any.
    pub fn decode(raw: &str) -> StepOutcome {
        let trimmed = raw.trim_start();
        if let Some(rest) = trimmed.strip_prefix(AMBIGUOUS_PREFIX) {
            return StepOutcome::Ambiguous {
                reason: first_line(rest),
            };
        }
        if let Some(rest) = trimmed.strip_prefix(BLOCKED_PREFIX) {
            return StepOutcome::Blocked {
                reason: first_line(rest),
            };
        }
        StepOutcome::Written(raw.to_string())
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Written(_) => "written",
            StepOutcome::Ambiguous { .. } => "ambiguous",
            StepOutcome::Blocked { .. } => "blocked",
        }
    }
}

fn first_line(rest: &str) -> String {
    rest.lines().next().unwrap_or("").trim().to_string()
}

/// What to do when generation itself fails (timeout, provider error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the run; the step stays pending for a later resume.
    Hard,
    /// Write a placeholder scaffold and continue. Used in unattended
    /// agent mode where a partial tree beats no tree.
    Soft,
}

impl FailurePolicy {
    pub fn from_env() -> FailurePolicy {
        if std::env::var("PORTAGE_AGENT_MODE").as_deref() == Ok("1") {
            FailurePolicy::Soft
        } else {
            FailurePolicy::Hard
        }
    }
}

/// Seam for conversion backends.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        step: &ConversionStep,
        legacy_source: &str,
    ) -> Result<String, GenerateError>;
}

/// Default converter: a commented scaffold that carries the legacy source
/// forward for manual porting. No generation backend required.
pub struct TemplateConverter;

#[async_trait]
impl Converter for TemplateConverter {
    async fn convert(
        &self,
        step: &ConversionStep,
        legacy_source: &str,
    ) -> Result<String, GenerateError> {
        let mut out = format!(
            "# {} -- converted from {} via mapping {}\n# rules: {}\n\n",
            step.step_id,
            step.source_ref,
            step.mapping_id,
            step.rule_ids.join(", ")
        );
        out.push_str("# --- legacy source (port manually) ---\n");
        for line in legacy_source.lines() {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Tally of step outcomes for the finalization decision and run summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub completed: usize,
    pub ambiguous: usize,
    pub blocked: usize,
    pub skipped: usize,
    pub ambiguous_steps: Vec<String>,
    pub blocked_steps: Vec<String>,
}

impl ConversionSummary {
    /// Ambiguous and blocked steps need attention but do not fail the run.
    pub fn executed(&self) -> usize {
        self.completed + self.ambiguous + self.blocked
    }
}

pub struct ConversionStepExecutor<'a> {
    converter: &'a dyn Converter,
    checkpoints: &'a CheckpointStore,
    audit: &'a AuditLog,
    feature_root: PathBuf,
    output_root: PathBuf,
    run_id: String,
    dry_run: bool,
    timeout: Duration,
    failure_policy: FailurePolicy,
}

impl<'a> ConversionStepExecutor<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        converter: &'a dyn Converter,
        checkpoints: &'a CheckpointStore,
        audit: &'a AuditLog,
        feature_root: PathBuf,
        output_root: PathBuf,
        run_id: &str,
        dry_run: bool,
        timeout_seconds: u64,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            converter,
            checkpoints,
            audit,
            feature_root,
            output_root,
            run_id: run_id.to_string(),
            dry_run,
            timeout: Duration::from_secs(timeout_seconds),
            failure_policy,
        }
    }

    /// Execute all steps in order, honoring prior checkpoints. Returns the
    /// outcome tally; generation failures under the hard policy abort.
    pub async fn execute(
        &self,
        steps: &[ConversionStep],
        on_step: &mut dyn FnMut(usize, &ConversionStep, &str),
    ) -> Result<ConversionSummary, PipelineError> {
        let resume_from = self.checkpoints.last_completed_index()? + 1;
        let mut summary = ConversionSummary::default();

        for (index, step) in steps.iter().enumerate() {
            if (index as i64) < resume_from {
                tracing::debug!(step_id = %step.step_id, "step already checkpointed, skipping");
                summary.skipped += 1;
                continue;
            }

            let outcome = self.run_step(index, step).await?;
            on_step(index, step, outcome.label());
            match outcome {
                StepOutcome::Written(_) => summary.completed += 1,
                StepOutcome::Ambiguous { .. } => {
                    summary.ambiguous += 1;
                    summary.ambiguous_steps.push(step.step_id.clone());
                }
                StepOutcome::Blocked { .. } => {
                    summary.blocked += 1;
                    summary.blocked_steps.push(step.step_id.clone());
                }
            }
        }
        Ok(summary)
    }

    async fn run_step(
        &self,
        index: usize,
        step: &ConversionStep,
    ) -> Result<StepOutcome, PipelineError> {
        let source_path = self.feature_root.join(&step.source_ref);
        let legacy_source = std::fs::read_to_string(&source_path).unwrap_or_else(|e| {
            tracing::warn!(path = %source_path.display(), error = %e, "legacy source unreadable");
            String::new()
        });

        let generated = match tokio::time::timeout(
            self.timeout,
            self.converter.convert(step, &legacy_source),
        )
        .await
        {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GenerateError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        };

        let outcome = match generated {
            Ok(text) => StepOutcome::decode(&text),
            Err(source) => match self.failure_policy {
                FailurePolicy::Hard => {
                    return Err(PipelineError::Generation {
                        run_id: self.run_id.clone(),
                        step_id: step.step_id.clone(),
                        source,
                    });
                }
                FailurePolicy::Soft => {
                    tracing::warn!(step_id = %step.step_id, error = %source,
                        "generation failed, writing placeholder scaffold");
                    self.write_output(step, &placeholder_scaffold(step, &source.to_string()))?;
                    StepOutcome::Ambiguous {
                        reason: format!("generation failed: {source}"),
                    }
                }
            },
        };

        // Side effect first, checkpoint second. Ambiguous and blocked steps
        // leave no file; they are logged terminal outcomes, not retries.
        let wrote = match &outcome {
            StepOutcome::Written(content) => self.write_output(step, content)?,
            StepOutcome::Ambiguous { reason } | StepOutcome::Blocked { reason } => {
                tracing::warn!(step_id = %step.step_id, reason = %reason, outcome = outcome.label(),
                    "step needs attention, no output written");
                false
            }
        };

        self.checkpoints.record_step(CheckpointEntry {
            run_id: self.run_id.clone(),
            stage: Stage::Conversion,
            step_index: index,
            step_id: step.step_id.clone(),
            status: StepStatus::Completed,
            payload_ref: wrote.then(|| step.target_ref.clone()),
            marker: false,
            recorded_at: chrono::Utc::now(),
        })?;

        self.audit.append(AuditEvent::StepExecuted {
            step_id: step.step_id.clone(),
            outcome: outcome.label().to_string(),
            target_ref: step.target_ref.clone(),
        })?;

        Ok(outcome)
    }

    /// Returns true iff a file was written (false in dry-run).
    fn write_output(&self, step: &ConversionStep, content: &str) -> Result<bool, PipelineError> {
        if self.dry_run {
            tracing::info!(step_id = %step.step_id, target = %step.target_ref,
                "dry-run: skipping output write");
            return Ok(false);
        }
        let path = self.output_root.join(&step.target_ref);
        write_atomic(&path, content).map_err(|e| PipelineError::OutputWriteFailed {
            run_id: self.run_id.clone(),
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;
        Ok(true)
    }
}

fn placeholder_scaffold(step: &ConversionStep, error: &str) -> String {
    format!(
        "# {} -- PLACEHOLDER\n# Conversion of {} did not complete: {}\n# Re-run this step or port manually.\n",
        step.step_id, step.source_ref, error
    )
}
