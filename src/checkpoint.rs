//! Durable checkpoint store: one JSON file per run recording which pipeline
//! stages and conversion steps have completed.
//!
//! Write ordering contract: a step's side effect (the output file write)
//! lands first; the checkpoint entry is recorded after. The checkpoint can
//! therefore under-report but never claims a write that did not happen; a
//! crash between the two re-executes at most one step, and re-writing the
//! same target file is idempotent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;
use crate::util::write_atomic;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Config,
    Scope,
    Plan,
    Approval,
    Conversion,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Scope => write!(f, "scope"),
            Self::Plan => write!(f, "plan"),
            Self::Approval => write!(f, "approval"),
            Self::Conversion => write!(f, "conversion"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub run_id: String,
    pub stage: Stage,
    pub step_index: usize,
    pub step_id: String,
    pub status: StepStatus,
    /// Reference to the step's durable side effect (e.g. the written file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<String>,
    /// True for whole-stage completion markers, false for conversion steps.
    /// Markers and steps never overwrite each other.
    #[serde(default)]
    pub marker: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointFile {
    entries: Vec<CheckpointEntry>,
}

pub struct CheckpointStore {
    checkpoint_file: PathBuf,
    run_id: String,
    dry_run: bool,
}

impl CheckpointStore {
    pub fn new(checkpoint_file: PathBuf, run_id: &str) -> Self {
        Self {
            checkpoint_file,
            run_id: run_id.to_string(),
            dry_run: false,
        }
    }

    /// A dry-run store answers queries from whatever state already exists
    /// but records nothing, so a later real resume never mistakes simulated
    /// steps for completed work.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn path(&self) -> &Path {
        &self.checkpoint_file
    }

    /// Load all entries, in recorded order. An absent file is empty state
    /// (fresh run). `strict` is the resume path: an unreadable or unparsable
    /// file is `CheckpointCorruption` there, because silently restarting
    /// from zero would duplicate side effects.
    pub fn load(&self, strict: bool) -> Result<Vec<CheckpointEntry>, PipelineError> {
        if !self.checkpoint_file.exists() {
            return Ok(Vec::new());
        }
        let read = std::fs::read_to_string(&self.checkpoint_file)
            .map_err(|e| self.corruption(format!("read failed: {e}")))
            .and_then(|content| {
                serde_json::from_str::<CheckpointFile>(&content)
                    .map_err(|e| self.corruption(format!("parse failed: {e}")))
            });
        match read {
            Ok(file) => Ok(file.entries),
            Err(err) if strict => Err(err),
            Err(err) => {
                tracing::warn!(
                    run_id = %self.run_id,
                    "ignoring unreadable checkpoint on fresh run: {err}"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Record or update one entry. The file is rewritten atomically so a
    /// concurrent reader never sees a partial record.
    pub fn record_step(&self, entry: CheckpointEntry) -> Result<()> {
        if self.dry_run {
            tracing::debug!(
                run_id = %self.run_id,
                step_id = %entry.step_id,
                "dry-run: checkpoint not recorded"
            );
            return Ok(());
        }
        let mut entries = self.load(false).map_err(anyhow::Error::from)?;
        // Same (stage, step_index, marker) updates in place; otherwise append.
        match entries
            .iter_mut()
            .find(|e| {
                e.stage == entry.stage
                    && e.step_index == entry.step_index
                    && e.marker == entry.marker
            })
        {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        let json = serde_json::to_string_pretty(&CheckpointFile { entries })
            .context("Failed to serialize checkpoint")?;
        write_atomic(&self.checkpoint_file, &json)
    }

    /// Convenience: record a stage (non-conversion) completion marker.
    pub fn record_stage_completed(&self, stage: Stage) -> Result<()> {
        self.record_step(CheckpointEntry {
            run_id: self.run_id.clone(),
            stage,
            step_index: 0,
            step_id: stage.to_string(),
            status: StepStatus::Completed,
            payload_ref: None,
            marker: true,
            recorded_at: Utc::now(),
        })
    }

    pub fn stage_completed(&self, stage: Stage) -> Result<bool, PipelineError> {
        Ok(self
            .load(false)?
            .iter()
            .any(|e| e.stage == stage && e.marker && e.status == StepStatus::Completed))
    }

    /// Highest conversion step index through which every step is completed;
    /// -1 if none. Gaps stop the scan so resume never skips an unrecorded
    /// step in the middle of the sequence.
    pub fn last_completed_index(&self) -> Result<i64, PipelineError> {
        let entries = self.load(false)?;
        let mut completed: Vec<usize> = entries
            .iter()
            .filter(|e| {
                e.stage == Stage::Conversion && !e.marker && e.status == StepStatus::Completed
            })
            .map(|e| e.step_index)
            .collect();
        completed.sort_unstable();
        completed.dedup();

        let mut last: i64 = -1;
        for idx in completed {
            if idx as i64 == last + 1 {
                last = idx as i64;
            } else {
                break;
            }
        }
        Ok(last)
    }

    fn corruption(&self, detail: String) -> PipelineError {
        PipelineError::CheckpointCorruption {
            run_id: self.run_id.clone(),
            detail,
        }
    }
}
