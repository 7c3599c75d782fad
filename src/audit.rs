//! Append-only JSONL audit trail, one file per run.
//!
//! Every consequential event gets a line: run start, stage transitions,
//! each conversion step's outcome, finalization. The trail is written even
//! in dry-run mode; it records what the pipeline decided, not what it wrote.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    RunStarted {
        feature: String,
        target: String,
        mode: String,
        resumed: bool,
        dry_run: bool,
    },
    StageCompleted {
        stage: String,
    },
    StepExecuted {
        step_id: String,
        outcome: String,
        target_ref: String,
    },
    ApprovalGranted {
        approved_by: String,
    },
    PlanRevised {
        revision_index: u32,
    },
    RunFinalized {
        completed: usize,
        ambiguous: usize,
        blocked: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: Uuid,
    pub run_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

pub struct AuditLog {
    path: PathBuf,
    run_id: String,
}

impl AuditLog {
    pub fn new(path: PathBuf, run_id: &str) -> Self {
        Self {
            path,
            run_id: run_id.to_string(),
        }
    }

    pub fn append(&self, event: AuditEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log dir: {}", parent.display()))?;
        }
        let record = AuditRecord {
            record_id: Uuid::new_v4(),
            run_id: self.run_id.clone(),
            at: Utc::now(),
            event,
        };
        let line = serde_json::to_string(&record).context("Failed to serialize audit record")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open audit log: {}", self.path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("Failed to append audit record: {}", self.path.display()))?;
        Ok(())
    }

    pub fn read_all(path: &Path) -> Result<Vec<AuditRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read audit log: {}", path.display()))?;
        let mut records = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).with_context(|| {
                format!("Malformed audit record at line {}: {}", i + 1, path.display())
            })?;
            records.push(record);
        }
        Ok(records)
    }
}
