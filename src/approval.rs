//! Approval gate between plan generation and conversion execution.
//!
//! The gate never proceeds on silence: conversion starts only after an
//! affirmative approval from one of two sources — a human typing the
//! confirmation token at the terminal, or an approval marker file written
//! non-interactively by an external agent or CI workflow. Both paths
//! converge on the same durable `ApprovalRecord`, so a resume never asks
//! twice. "Not approved yet" is a pending state, not an error.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::util::write_atomic;

/// The literal token a human must type to approve (matched case-insensitively).
pub const CONFIRM_TOKEN: &str = "yes";
const DENY_TOKEN: &str = "no";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovedBy {
    Human,
    Agent,
}

/// Durable record that a plan was approved for a (feature, target) pair.
/// Its presence is the sole signal the gate consults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approved_at: DateTime<Utc>,
    pub approved_by: ApprovedBy,
    /// The job file or run this approval refers to.
    pub job_reference: String,
    pub feature: String,
    pub target: String,
    #[serde(default)]
    pub notes: String,
}

/// Tri-state outcome of consulting an approval source. `Denied` and
/// `Pending` both halt before conversion, but a denial is an explicit
/// "no" worth reporting differently.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalDecision {
    Approved(ApprovalRecord),
    Denied { feedback: String },
    Pending,
}

/// A way of obtaining an approval decision. The gate is path-agnostic:
/// marker files and interactive prompts implement the same seam.
pub trait ApprovalSource {
    fn poll(&mut self) -> Result<ApprovalDecision>;
}

/// Non-interactive path: the decision is the existence of the marker file.
pub struct MarkerSource {
    marker_path: PathBuf,
}

impl MarkerSource {
    pub fn new(marker_path: PathBuf) -> Self {
        Self { marker_path }
    }
}

impl ApprovalSource for MarkerSource {
    fn poll(&mut self) -> Result<ApprovalDecision> {
        match read_marker(&self.marker_path)? {
            Some(record) => Ok(ApprovalDecision::Approved(record)),
            None => Ok(ApprovalDecision::Pending),
        }
    }
}

/// Human path: blocks on one line of input. Only the confirmation token
/// approves; an explicit deny token asks for feedback; anything else
/// (including EOF) leaves the run pending.
pub struct PromptSource<R: BufRead> {
    input: R,
    job_reference: String,
    feature: String,
    target: String,
}

impl PromptSource<std::io::BufReader<std::io::Stdin>> {
    pub fn stdin(job_reference: &str, feature: &str, target: &str) -> Self {
        PromptSource::new(
            std::io::BufReader::new(std::io::stdin()),
            job_reference,
            feature,
            target,
        )
    }
}

impl<R: BufRead> PromptSource<R> {
    pub fn new(input: R, job_reference: &str, feature: &str, target: &str) -> Self {
        Self {
            input,
            job_reference: job_reference.to_string(),
            feature: feature.to_string(),
            target: target.to_string(),
        }
    }
}

impl<R: BufRead> ApprovalSource for PromptSource<R> {
    fn poll(&mut self) -> Result<ApprovalDecision> {
        println!(
            "\nApprove this conversion plan for feature '{}' (target '{}')? [{}/{}]: ",
            self.feature,
            self.target,
            console::style(CONFIRM_TOKEN).green(),
            console::style(DENY_TOKEN).red(),
        );

        let mut line = String::new();
        let read = self.input.read_line(&mut line).unwrap_or(0);
        if read == 0 {
            // EOF: no approver present. Pending, not an error.
            return Ok(ApprovalDecision::Pending);
        }

        let answer = line.trim().to_lowercase();
        if answer == CONFIRM_TOKEN {
            return Ok(ApprovalDecision::Approved(ApprovalRecord {
                approved_at: Utc::now(),
                approved_by: ApprovedBy::Human,
                job_reference: self.job_reference.clone(),
                feature: self.feature.clone(),
                target: self.target.clone(),
                notes: String::new(),
            }));
        }
        if answer == DENY_TOKEN {
            println!("Describe what needs to change (optional): ");
            let mut feedback = String::new();
            let _ = self.input.read_line(&mut feedback);
            return Ok(ApprovalDecision::Denied {
                feedback: feedback.trim().to_string(),
            });
        }
        Ok(ApprovalDecision::Pending)
    }
}

/// The gate itself: owns the marker path and the auto-approve bypass.
pub struct ApprovalGate {
    marker_path: PathBuf,
    auto_approve: bool,
    persist: bool,
}

impl ApprovalGate {
    pub fn new(marker_path: PathBuf, auto_approve: bool) -> Self {
        Self {
            marker_path,
            auto_approve,
            persist: true,
        }
    }

    /// A transient gate still reads the marker but never writes one. Used
    /// for dry runs: a simulated run must not leave a durable approval a
    /// later real run would trust.
    pub fn transient(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    /// True iff an approval record exists (or the gate is bypassed).
    pub fn check(&self) -> Result<bool> {
        if self.auto_approve {
            return Ok(true);
        }
        Ok(read_marker(&self.marker_path)?.is_some())
    }

    pub fn record(&self) -> Result<Option<ApprovalRecord>> {
        read_marker(&self.marker_path)
    }

    /// Agent path: write the record non-interactively. Idempotent overwrite.
    pub fn approve_via_marker(&self, record: &ApprovalRecord) -> Result<()> {
        let json =
            serde_json::to_string_pretty(record).context("Failed to serialize approval record")?;
        write_atomic(&self.marker_path, &json)
    }

    /// Consult a source and persist an affirmative answer, so approval
    /// survives a crash and resume never re-prompts.
    pub fn request(&self, source: &mut dyn ApprovalSource) -> Result<ApprovalDecision> {
        if self.auto_approve {
            tracing::warn!("auto-approve enabled, skipping the approval gate");
            return Ok(ApprovalDecision::Approved(ApprovalRecord {
                approved_at: Utc::now(),
                approved_by: ApprovedBy::Agent,
                job_reference: "auto-approve".to_string(),
                feature: String::new(),
                target: String::new(),
                notes: "auto_approve flag set".to_string(),
            }));
        }
        if let Some(existing) = read_marker(&self.marker_path)? {
            return Ok(ApprovalDecision::Approved(existing));
        }
        let decision = source.poll()?;
        if self.persist {
            if let ApprovalDecision::Approved(ref record) = decision {
                self.approve_via_marker(record)?;
            }
        }
        Ok(decision)
    }

    /// Delete the approval record. Used by plan revision (always) and the
    /// explicit revoke command. Never silently re-created.
    pub fn revoke(&self) -> Result<bool> {
        if self.marker_path.exists() {
            std::fs::remove_file(&self.marker_path).with_context(|| {
                format!(
                    "Failed to remove approval marker: {}",
                    self.marker_path.display()
                )
            })?;
            return Ok(true);
        }
        Ok(false)
    }
}

fn read_marker(path: &Path) -> Result<Option<ApprovalRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read approval marker: {}", path.display()))?;
    let record = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse approval marker: {}", path.display()))?;
    Ok(Some(record))
}
