//! Marker-based approval — `portage approve` and `portage revoke`.
//!
//! The non-interactive fulfillment path: CI or an external agent approves a
//! reviewed plan by writing the marker, and a later `run`/`resume` passes
//! the gate without a terminal.

use chrono::Utc;
use console::style;
use std::path::Path;

use portage::approval::{ApprovalGate, ApprovalRecord, ApprovedBy};
use portage::config::Layout;
use portage::errors::PipelineError;
use portage::job::JobFile;

fn gate_for(base_dir: &Path, job_path: &Path) -> Result<(ApprovalGate, JobFile), PipelineError> {
    let job = JobFile::load(job_path)?;
    let spec = &job.pipeline;
    let layout = Layout::for_feature(base_dir, &spec.feature_name, spec.output_root.as_deref());
    let gate = ApprovalGate::new(
        layout.approval_marker(&spec.feature_name, &spec.target),
        false,
    );
    Ok((gate, job))
}

pub fn cmd_approve(
    base_dir: &Path,
    job_path: &Path,
    by: Option<&str>,
    notes: Option<&str>,
) -> Result<i32, PipelineError> {
    let (gate, job) = gate_for(base_dir, job_path)?;
    let spec = &job.pipeline;
    let record = ApprovalRecord {
        approved_at: Utc::now(),
        approved_by: match by {
            Some("human") => ApprovedBy::Human,
            _ => ApprovedBy::Agent,
        },
        job_reference: job_path.display().to_string(),
        feature: spec.feature_name.clone(),
        target: spec.target.clone(),
        notes: notes.unwrap_or_default().to_string(),
    };
    gate.approve_via_marker(&record)?;
    println!(
        "{} Approved plan for feature '{}' (target '{}').",
        style("✓").green(),
        spec.feature_name,
        spec.target
    );
    println!("  Marker: {}", gate.marker_path().display());
    Ok(0)
}

pub fn cmd_revoke(base_dir: &Path, job_path: &Path) -> Result<i32, PipelineError> {
    let (gate, job) = gate_for(base_dir, job_path)?;
    let removed = gate.revoke()?;
    if removed {
        println!(
            "{} Revoked approval for feature '{}'.",
            style("✓").green(),
            job.pipeline.feature_name
        );
    } else {
        println!(
            "No approval on record for feature '{}'.",
            job.pipeline.feature_name
        );
    }
    Ok(0)
}
