//! Job descriptor loading for the portage pipeline.
//!
//! A job file is a human-editable YAML document describing one conversion
//! job: which legacy feature to convert, where, and how far to run the
//! pipeline. Provider/model settings under `generator` are carried through
//! untouched for external Planner/Converter implementations.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;

/// How far the pipeline runs before stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Stop after scoping/analysis.
    Scope,
    /// Stop after plan generation.
    Plan,
    /// Run to completion: approval gate + conversion.
    #[default]
    Full,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scope" => Ok(Self::Scope),
            "plan" => Ok(Self::Plan),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown mode '{other}' (expected scope|plan|full)")),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scope => write!(f, "scope"),
            Self::Plan => write!(f, "plan"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Top-level job file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    #[serde(default)]
    pub job: JobMeta,
    pub pipeline: PipelineSpec,
    /// Opaque provider/model settings, consumed only by external
    /// Planner/Converter implementations.
    #[serde(default)]
    pub generator: serde_yaml::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Path to the legacy feature folder (source boundary).
    pub feature_root: PathBuf,
    /// Human-readable feature name; defaults to the root's final component.
    #[serde(default)]
    pub feature_name: String,
    /// Root folder for generated target files.
    #[serde(default)]
    pub output_root: Option<PathBuf>,
    #[serde(default)]
    pub mode: Mode,
    /// Target stack identifier, part of the run identity.
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub force: bool,
    /// Per-step generation timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_target() -> String {
    "simpler_grants".to_string()
}

fn default_timeout_seconds() -> u64 {
    120
}

impl JobFile {
    /// Load and validate a job file. Validation failures are
    /// `PipelineError::ConfigValidation`: fatal, nothing written.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::ConfigValidation(format!(
                "failed to read job file {}: {e}",
                path.display()
            ))
        })?;

        let mut job: JobFile = serde_yaml::from_str(&content).map_err(|e| {
            PipelineError::ConfigValidation(format!(
                "failed to parse job file {}: {e}",
                path.display()
            ))
        })?;

        if job.pipeline.feature_root.as_os_str().is_empty() {
            return Err(PipelineError::ConfigValidation(
                "pipeline.feature_root must be set".into(),
            ));
        }
        if job.pipeline.feature_name.is_empty() {
            job.pipeline.feature_name = job
                .pipeline
                .feature_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    PipelineError::ConfigValidation(
                        "pipeline.feature_name not set and feature_root has no final component"
                            .into(),
                    )
                })?;
        }
        if job.pipeline.target.trim().is_empty() {
            return Err(PipelineError::ConfigValidation(
                "pipeline.target must not be empty".into(),
            ));
        }
        if job.pipeline.timeout_seconds == 0 {
            return Err(PipelineError::ConfigValidation(
                "pipeline.timeout_seconds must be positive".into(),
            ));
        }

        Ok(job)
    }

    /// Save the job file (used by tests and the jobs listing tooling).
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize job to YAML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write job file: {}", path.display()))?;
        Ok(())
    }
}
