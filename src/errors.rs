//! Typed error hierarchy for the portage pipeline.
//!
//! Two top-level enums cover the two failure domains:
//! - `PipelineError` — fatal orchestration failures, each with its own exit code
//! - `GenerateError` — transport-level failures from the external Planner/Converter,
//!   recoverable by design (the current step stays unmarked and is retried on resume)

use std::path::PathBuf;
use thiserror::Error;

/// Fatal pipeline errors. Every variant that occurs after run-identity
/// resolution carries the run id so the operator can resume or inspect state.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid job descriptor: {0}")]
    ConfigValidation(String),

    #[error("Scoping failed for feature root {path:?}: {source}")]
    Scoping {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Run id {run_id} embeds hash {embedded} but current parameters hash to {computed}; \
         refusing to resume into a different feature/root/target"
    )]
    ResumeMismatch {
        run_id: String,
        embedded: String,
        computed: String,
    },

    #[error("No plan artifact exists for run {run_id}; nothing to revise")]
    NoPlanToRevise { run_id: String },

    #[error("Checkpoint for run {run_id} is unreadable, refusing to resume: {detail}")]
    CheckpointCorruption { run_id: String, detail: String },

    #[error("Generation failed at {step_id} in run {run_id}: {source}")]
    Generation {
        run_id: String,
        step_id: String,
        #[source]
        source: GenerateError,
    },

    #[error("Failed to write output file at {path:?} in run {run_id}: {source}")]
    OutputWriteFailed {
        run_id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Process exit code for this error kind. Distinct per taxonomy entry so
    /// callers (CI, agents) can branch without parsing messages.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigValidation(_) => 10,
            Self::Scoping { .. } => 11,
            Self::ResumeMismatch { .. } => 12,
            Self::CheckpointCorruption { .. } => 13,
            Self::NoPlanToRevise { .. } => 14,
            Self::Generation { .. } => 15,
            Self::OutputWriteFailed { .. } | Self::Other(_) => 1,
        }
    }
}

/// Failures calling an external text-generation service. These never mark a
/// checkpoint entry; whether they abort the run is the caller's policy.
#[derive(Debug, Clone, Error)]
pub enum GenerateError {
    #[error("generation call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("provider failure: {0}")]
    Provider(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}
