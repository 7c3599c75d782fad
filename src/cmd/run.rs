//! Pipeline execution — `portage run` and `portage resume`.

use std::path::Path;

use portage::approval::{ApprovalDecision, ApprovalSource, PromptSource};
use portage::config::Layout;
use portage::errors::PipelineError;
use portage::job::{JobFile, Mode};
use portage::orchestrator::StageOrchestrator;

/// Command-line overrides layered on top of the job file.
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub mode: Option<Mode>,
    pub force: bool,
    pub dry_run: bool,
    pub auto_approve: bool,
    pub timeout: Option<u64>,
}

fn load_job(job_path: &Path, overrides: &RunOverrides) -> Result<JobFile, PipelineError> {
    let mut job = JobFile::load(job_path)?;
    if let Some(mode) = overrides.mode {
        job.pipeline.mode = mode;
    }
    job.pipeline.force |= overrides.force;
    job.pipeline.dry_run |= overrides.dry_run;
    job.pipeline.auto_approve |= overrides.auto_approve;
    if let Some(timeout) = overrides.timeout {
        if timeout == 0 {
            return Err(PipelineError::ConfigValidation(
                "--timeout must be positive".into(),
            ));
        }
        job.pipeline.timeout_seconds = timeout;
    }
    Ok(job)
}

/// A source that never approves. Used when stdin is not a terminal, so an
/// unattended run halts as awaiting-approval instead of eating input.
struct NoApprover;

impl ApprovalSource for NoApprover {
    fn poll(&mut self) -> anyhow::Result<ApprovalDecision> {
        Ok(ApprovalDecision::Pending)
    }
}

async fn execute(
    base_dir: &Path,
    job_path: &Path,
    overrides: &RunOverrides,
    resume_run_id: Option<&str>,
) -> Result<i32, PipelineError> {
    let job = load_job(job_path, overrides)?;
    let spec = &job.pipeline;
    let layout = Layout::for_feature(base_dir, &spec.feature_name, spec.output_root.as_deref());
    let orchestrator = StageOrchestrator::new(&job, layout);

    let job_ref = job_path.display().to_string();
    let mut source: Box<dyn ApprovalSource> = if console::Term::stdout().is_term() {
        Box::new(PromptSource::stdin(&job_ref, &spec.feature_name, &spec.target))
    } else {
        Box::new(NoApprover)
    };

    let report = orchestrator.run(resume_run_id, source.as_mut()).await?;
    Ok(report.outcome.exit_code())
}

pub async fn cmd_run(
    base_dir: &Path,
    job_path: &Path,
    overrides: RunOverrides,
) -> Result<i32, PipelineError> {
    execute(base_dir, job_path, &overrides, None).await
}

pub async fn cmd_resume(
    base_dir: &Path,
    job_path: &Path,
    run_id: &str,
    overrides: RunOverrides,
) -> Result<i32, PipelineError> {
    execute(base_dir, job_path, &overrides, Some(run_id)).await
}
