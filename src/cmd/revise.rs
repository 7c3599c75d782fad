//! Plan revision — `portage revise <run_id> --feedback "..."`.

use std::path::Path;

use portage::approval::ApprovalGate;
use portage::config::Layout;
use portage::errors::PipelineError;
use portage::job::JobFile;
use portage::plan::{PlanRevisionController, TemplatePlanner};
use portage::run_id::RunIdentity;
use portage::scope::{scope_or_cached, FsScoper};

pub async fn cmd_revise(
    base_dir: &Path,
    job_path: &Path,
    run_id: &str,
    feedback: &str,
) -> Result<i32, PipelineError> {
    let job = JobFile::load(job_path)?;
    let spec = &job.pipeline;

    // Refuse to revise a run that belongs to different parameters.
    let identity = RunIdentity::resolve(
        &spec.feature_name,
        &spec.feature_root.to_string_lossy(),
        &spec.target,
        Some(run_id),
    )?;

    let layout = Layout::for_feature(base_dir, &spec.feature_name, spec.output_root.as_deref());
    layout.ensure_directories()?;
    let analysis = scope_or_cached(
        &FsScoper,
        &layout.analysis_file(&identity.full_id),
        &identity.full_id,
        &spec.feature_name,
        &spec.feature_root,
        true,
    )
    .await?;

    let gate = ApprovalGate::new(
        layout.approval_marker(&spec.feature_name, &spec.target),
        false,
    );
    let controller = PlanRevisionController::new(&layout, &gate);
    let revised = controller
        .revise(&identity.full_id, &analysis, &TemplatePlanner, feedback)
        .await?;

    println!(
        "{} Wrote plan revision {} for run {}. Approval cleared; re-approve before converting.",
        console::style("✓").green(),
        revised.revision_index,
        identity.full_id
    );
    Ok(0)
}
