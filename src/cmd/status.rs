//! Run inspection — `portage status <run_id>`.

use console::style;
use std::path::Path;

use portage::config::Layout;
use portage::errors::PipelineError;
use portage::job::JobFile;
use portage::orchestrator::inspect_run;

pub fn cmd_status(base_dir: &Path, job_path: &Path, run_id: &str) -> Result<i32, PipelineError> {
    let job = JobFile::load(job_path)?;
    let spec = &job.pipeline;
    let layout = Layout::for_feature(base_dir, &spec.feature_name, spec.output_root.as_deref());
    let status = inspect_run(&layout, run_id, &spec.feature_name, &spec.target)?;

    println!("{} {}", style("Run").bold(), style(run_id).cyan());
    let stages = status
        .stages_completed
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    println!(
        "  stages completed: {}",
        if stages.is_empty() { "none".to_string() } else { stages }
    );
    match status.plan_revision {
        Some(rev) => println!("  plan: revision {rev}"),
        None => println!("  plan: not generated"),
    }
    println!(
        "  approval: {}",
        if status.approved {
            style("granted").green()
        } else {
            style("pending").yellow()
        }
    );
    if status.last_completed_step >= 0 {
        println!(
            "  conversion: completed through step index {}",
            status.last_completed_step
        );
    } else {
        println!("  conversion: not started");
    }
    if let Some(analysis) = &status.analysis {
        println!("  scoped artifacts: {}", analysis.nodes.len());
    }
    Ok(0)
}
