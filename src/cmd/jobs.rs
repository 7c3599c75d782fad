//! Job discovery — `portage jobs [dir]`.

use console::style;
use std::path::Path;

use portage::errors::PipelineError;
use portage::job::JobFile;

pub fn cmd_jobs(dir: &Path) -> Result<i32, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::ConfigValidation(format!(
            "jobs directory not found: {}",
            dir.display()
        )));
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| {
            PipelineError::ConfigValidation(format!("failed to list {}: {e}", dir.display()))
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        println!("No job files under {}", dir.display());
        return Ok(0);
    }

    for path in paths {
        match JobFile::load(&path) {
            Ok(job) => {
                let spec = &job.pipeline;
                println!(
                    "{}  feature: {}  target: {}  mode: {}",
                    style(path.display()).cyan(),
                    spec.feature_name,
                    spec.target,
                    spec.mode
                );
            }
            Err(e) => {
                println!("{}  {}", style(path.display()).red(), style(e).dim());
            }
        }
    }
    Ok(0)
}
