//! On-disk layout for portage state.
//!
//! All durable pipeline state lives under a single state root (default
//! `.portage/` in the working directory): the completed-run registry,
//! per-run checkpoints, approval markers, plan artifacts, cached scope
//! analyses, and audit logs. Conversion output goes to a separate output
//! root so generated code never mixes with orchestration state.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::util::{slug, to_snake};

/// Path derivation for every durable artifact the pipeline touches.
#[derive(Debug, Clone)]
pub struct Layout {
    pub state_root: PathBuf,
    pub output_root: PathBuf,
}

impl Layout {
    pub fn new(state_root: PathBuf, output_root: PathBuf) -> Self {
        Self {
            state_root,
            output_root,
        }
    }

    /// Default layout rooted in `base_dir` for `feature_name`.
    pub fn for_feature(base_dir: &Path, feature_name: &str, output_root: Option<&Path>) -> Self {
        let state_root = base_dir.join(".portage");
        let output_root = output_root
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base_dir.join("output").join(feature_slug(feature_name)));
        Self::new(state_root, output_root)
    }

    pub fn registry_file(&self) -> PathBuf {
        self.state_root.join("registry.json")
    }

    pub fn checkpoint_file(&self, run_id: &str) -> PathBuf {
        self.state_root
            .join("checkpoints")
            .join(format!("{run_id}-checkpoint.json"))
    }

    /// Approval markers are keyed by (feature, target), not by run id:
    /// approval survives a resume and is shared by every run of the pair.
    pub fn approval_marker(&self, feature_name: &str, target: &str) -> PathBuf {
        self.state_root
            .join("approvals")
            .join(format!("{}-{}.json", feature_slug(feature_name), slug(target)))
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.state_root.join("plans")
    }

    pub fn plan_file(&self, run_id: &str, revision_index: u32) -> PathBuf {
        self.plans_dir()
            .join(format!("{run_id}-plan-rev{revision_index}.json"))
    }

    pub fn analysis_file(&self, run_id: &str) -> PathBuf {
        self.state_root
            .join("scopes")
            .join(format!("{run_id}-analysis.json"))
    }

    pub fn audit_log(&self, run_id: &str) -> PathBuf {
        self.state_root
            .join("logs")
            .join(format!("{run_id}-audit.jsonl"))
    }

    pub fn run_lock(&self, run_id: &str) -> PathBuf {
        self.state_root.join("locks").join(format!("{run_id}.lock"))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.state_root.clone(),
            self.state_root.join("checkpoints"),
            self.state_root.join("approvals"),
            self.plans_dir(),
            self.state_root.join("scopes"),
            self.state_root.join("logs"),
            self.state_root.join("locks"),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Filename slug for a feature name: camel boundaries become dashes, so
/// "OrderHistory" keys as "order-history".
fn feature_slug(feature_name: &str) -> String {
    slug(&to_snake(feature_name))
}
