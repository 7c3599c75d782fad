//! Feature scoping: walk the legacy feature root and classify what exists.
//!
//! The resulting `ScopeAnalysis` is the input to planning and step
//! derivation. It is cached as a run-scoped artifact so plan revision can
//! reuse it without re-walking the tree.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use walkdir::WalkDir;

use crate::errors::PipelineError;
use crate::util::write_atomic;

/// Conversion tier, in execution order. Database artifacts convert before
/// the backend that queries them, which converts before the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Database,
    Backend,
    Frontend,
}

impl Tier {
    /// Step-id prefix: "Step A1", "Step B2", ...
    pub fn letter(&self) -> char {
        match self {
            Tier::Database => 'A',
            Tier::Backend => 'B',
            Tier::Frontend => 'C',
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Database => write!(f, "database"),
            Tier::Backend => write!(f, "backend"),
            Tier::Frontend => write!(f, "frontend"),
        }
    }
}

/// One legacy source artifact discovered under the feature root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeNode {
    /// Path relative to the feature root, forward slashes.
    pub rel_path: String,
    pub tier: Tier,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeAnalysis {
    pub run_id: String,
    pub feature_name: String,
    pub feature_root: String,
    pub scoped_at: DateTime<Utc>,
    pub nodes: Vec<ScopeNode>,
}

impl ScopeAnalysis {
    pub fn nodes_in_tier(&self, tier: Tier) -> impl Iterator<Item = &ScopeNode> {
        self.nodes.iter().filter(move |n| n.tier == tier)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize analysis")?;
        write_atomic(path, &json)
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read analysis: {}", path.display()))?;
        let analysis = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse analysis: {}", path.display()))?;
        Ok(Some(analysis))
    }
}

/// Seam for scoping backends. The shipped implementation walks the
/// filesystem; alternatives can consult an index or a remote service.
#[async_trait]
pub trait Scoper: Send + Sync {
    async fn scope(
        &self,
        run_id: &str,
        feature_name: &str,
        feature_root: &Path,
    ) -> Result<ScopeAnalysis, PipelineError>;
}

/// Default scoper: walk the feature root and classify files by extension
/// and path hints.
pub struct FsScoper;

impl FsScoper {
    fn classify(rel_path: &str) -> Option<Tier> {
        let lower = rel_path.to_lowercase();
        let ext = Path::new(&lower)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        match ext {
            "sql" | "ddl" => Some(Tier::Database),
            "4gl" | "p" | "cls" | "cbl" | "cob" | "pl" | "pm" | "bas" => Some(Tier::Backend),
            "html" | "htm" | "jsp" | "asp" | "aspx" | "xaml" | "frm" | "scr" => {
                Some(Tier::Frontend)
            }
            _ => {
                // Path hints catch extension-less schema dumps and the like.
                if lower.contains("schema") || lower.contains("/db/") {
                    Some(Tier::Database)
                } else if lower.contains("/ui/") || lower.contains("/screens/") {
                    Some(Tier::Frontend)
                } else {
                    None
                }
            }
        }
    }
}

#[async_trait]
impl Scoper for FsScoper {
    async fn scope(
        &self,
        run_id: &str,
        feature_name: &str,
        feature_root: &Path,
    ) -> Result<ScopeAnalysis, PipelineError> {
        if !feature_root.is_dir() {
            return Err(PipelineError::Scoping {
                path: feature_root.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "feature root is not a directory",
                ),
            });
        }

        let mut nodes = Vec::new();
        for entry in WalkDir::new(feature_root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let source = e
                    .io_error()
                    .map(|io| std::io::Error::new(io.kind(), io.to_string()))
                    .unwrap_or_else(|| std::io::Error::other(e.to_string()));
                PipelineError::Scoping {
                    path: feature_root.to_path_buf(),
                    source,
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(feature_root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let Some(tier) = Self::classify(&rel) else {
                tracing::debug!(path = %rel, "skipping unclassified file");
                continue;
            };
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            nodes.push(ScopeNode {
                rel_path: rel,
                tier,
                size_bytes,
            });
        }

        if nodes.is_empty() {
            return Err(PipelineError::Scoping {
                path: feature_root.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no convertible artifacts found under feature root",
                ),
            });
        }

        // Deterministic order: tier, then path.
        nodes.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.rel_path.cmp(&b.rel_path)));

        tracing::info!(
            feature = feature_name,
            files = nodes.len(),
            "scoped feature root"
        );

        Ok(ScopeAnalysis {
            run_id: run_id.to_string(),
            feature_name: feature_name.to_string(),
            feature_root: feature_root.display().to_string(),
            scoped_at: Utc::now(),
            nodes,
        })
    }
}

/// Scope fresh or reuse the cached analysis for this run. `persist: false`
/// leaves a fresh analysis uncached (dry runs write no durable state).
pub async fn scope_or_cached(
    scoper: &dyn Scoper,
    cache_path: &Path,
    run_id: &str,
    feature_name: &str,
    feature_root: &Path,
    persist: bool,
) -> Result<ScopeAnalysis, PipelineError> {
    if let Some(cached) = ScopeAnalysis::load(cache_path)? {
        tracing::debug!(run_id, "reusing cached scope analysis");
        return Ok(cached);
    }
    let analysis = scoper.scope(run_id, feature_name, feature_root).await?;
    if persist {
        analysis.save(cache_path)?;
    }
    Ok(analysis)
}
