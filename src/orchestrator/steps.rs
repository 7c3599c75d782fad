//! Derives executable conversion steps from a scope analysis.
//!
//! Steps are ordered database, backend, frontend and numbered per tier
//! ("Step A1", "Step B1", ...). The derivation is deterministic: the same
//! analysis always yields the same step list, which is what makes
//! checkpoint indices stable across resume.

use std::path::Path;

use crate::convert::ConversionStep;
use crate::scope::{ScopeAnalysis, Tier};
use crate::util::to_snake;

struct TierMapping {
    mapping_id: &'static str,
    out_dir: &'static str,
    out_ext: &'static str,
    rule_ids: &'static [&'static str],
}

fn mapping_for(tier: Tier) -> TierMapping {
    match tier {
        Tier::Database => TierMapping {
            mapping_id: "ddl-to-postgres",
            out_dir: "db/migrations",
            out_ext: "sql",
            rule_ids: &["R-DB-NAMING", "R-DB-TYPES"],
        },
        Tier::Backend => TierMapping {
            mapping_id: "logic-to-python",
            out_dir: "api/services",
            out_ext: "py",
            rule_ids: &["R-API-LAYERING", "R-API-ERRORS"],
        },
        Tier::Frontend => TierMapping {
            mapping_id: "screen-to-react",
            out_dir: "frontend/pages",
            out_ext: "tsx",
            rule_ids: &["R-UI-FORMS", "R-UI-ROUTES"],
        },
    }
}

/// Output path for one legacy artifact: mapped directory, snake-cased
/// stem, target-stack extension.
fn target_ref(rel_path: &str, mapping: &TierMapping) -> String {
    let stem = Path::new(rel_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("artifact");
    format!("{}/{}.{}", mapping.out_dir, to_snake(stem), mapping.out_ext)
}

pub fn derive_steps(analysis: &ScopeAnalysis) -> Vec<ConversionStep> {
    let mut steps = Vec::with_capacity(analysis.nodes.len());
    for tier in [Tier::Database, Tier::Backend, Tier::Frontend] {
        let mapping = mapping_for(tier);
        for (i, node) in analysis.nodes_in_tier(tier).enumerate() {
            steps.push(ConversionStep {
                step_id: format!("Step {}{}", tier.letter(), i + 1),
                tier,
                source_ref: node.rel_path.clone(),
                target_ref: target_ref(&node.rel_path, &mapping),
                mapping_id: mapping.mapping_id.to_string(),
                rule_ids: mapping.rule_ids.iter().map(|r| r.to_string()).collect(),
            });
        }
    }
    steps
}
