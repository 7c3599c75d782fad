//! Terminal output helpers. Everything user-facing goes through here so the
//! pipeline modules stay silent except for tracing.

use chrono::{DateTime, Utc};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use crate::convert::ConversionSummary;
use crate::job::Mode;
use crate::plan::PlanArtifact;
use crate::scope::{ScopeAnalysis, Tier};

pub fn run_banner(run_id: &str, feature: &str, target: &str, mode: Mode, resumed: bool) {
    let verb = if resumed { "Resuming" } else { "Starting" };
    println!(
        "\n{} conversion run {}",
        style(verb).bold(),
        style(run_id).cyan()
    );
    println!(
        "  feature: {}  target: {}  mode: {}",
        style(feature).green(),
        style(target).green(),
        mode
    );
}

pub fn already_complete(prior_run_id: &str, completed_at: DateTime<Utc>) {
    println!(
        "{} Feature already converted by run {} at {}. Use --force to redo.",
        style("✓").green(),
        style(prior_run_id).cyan(),
        completed_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

pub fn scope_summary(analysis: &ScopeAnalysis) {
    println!(
        "{} Scoped {} artifacts:",
        style("✓").green(),
        analysis.nodes.len()
    );
    for tier in [Tier::Database, Tier::Backend, Tier::Frontend] {
        let count = analysis.nodes_in_tier(tier).count();
        if count > 0 {
            println!("    {tier}: {count}");
        }
    }
}

pub fn plan_preview(plan: &PlanArtifact) {
    println!(
        "{} Plan revision {} ({} lines)",
        style("✓").green(),
        plan.revision_index,
        plan.source_text.lines().count()
    );
    println!("{}", style(&plan.source_text).dim());
}

pub fn awaiting_approval(run_id: &str, marker_path: &Path) {
    println!(
        "\n{} Run {} is awaiting approval.",
        style("⏸").yellow(),
        style(run_id).cyan()
    );
    println!(
        "  Approve interactively by re-running, or write a marker with `portage approve`.\n  Marker path: {}",
        marker_path.display()
    );
}

pub fn plan_denied(run_id: &str, feedback: &str) {
    println!(
        "\n{} Plan for run {} was denied.",
        style("✗").red(),
        style(run_id).cyan()
    );
    if !feedback.is_empty() {
        println!("  Feedback: {feedback}");
        println!("  Revise with: portage revise {run_id} --feedback \"...\"");
    }
}

pub fn step_progress(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

pub fn step_tick(bar: &ProgressBar, step_id: &str, outcome: &str) {
    bar.set_message(format!("{step_id}: {outcome}"));
    bar.inc(1);
}

pub fn run_summary(run_id: &str, summary: &ConversionSummary, dry_run: bool) {
    let label = if dry_run {
        style("Dry run complete").yellow()
    } else {
        style("Conversion complete").green()
    };
    println!("\n{label} ({run_id})");
    println!(
        "  written: {}  ambiguous: {}  blocked: {}  skipped: {}",
        summary.completed, summary.ambiguous, summary.blocked, summary.skipped
    );
    for step in &summary.ambiguous_steps {
        println!("  {} {} needs review", style("?").yellow(), step);
    }
    for step in &summary.blocked_steps {
        println!("  {} {} blocked", style("!").red(), step);
    }
}
