//! Stage orchestration: Config, Scope, Plan, Approval, Conversion.
//!
//! Stages always run in that order. The job's mode decides how far to go;
//! checkpoints decide where a resume picks up. Two invariants govern
//! everything here: a stable-hash hit in the completed-run registry means
//! the pipeline does nothing (unless forced), and conversion never starts
//! without an affirmative approval decision.

pub mod steps;

use anyhow::Context;
use chrono::Utc;
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::approval::{ApprovalDecision, ApprovalGate, ApprovalSource};
use crate::audit::{AuditEvent, AuditLog};
use crate::checkpoint::{CheckpointStore, Stage};
use crate::config::Layout;
use crate::convert::{
    ConversionStepExecutor, ConversionSummary, Converter, FailurePolicy, TemplateConverter,
};
use crate::errors::PipelineError;
use crate::job::{JobFile, Mode};
use crate::plan::{PlanArtifact, Planner, TemplatePlanner};
use crate::registry::{CompletedRunEntry, CompletedRunRegistry};
use crate::run_id::RunIdentity;
use crate::scope::{scope_or_cached, FsScoper, ScopeAnalysis, Scoper};
use crate::ui;

/// How a run ended. Only `Completed` and `AlreadyComplete` are success
/// states; the halted variants report exit code 2 so scripts can tell
/// "waiting on a human" from "done".
#[derive(Debug)]
pub enum RunOutcome {
    Completed(ConversionSummary),
    AlreadyComplete { prior_run_id: String },
    AwaitingApproval,
    Denied { feedback: String },
    StoppedAfterScope,
    StoppedAfterPlan,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::AwaitingApproval | RunOutcome::Denied { .. } => 2,
            _ => 0,
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub identity: RunIdentity,
    pub outcome: RunOutcome,
}

pub struct StageOrchestrator<'a> {
    job: &'a JobFile,
    layout: Layout,
    scoper: &'a dyn Scoper,
    planner: &'a dyn Planner,
    converter: &'a dyn Converter,
}

impl<'a> StageOrchestrator<'a> {
    pub fn new(job: &'a JobFile, layout: Layout) -> Self {
        Self {
            job,
            layout,
            scoper: &FsScoper,
            planner: &TemplatePlanner,
            converter: &TemplateConverter,
        }
    }

    /// Swap in alternative scoping/planning/conversion backends.
    pub fn with_backends(
        mut self,
        scoper: &'a dyn Scoper,
        planner: &'a dyn Planner,
        converter: &'a dyn Converter,
    ) -> Self {
        self.scoper = scoper;
        self.planner = planner;
        self.converter = converter;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Run the pipeline, fresh or resumed. `resume_run_id` is trusted
    /// verbatim after its embedded hash is verified.
    pub async fn run(
        &self,
        resume_run_id: Option<&str>,
        approval_source: &mut dyn ApprovalSource,
    ) -> Result<RunReport, PipelineError> {
        let spec = &self.job.pipeline;
        let identity = RunIdentity::resolve(
            &spec.feature_name,
            &spec.feature_root.to_string_lossy(),
            &spec.target,
            resume_run_id,
        )?;
        let run_id = identity.full_id.clone();
        let resuming = resume_run_id.is_some();

        self.layout.ensure_directories()?;

        // Registry short-circuit: same (feature, root, target) already
        // converted means this run has nothing to do.
        let registry = CompletedRunRegistry::new(self.layout.registry_file());
        if let Some(prior) = registry.get(&identity.stable_hash)? {
            if spec.force {
                tracing::warn!(prior_run_id = %prior.full_id, "force: overriding completed run");
                if !spec.dry_run {
                    registry.remove(&identity.stable_hash)?;
                }
            } else {
                ui::already_complete(&prior.full_id, prior.completed_at);
                return Ok(RunReport {
                    identity,
                    outcome: RunOutcome::AlreadyComplete {
                        prior_run_id: prior.full_id,
                    },
                });
            }
        }

        let _lock = acquire_run_lock(&self.layout.run_lock(&run_id))?;

        // A dry run reads any existing checkpoints but records none, so its
        // simulated steps never masquerade as completed work on a later
        // real resume.
        let checkpoints = CheckpointStore::new(self.layout.checkpoint_file(&run_id), &run_id)
            .with_dry_run(spec.dry_run);
        if resuming {
            // Corrupt state is fatal only when we were asked to trust it.
            checkpoints.load(true)?;
        }

        let audit = AuditLog::new(self.layout.audit_log(&run_id), &run_id);
        audit.append(AuditEvent::RunStarted {
            feature: spec.feature_name.clone(),
            target: spec.target.clone(),
            mode: spec.mode.to_string(),
            resumed: resuming,
            dry_run: spec.dry_run,
        })?;
        ui::run_banner(&run_id, &spec.feature_name, &spec.target, spec.mode, resuming);

        // Config stage: the job file already validated at load time.
        self.complete_stage(&checkpoints, &audit, Stage::Config)?;

        // Scope stage.
        let analysis = scope_or_cached(
            self.scoper,
            &self.layout.analysis_file(&run_id),
            &run_id,
            &spec.feature_name,
            &spec.feature_root,
            !spec.dry_run,
        )
        .await?;
        self.complete_stage(&checkpoints, &audit, Stage::Scope)?;
        ui::scope_summary(&analysis);
        if spec.mode == Mode::Scope {
            return Ok(RunReport {
                identity,
                outcome: RunOutcome::StoppedAfterScope,
            });
        }

        // Plan stage. An existing artifact is never regenerated: the text a
        // human approved is the text that gets executed.
        let plan = match PlanArtifact::load_latest(&self.layout, &run_id)? {
            Some(existing) => {
                tracing::info!(revision = existing.revision_index, "reusing existing plan");
                existing
            }
            None => {
                let text = self.planner.generate(&analysis).await.map_err(|source| {
                    PipelineError::Generation {
                        run_id: run_id.clone(),
                        step_id: "plan".to_string(),
                        source,
                    }
                })?;
                let artifact = PlanArtifact {
                    run_id: run_id.clone(),
                    generated_at: Utc::now(),
                    revision_index: 0,
                    source_text: text,
                    is_revision: false,
                };
                if !spec.dry_run {
                    artifact.save(&self.layout)?;
                }
                artifact
            }
        };
        self.complete_stage(&checkpoints, &audit, Stage::Plan)?;
        ui::plan_preview(&plan);
        if spec.mode == Mode::Plan {
            return Ok(RunReport {
                identity,
                outcome: RunOutcome::StoppedAfterPlan,
            });
        }

        // Approval stage. A dry run's prompt answer is not persisted.
        let mut gate = ApprovalGate::new(
            self.layout.approval_marker(&spec.feature_name, &spec.target),
            spec.auto_approve,
        );
        if spec.dry_run {
            gate = gate.transient();
        }
        match gate.request(approval_source)? {
            ApprovalDecision::Approved(record) => {
                audit.append(AuditEvent::ApprovalGranted {
                    approved_by: format!("{:?}", record.approved_by).to_lowercase(),
                })?;
            }
            ApprovalDecision::Pending => {
                ui::awaiting_approval(&run_id, gate.marker_path());
                return Ok(RunReport {
                    identity,
                    outcome: RunOutcome::AwaitingApproval,
                });
            }
            ApprovalDecision::Denied { feedback } => {
                ui::plan_denied(&run_id, &feedback);
                return Ok(RunReport {
                    identity,
                    outcome: RunOutcome::Denied { feedback },
                });
            }
        }
        self.complete_stage(&checkpoints, &audit, Stage::Approval)?;

        // Conversion stage.
        let steps = steps::derive_steps(&analysis);
        let executor = ConversionStepExecutor::new(
            self.converter,
            &checkpoints,
            &audit,
            spec.feature_root.clone(),
            self.layout.output_root.clone(),
            &run_id,
            spec.dry_run,
            spec.timeout_seconds,
            FailurePolicy::from_env(),
        );
        let progress = ui::step_progress(steps.len() as u64);
        let mut on_step = |_: usize, step: &crate::convert::ConversionStep, outcome: &str| {
            ui::step_tick(&progress, &step.step_id, outcome);
        };
        let summary = executor.execute(&steps, &mut on_step).await?;
        progress.finish_and_clear();
        self.complete_stage(&checkpoints, &audit, Stage::Conversion)?;

        audit.append(AuditEvent::RunFinalized {
            completed: summary.completed,
            ambiguous: summary.ambiguous,
            blocked: summary.blocked,
        })?;

        // Dry runs never enter the registry; the outputs do not exist.
        if !spec.dry_run {
            registry.mark_complete(CompletedRunEntry {
                stable_hash: identity.stable_hash.clone(),
                full_id: run_id.clone(),
                completed_at: Utc::now(),
                feature_name: spec.feature_name.clone(),
                target: spec.target.clone(),
            })?;
        }

        ui::run_summary(&run_id, &summary, spec.dry_run);
        Ok(RunReport {
            identity,
            outcome: RunOutcome::Completed(summary),
        })
    }

    fn complete_stage(
        &self,
        checkpoints: &CheckpointStore,
        audit: &AuditLog,
        stage: Stage,
    ) -> Result<(), PipelineError> {
        if checkpoints.stage_completed(stage)? {
            tracing::debug!(%stage, "stage already completed, skipping marker");
            return Ok(());
        }
        checkpoints.record_stage_completed(stage)?;
        audit.append(AuditEvent::StageCompleted {
            stage: stage.to_string(),
        })?;
        Ok(())
    }
}

/// Advisory lock guarding one run's artifacts against concurrent writers.
struct RunLock {
    file: File,
    path: PathBuf,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

fn acquire_run_lock(path: &Path) -> Result<RunLock, PipelineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create lock dir: {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create lock file: {}", path.display()))?;
    file.try_lock_exclusive().map_err(|_| {
        PipelineError::Other(anyhow::anyhow!(
            "another process is already operating on this run (lock: {})",
            path.display()
        ))
    })?;
    Ok(RunLock {
        file,
        path: path.to_path_buf(),
    })
}

/// Snapshot of a run's persisted state for the status command.
#[derive(Debug)]
pub struct RunStatus {
    pub run_id: String,
    pub stages_completed: Vec<Stage>,
    pub last_completed_step: i64,
    pub plan_revision: Option<u32>,
    pub approved: bool,
    pub analysis: Option<ScopeAnalysis>,
}

pub fn inspect_run(
    layout: &Layout,
    run_id: &str,
    feature_name: &str,
    target: &str,
) -> Result<RunStatus, PipelineError> {
    let checkpoints = CheckpointStore::new(layout.checkpoint_file(run_id), run_id);
    let stages_completed = [
        Stage::Config,
        Stage::Scope,
        Stage::Plan,
        Stage::Approval,
        Stage::Conversion,
    ]
    .into_iter()
    .filter(|s| checkpoints.stage_completed(*s).unwrap_or(false))
    .collect();
    let last_completed_step = checkpoints.last_completed_index()?;
    let plan_revision = PlanArtifact::load_latest(layout, run_id)?.map(|p| p.revision_index);
    let gate = ApprovalGate::new(layout.approval_marker(feature_name, target), false);
    let approved = gate.check()?;
    let analysis = ScopeAnalysis::load(&layout.analysis_file(run_id))?;
    Ok(RunStatus {
        run_id: run_id.to_string(),
        stages_completed,
        last_completed_step,
        plan_revision,
        approved,
        analysis,
    })
}
