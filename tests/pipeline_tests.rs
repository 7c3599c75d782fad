//! Integration tests for the portage pipeline.
//!
//! These drive the compiled binary end to end: halt at the approval gate,
//! approve out-of-band, resume, revise, and verify the completed-run
//! registry short-circuits repeat work.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn portage() -> Command {
    cargo_bin_cmd!("portage")
}

/// Seed a small legacy feature tree: one DDL file, two backend programs,
/// one screen definition.
fn seed_feature(dir: &Path) -> PathBuf {
    let root = dir.join("legacy/OrderHistory");
    fs::create_dir_all(root.join("db")).unwrap();
    fs::create_dir_all(root.join("logic")).unwrap();
    fs::create_dir_all(root.join("ui")).unwrap();
    fs::write(
        root.join("db/tables.sql"),
        "CREATE TABLE order_history (id INT);",
    )
    .unwrap();
    fs::write(root.join("logic/OrderHistory.4gl"), "MAIN\nEND MAIN").unwrap();
    fs::write(root.join("logic/Billing.4gl"), "CALL bill()").unwrap();
    fs::write(root.join("ui/OrderEntry.frm"), "FORM order_entry").unwrap();
    root
}

fn write_job(dir: &Path, feature_root: &Path, mode: &str) -> PathBuf {
    let path = dir.join("job.yaml");
    let yaml = format!(
        "job:\n  name: order-history\npipeline:\n  feature_root: {}\n  mode: {}\n  target: simpler_grants\n",
        feature_root.display(),
        mode
    );
    fs::write(&path, yaml).unwrap();
    path
}

/// Run ids of every checkpointed run under the workspace, oldest first.
fn run_ids(dir: &Path) -> Vec<String> {
    let checkpoints = dir.join(".portage/checkpoints");
    if !checkpoints.is_dir() {
        return Vec::new();
    }
    let mut ids: Vec<String> = fs::read_dir(&checkpoints)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_suffix("-checkpoint.json"))
                .map(str::to_string)
        })
        .collect();
    ids.sort();
    ids
}

/// Run ids taken from the per-run audit logs. Unlike `run_ids` this also
/// sees dry runs, which checkpoint nothing.
fn audit_run_ids(dir: &Path) -> Vec<String> {
    let logs = dir.join(".portage/logs");
    if !logs.is_dir() {
        return Vec::new();
    }
    let mut ids: Vec<String> = fs::read_dir(&logs)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_suffix("-audit.jsonl"))
                .map(str::to_string)
        })
        .collect();
    ids.sort();
    ids
}

fn plan_files(dir: &Path) -> Vec<String> {
    let plans = dir.join(".portage/plans");
    if !plans.is_dir() {
        return Vec::new();
    }
    let mut names: Vec<String> = fs::read_dir(&plans)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        portage().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        portage().arg("--version").assert().success();
    }

    #[test]
    fn test_missing_job_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        portage()
            .current_dir(dir.path())
            .args(["run", "no-such-job.yaml"])
            .assert()
            .code(10)
            .stderr(predicate::str::contains("job file"));
    }

    #[test]
    fn test_zero_timeout_flag_is_config_error() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "scope");
        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml", "--timeout", "0"])
            .assert()
            .code(10);
    }

    #[test]
    fn test_malformed_job_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let job = dir.path().join("job.yaml");
        fs::write(&job, "pipeline: [not, a, mapping]").unwrap();
        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .code(10);
    }
}

mod approval_flow {
    use super::*;

    #[test]
    fn test_full_run_halts_until_approved_then_completes_once() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        let job = write_job(dir.path(), &root, "full");

        // No terminal, no marker: the run halts awaiting approval.
        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("awaiting approval"));

        // No output was generated before the gate.
        assert!(!dir.path().join("output").exists());

        portage()
            .current_dir(dir.path())
            .args(["approve", "--job", "job.yaml", "--notes", "reviewed"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Approved plan"));

        // Marker in place: the run passes the gate and converts.
        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Conversion complete"));

        let output = dir.path().join("output/order-history");
        assert!(output.join("db/migrations/tables.sql").exists());
        assert!(output.join("api/services/order_history.py").exists());
        assert!(output.join("api/services/billing.py").exists());
        assert!(output.join("frontend/pages/order_entry.tsx").exists());

        // The registry now short-circuits a third invocation.
        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already converted"));

        let _ = job;
    }

    #[test]
    fn test_auto_approve_skips_the_gate() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml", "--auto-approve"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Conversion complete"));
    }

    #[test]
    fn test_revoke_removes_the_marker() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["approve", "--job", "job.yaml"])
            .assert()
            .success();
        portage()
            .current_dir(dir.path())
            .args(["revoke", "--job", "job.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Revoked"));

        // Gate is closed again.
        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .code(2);
    }
}

mod resume_flow {
    use super::*;

    #[test]
    fn test_resume_reuses_run_id_and_plan() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .code(2);
        let ids = run_ids(dir.path());
        assert_eq!(ids.len(), 1);
        let run_id = &ids[0];

        portage()
            .current_dir(dir.path())
            .args(["approve", "--job", "job.yaml"])
            .assert()
            .success();

        portage()
            .current_dir(dir.path())
            .args(["resume", run_id, "--job", "job.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Resuming"))
            .stdout(predicate::str::contains(run_id.as_str()));

        // The plan generated before the halt was reused, not regenerated.
        let plans = plan_files(dir.path());
        assert_eq!(plans, vec![format!("{run_id}-plan-rev0.json")]);
        // No second run was minted.
        assert_eq!(run_ids(dir.path()).len(), 1);
    }

    #[test]
    fn test_resume_refuses_foreign_run_id() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args([
                "resume",
                "conv-20260101-000000-aaaaaaaaaaaa",
                "--job",
                "job.yaml",
            ])
            .assert()
            .code(12)
            .stderr(predicate::str::contains("conv-20260101-000000-aaaaaaaaaaaa"));
    }

    #[test]
    fn test_resume_survives_truncated_conversion() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml", "--auto-approve"])
            .assert()
            .success();
        let run_id = run_ids(dir.path())[0].clone();

        // Simulate a crash after step 0: drop later conversion entries and
        // the completion record, then resume.
        let registry = dir.path().join(".portage/registry.json");
        fs::remove_file(&registry).unwrap();
        let checkpoint = dir.path().join(format!(
            ".portage/checkpoints/{run_id}-checkpoint.json"
        ));
        let content = fs::read_to_string(&checkpoint).unwrap();
        let mut parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        let entries = parsed["entries"].as_array_mut().unwrap();
        entries.retain(|e| {
            e["stage"] != "conversion"
                || (e["step_index"] == 0 && e["step_id"] != "conversion")
        });
        fs::write(&checkpoint, serde_json::to_string(&parsed).unwrap()).unwrap();

        // Mark the surviving output so a rewrite would be visible.
        let first_output = dir
            .path()
            .join("output/order-history/db/migrations/tables.sql");
        fs::write(&first_output, "-- already written --").unwrap();

        portage()
            .current_dir(dir.path())
            .args(["resume", &run_id, "--job", "job.yaml", "--auto-approve"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Conversion complete"));

        // Step 0 was skipped, later steps re-ran.
        assert_eq!(
            fs::read_to_string(&first_output).unwrap(),
            "-- already written --"
        );
        assert!(dir
            .path()
            .join("output/order-history/frontend/pages/order_entry.tsx")
            .exists());
    }

    #[test]
    fn test_corrupt_checkpoint_is_fatal_on_resume() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .code(2);
        let run_id = run_ids(dir.path())[0].clone();
        let checkpoint = dir.path().join(format!(
            ".portage/checkpoints/{run_id}-checkpoint.json"
        ));
        fs::write(&checkpoint, "{ not json").unwrap();

        portage()
            .current_dir(dir.path())
            .args(["resume", &run_id, "--job", "job.yaml"])
            .assert()
            .code(13)
            .stderr(predicate::str::contains(run_id.as_str()));
    }
}

mod modes_and_force {
    use super::*;

    #[test]
    fn test_scope_mode_stops_before_planning() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "scope");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Scoped 4 artifacts"));

        assert!(dir.path().join(".portage/scopes").read_dir().unwrap().next().is_some());
        assert!(plan_files(dir.path()).is_empty());
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn test_plan_mode_stops_before_the_gate() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "plan");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Plan revision 0"));

        assert_eq!(plan_files(dir.path()).len(), 1);
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn test_mode_flag_overrides_job_mode() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml", "--mode", "scope"])
            .assert()
            .success();
        assert!(plan_files(dir.path()).is_empty());
    }

    #[test]
    fn test_dry_run_writes_nothing_and_stays_incomplete() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml", "--auto-approve", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Dry run complete"));

        assert!(!dir.path().join("output").exists());

        // The registry was not marked: a real run still executes.
        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml", "--auto-approve", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Conversion complete"));
    }

    #[test]
    fn test_resume_of_dry_run_does_the_work_for_real() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml", "--auto-approve", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Dry run complete"));

        // The dry run left no durable state: no checkpoints, no plan, no
        // registry entry, no approval marker. Only the audit log remains.
        assert!(run_ids(dir.path()).is_empty());
        assert!(plan_files(dir.path()).is_empty());
        assert!(!dir.path().join(".portage/registry.json").exists());
        let ids = audit_run_ids(dir.path());
        assert_eq!(ids.len(), 1);

        // Resuming the dry run's id without approval halts at the gate
        // instead of replaying simulated steps as completed work.
        portage()
            .current_dir(dir.path())
            .args(["resume", &ids[0], "--job", "job.yaml"])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("awaiting approval"));
        assert!(!dir.path().join("output").exists());
        assert!(!dir.path().join(".portage/registry.json").exists());

        // Approved, that same resume performs the conversion genuinely.
        portage()
            .current_dir(dir.path())
            .args(["resume", &ids[0], "--job", "job.yaml", "--auto-approve"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Conversion complete"));
        assert!(dir
            .path()
            .join("output/order-history/db/migrations/tables.sql")
            .exists());
        assert!(dir.path().join(".portage/registry.json").exists());
    }

    #[test]
    fn test_force_redoes_a_completed_feature() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml", "--auto-approve"])
            .assert()
            .success();
        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already converted"));
        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml", "--auto-approve", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Conversion complete"));
    }

    #[test]
    fn test_empty_feature_root_is_scoping_error() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("legacy/Empty");
        fs::create_dir_all(&root).unwrap();
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .code(11);
    }
}

mod revision_flow {
    use super::*;

    #[test]
    fn test_revise_clears_approval_and_bumps_revision() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .code(2);
        let run_id = run_ids(dir.path())[0].clone();

        portage()
            .current_dir(dir.path())
            .args(["approve", "--job", "job.yaml"])
            .assert()
            .success();

        portage()
            .current_dir(dir.path())
            .args([
                "revise",
                &run_id,
                "--job",
                "job.yaml",
                "--feedback",
                "merge the backend steps",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("revision 1"));

        let plans = plan_files(dir.path());
        assert_eq!(
            plans,
            vec![
                format!("{run_id}-plan-rev0.json"),
                format!("{run_id}-plan-rev1.json"),
            ]
        );

        // Approval was invalidated: the next resume halts at the gate.
        portage()
            .current_dir(dir.path())
            .args(["resume", &run_id, "--job", "job.yaml"])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("awaiting approval"));
    }

    #[test]
    fn test_revise_without_plan_fails() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        // Scope-only run: no plan artifact exists yet.
        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml", "--mode", "scope"])
            .assert()
            .success();
        let run_id = run_ids(dir.path())[0].clone();

        portage()
            .current_dir(dir.path())
            .args(["revise", &run_id, "--job", "job.yaml", "--feedback", "x"])
            .assert()
            .code(14);
    }
}

mod status_and_jobs {
    use super::*;

    #[test]
    fn test_status_reports_halted_run() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml"])
            .assert()
            .code(2);
        let run_id = run_ids(dir.path())[0].clone();

        portage()
            .current_dir(dir.path())
            .args(["status", &run_id, "--job", "job.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("plan: revision 0"))
            .stdout(predicate::str::contains("approval: pending"))
            .stdout(predicate::str::contains("conversion: not started"));
    }

    #[test]
    fn test_status_reports_completed_run() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        write_job(dir.path(), &root, "full");

        portage()
            .current_dir(dir.path())
            .args(["run", "job.yaml", "--auto-approve"])
            .assert()
            .success();
        let run_id = run_ids(dir.path())[0].clone();

        portage()
            .current_dir(dir.path())
            .args(["status", &run_id, "--job", "job.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("conversion: completed through step index 3"));
    }

    #[test]
    fn test_jobs_lists_valid_and_invalid_descriptors() {
        let dir = TempDir::new().unwrap();
        let root = seed_feature(dir.path());
        let jobs_dir = dir.path().join("jobs");
        fs::create_dir_all(&jobs_dir).unwrap();
        let yaml = format!(
            "pipeline:\n  feature_root: {}\n  mode: full\n",
            root.display()
        );
        fs::write(jobs_dir.join("good.yaml"), yaml).unwrap();
        fs::write(jobs_dir.join("bad.yaml"), "pipeline: 42").unwrap();
        fs::write(jobs_dir.join("notes.txt"), "ignored").unwrap();

        portage()
            .current_dir(dir.path())
            .args(["jobs"])
            .assert()
            .success()
            .stdout(predicate::str::contains("good.yaml"))
            .stdout(predicate::str::contains("OrderHistory"))
            .stdout(predicate::str::contains("bad.yaml"));
    }

    #[test]
    fn test_jobs_missing_directory_is_config_error() {
        let dir = TempDir::new().unwrap();
        portage()
            .current_dir(dir.path())
            .args(["jobs", "nowhere"])
            .assert()
            .code(10);
    }
}
