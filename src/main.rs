use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use portage::errors::PipelineError;
use portage::job::Mode;

mod cmd;

use cmd::run::RunOverrides;

#[derive(Parser)]
#[command(name = "portage")]
#[command(version, about = "Resumable legacy-feature conversion pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding pipeline state (.portage) and default output.
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a conversion run from a job file
    Run {
        job: PathBuf,
        /// Override the job's mode (scope|plan|full)
        #[arg(long)]
        mode: Option<Mode>,
        /// Redo a feature the registry says is already converted
        #[arg(long)]
        force: bool,
        /// Execute without writing output files
        #[arg(long)]
        dry_run: bool,
        /// Skip the approval gate (unattended runs)
        #[arg(long)]
        auto_approve: bool,
        /// Per-step generation timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Resume a previous run by id
    Resume {
        run_id: String,
        #[arg(short, long)]
        job: PathBuf,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        auto_approve: bool,
        /// Per-step generation timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Approve the current plan by writing the approval marker
    Approve {
        #[arg(short, long)]
        job: PathBuf,
        /// Who approved: human or agent
        #[arg(long)]
        by: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Remove the approval marker
    Revoke {
        #[arg(short, long)]
        job: PathBuf,
    },
    /// Revise the plan from reviewer feedback (clears approval)
    Revise {
        run_id: String,
        #[arg(short, long)]
        job: PathBuf,
        #[arg(long)]
        feedback: String,
    },
    /// Show a run's persisted state
    Status {
        run_id: String,
        #[arg(short, long)]
        job: PathBuf,
    },
    /// List job files in a directory
    Jobs {
        #[arg(default_value = "jobs")]
        dir: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "portage=debug" } else { "portage=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let base_dir = match cli.base_dir.clone() {
        Some(dir) => dir,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("{} failed to get current directory: {e}", style("error:").red());
                std::process::exit(1);
            }
        },
    };

    let result: Result<i32, PipelineError> = match &cli.command {
        Commands::Run {
            job,
            mode,
            force,
            dry_run,
            auto_approve,
            timeout,
        } => {
            let overrides = RunOverrides {
                mode: *mode,
                force: *force,
                dry_run: *dry_run,
                auto_approve: *auto_approve,
                timeout: *timeout,
            };
            cmd::cmd_run(&base_dir, job, overrides).await
        }
        Commands::Resume {
            run_id,
            job,
            dry_run,
            auto_approve,
            timeout,
        } => {
            let overrides = RunOverrides {
                dry_run: *dry_run,
                auto_approve: *auto_approve,
                timeout: *timeout,
                ..Default::default()
            };
            cmd::cmd_resume(&base_dir, job, run_id, overrides).await
        }
        Commands::Approve { job, by, notes } => {
            cmd::cmd_approve(&base_dir, job, by.as_deref(), notes.as_deref())
        }
        Commands::Revoke { job } => cmd::cmd_revoke(&base_dir, job),
        Commands::Revise {
            run_id,
            job,
            feedback,
        } => cmd::cmd_revise(&base_dir, job, run_id, feedback).await,
        Commands::Status { run_id, job } => cmd::cmd_status(&base_dir, job, run_id),
        Commands::Jobs { dir } => cmd::cmd_jobs(dir),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            std::process::exit(e.exit_code());
        }
    }
}
