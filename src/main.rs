use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use adw::config::AdwConfig;
use adw::exit_codes;
use adw::logging::{self, LogFormat};
use adw::state::{IssueNumber, Phase, WorkflowId};

mod cmd;

#[derive(Parser)]
#[command(name = "adw")]
#[command(version, about = "AI developer workflow: issue to pull request through plan, build, test, review and document")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Console log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[arg(long, global = true, env = "ADW_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify the issue, write a plan, create the branch and open the PR
    Plan {
        issue: IssueNumber,
        #[arg(long)]
        workflow_id: Option<WorkflowId>,
    },
    /// Implement the plan of an existing workflow
    Build { issue: IssueNumber, workflow_id: WorkflowId },
    /// Run tests with automatic resolution and retry
    Test { issue: IssueNumber, workflow_id: WorkflowId },
    /// Review the implementation against the plan
    Review { issue: IssueNumber, workflow_id: WorkflowId },
    /// Generate documentation and finish the workflow
    Document { issue: IssueNumber, workflow_id: WorkflowId },
    /// Plan then build
    PlanBuild {
        issue: IssueNumber,
        #[arg(long)]
        workflow_id: Option<WorkflowId>,
    },
    /// Plan, build, then test
    PlanBuildTest {
        issue: IssueNumber,
        #[arg(long)]
        workflow_id: Option<WorkflowId>,
    },
    /// Full pipeline: plan, build, test, review, document
    Sdlc {
        issue: IssueNumber,
        #[arg(long)]
        workflow_id: Option<WorkflowId>,
    },
    /// Run the webhook listener and dispatch workflows
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Poll the repository for new issues and keyword comments
    Poll {
        /// Seconds between polls
        #[arg(long)]
        interval: Option<u64>,
        /// Run a single poll cycle and wait for dispatched workflows
        #[arg(long)]
        once: bool,
    },
    /// Show one workflow, or all active workflows
    Status {
        workflow_id: Option<WorkflowId>,
        /// Include completed and failed workflows
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Mark a workflow FAILED without running anything
    Abandon {
        workflow_id: WorkflowId,
        #[arg(long, default_value = "abandoned by operator")]
        reason: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

impl Commands {
    fn is_long_running(&self) -> bool {
        matches!(self, Commands::Serve { .. } | Commands::Poll { once: false, .. })
    }
}

async fn run(cli: Cli) -> Result<()> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = AdwConfig::load(&project_dir)?;

    let log_dir = cli.command.is_long_running().then(|| config.state_dir.clone());
    let _guard = logging::init(cli.verbose, cli.log_format, log_dir.as_deref());

    match &cli.command {
        Commands::Plan { issue, workflow_id } => {
            cmd::cmd_phase(&config, *issue, workflow_id.as_ref(), Phase::Plan).await
        }
        Commands::Build { issue, workflow_id } => {
            cmd::cmd_phase(&config, *issue, Some(workflow_id), Phase::Build).await
        }
        Commands::Test { issue, workflow_id } => {
            cmd::cmd_phase(&config, *issue, Some(workflow_id), Phase::Test).await
        }
        Commands::Review { issue, workflow_id } => {
            cmd::cmd_phase(&config, *issue, Some(workflow_id), Phase::Review).await
        }
        Commands::Document { issue, workflow_id } => {
            cmd::cmd_phase(&config, *issue, Some(workflow_id), Phase::Document).await
        }
        Commands::PlanBuild { issue, workflow_id } => {
            cmd::cmd_phase(&config, *issue, workflow_id.as_ref(), Phase::Build).await
        }
        Commands::PlanBuildTest { issue, workflow_id } => {
            cmd::cmd_phase(&config, *issue, workflow_id.as_ref(), Phase::Test).await
        }
        Commands::Sdlc { issue, workflow_id } => {
            cmd::cmd_phase(&config, *issue, workflow_id.as_ref(), Phase::Document).await
        }
        Commands::Serve { port } => cmd::cmd_serve(&config, *port).await,
        Commands::Poll { interval, once } => cmd::cmd_poll(&config, *interval, *once).await,
        Commands::Status {
            workflow_id,
            all,
            json,
        } => cmd::cmd_status(&config, workflow_id.as_ref(), *all, *json),
        Commands::Abandon {
            workflow_id,
            reason,
        } => cmd::cmd_abandon(&config, workflow_id, reason).await,
        Commands::Config { command } => cmd::cmd_config(&project_dir, &config, command.clone()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::from(exit_codes::OK),
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            ExitCode::from(exit_codes::for_error(&e))
        }
    }
}
