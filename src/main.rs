use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kaizen::config::{KaizenConfig, LoggingSection};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "kaizen")]
#[command(version, about = "Autonomous continuous-improvement engine for a codebase")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory holding `.kaizen/` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API and the /ws event stream
    Serve {
        /// Port to serve on (overrides kaizen.toml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable permissive CORS for a local dashboard
        #[arg(long)]
        dev: bool,
    },
    /// Run one improvement session in the foreground
    Run {
        /// Mode: conservative, balanced, aggressive, exploratory
        #[arg(short, long)]
        mode: Option<String>,

        /// Maximum number of iterations
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Session scope (defaults to engine.scope)
        #[arg(long)]
        scope: Option<String>,
    },
    /// Scan the target and create pending improvement jobs
    Analyze {
        #[arg(short, long)]
        mode: Option<String>,

        #[arg(long)]
        scope: Option<String>,
    },
    /// Review and drive improvement jobs
    Jobs {
        #[command(subcommand)]
        command: Option<JobsCommands>,
    },
    /// Show global statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum JobsCommands {
    /// List jobs
    List {
        #[arg(long)]
        scope: Option<String>,
    },
    /// Show a job with its diff and review results
    Show { id: String },
    /// Approve a pending job
    Approve { id: String },
    /// Reject a pending job
    Reject { id: String },
    /// Cancel a job that has not been applied
    Cancel { id: String },
    /// Run the council and architect on an approved job and trial its diff
    Execute { id: String },
    /// Write a completed job's diff to the target
    Apply { id: String },
    /// Archive a finished job
    Cleanup { id: String },
    /// Fail a job stuck in running
    Resolve {
        id: String,
        #[arg(long, default_value = "resolved manually")]
        reason: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default kaizen.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // Config commands must work even when kaizen.toml does not parse.
    if let Commands::Config { command } = &cli.command {
        let _log = kaizen::logging::init(
            &LoggingSection::default(),
            cli.verbose,
            &project_dir.join(kaizen::config::CONFIG_DIR).join("logs"),
        )?;
        return cmd::cmd_config(&project_dir, command.clone());
    }

    let config = KaizenConfig::new(project_dir)?.with_verbose(cli.verbose);
    let _log = kaizen::logging::init(&config.toml.logging, config.verbose, &config.log_dir())?;

    match &cli.command {
        Commands::Serve { port, dev } => cmd::cmd_serve(&config, *port, *dev).await?,
        Commands::Run {
            mode,
            max_iterations,
            scope,
        } => cmd::cmd_run(&config, mode.as_deref(), *max_iterations, scope.as_deref()).await?,
        Commands::Analyze { mode, scope } => {
            cmd::cmd_analyze(&config, mode.as_deref(), scope.as_deref()).await?
        }
        Commands::Jobs { command } => cmd::cmd_jobs(&config, command.clone()).await?,
        Commands::Stats { json } => cmd::cmd_stats(&config, *json).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
