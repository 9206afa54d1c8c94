use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fcip::fcip_config::{CliOverrides, FcipConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "fcip")]
#[command(version, about = "Forensic analysis orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to fcip.toml (defaults to ./fcip.toml, then the user config dir)
    #[arg(long, global = true, env = "FCIP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage backend: memory or sqlite. Overrides fcip.toml.
    #[arg(long, global = true)]
    pub storage: Option<String>,

    /// SQLite database path. Overrides fcip.toml.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Default per-engine timeout in seconds. Overrides fcip.toml.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Log format: pretty or json. Overrides fcip.toml.
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    fn overrides(&self) -> Result<CliOverrides> {
        Ok(CliOverrides {
            storage: self.storage.as_deref().map(str::parse).transpose()?,
            db_path: self.db_path.clone(),
            timeout_secs: self.timeout,
            log_format: self.log_format.as_deref().map(str::parse).transpose()?,
            verbose: self.verbose,
        })
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Answer line-delimited engine requests on stdin with responses on stdout
    Serve,
    /// Run one engine and print its response
    Exec {
        /// Engine id (see `fcip engines`)
        engine: String,

        #[arg(long = "case")]
        case_id: String,

        /// Document id (repeatable)
        #[arg(short, long = "doc")]
        docs: Vec<String>,

        /// Engine options as a JSON object
        #[arg(long)]
        options: Option<String>,
    },
    /// Run a full S.A.M. analysis of a case
    Run {
        #[arg(long = "case")]
        case_id: String,

        /// Document id (repeatable; defaults to every document of the case)
        #[arg(short, long = "doc")]
        docs: Vec<String>,

        /// Restrict ANCHOR to this claim text (repeatable)
        #[arg(long)]
        focus: Vec<String>,

        /// Complete the run after this phase
        #[arg(long)]
        stop_after: Option<String>,

        /// Print progress and results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect stored analysis runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
    /// List registered engines
    Engines,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum RunsCommands {
    /// List stored runs
    List,
    /// Show a run's progress
    Show { run_id: String },
    /// Show the S.A.M. records of a completed run
    Results { run_id: String },
    /// List a run's findings
    Findings { run_id: String },
    /// Show the audit trail of a finding
    Audit {
        run_id: String,
        finding_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Resume a failed or cancelled run
    Resume { run_id: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default fcip.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = match &cli.command {
        // The file may not exist yet.
        Commands::Config {
            command: Some(ConfigCommands::Init),
        } => FcipConfig::default(),
        _ => FcipConfig::load(cli.config.as_deref(), &cli.overrides()?)?,
    };
    let _log_guard = fcip::logging::init(&config.toml.logging, config.verbose)?;

    match &cli.command {
        Commands::Serve => cmd::cmd_serve(&config).await?,
        Commands::Exec {
            engine,
            case_id,
            docs,
            options,
        } => cmd::cmd_exec(&config, engine, case_id, docs, options.as_deref()).await?,
        Commands::Run {
            case_id,
            docs,
            focus,
            stop_after,
            json,
        } => {
            cmd::cmd_run(&config, case_id, docs, focus, stop_after.as_deref(), *json).await?;
        }
        Commands::Runs { command } => cmd::cmd_runs(&config, command.clone()).await?,
        Commands::Engines => cmd::cmd_engines(&config)?,
        Commands::Config { command } => cmd::cmd_config(&cli, &config, command.clone())?,
    }

    Ok(())
}
