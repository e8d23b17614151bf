use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskboard::board::reorder::ReorderStrategy;
use taskboard::config::{ConfigOverrides, LoggingSection, TaskboardConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Kanban task board server")]
pub struct Cli {
    /// Path to a taskboard.toml. Defaults to ./taskboard.toml, then the user config directory.
    #[arg(short, long, global = true, env = "TASKBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter such as "debug" or "taskboard=trace". RUST_LOG takes precedence.
    #[arg(long, global = true, env = "TASKBOARD_LOG")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the board HTTP server
    Serve {
        /// Address to listen on
        #[arg(long, env = "TASKBOARD_BIND")]
        bind: Option<String>,

        /// Database path
        #[arg(long, env = "TASKBOARD_DB")]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS for a separately served front-end)
        #[arg(long)]
        dev: bool,

        /// How neighbour tasks react to a move: fractional or shift
        #[arg(long)]
        strategy: Option<ReorderStrategy>,
    },
    /// Create the database and run migrations without serving
    Init {
        /// Database path
        #[arg(long, env = "TASKBOARD_DB")]
        db_path: Option<PathBuf>,
    },
    /// View or create configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default taskboard.toml to the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides {
            log_level: self.log_level.clone(),
            log_json: self.log_json.then_some(true),
            ..Default::default()
        };
        match &self.command {
            Commands::Serve {
                bind,
                db_path,
                dev,
                strategy,
            } => {
                overrides.bind_addr = bind.clone();
                overrides.db_path = db_path.clone();
                overrides.dev_mode = dev.then_some(true);
                overrides.strategy = *strategy;
            }
            Commands::Init { db_path } => overrides.db_path = db_path.clone(),
            Commands::Config { .. } => {}
        }
        overrides
    }
}

fn init_tracing(logging: &LoggingSection) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = std::env::current_dir().context("Failed to get current directory")?;
    let config = TaskboardConfig::discover(cli.config.as_deref(), &project_dir)?
        .with_overrides(&cli.overrides());

    init_tracing(&config.logging);

    match &cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(&config).await?,
        Commands::Init { .. } => cmd::cmd_init(&config)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, &config, command.clone())?,
    }

    Ok(())
}
