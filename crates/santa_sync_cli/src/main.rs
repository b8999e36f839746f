//! santactl
//!
//! Operator tool and sync daemon for santa-sync.
//!
//! # Commands
//!
//! - `status` - Show sync state, rule counts and queued events
//! - `sync` - Run one full sync now, optionally a clean one
//! - `pending` - List events waiting for upload
//! - `daemon` - Run the sync scheduler until interrupted

mod commands;
mod error;
mod http;

use clap::{Parser, Subcommand, ValueEnum};
use error::CliError;
use santa_sync_protocol::MachineInfo;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// santa-sync command-line tools.
#[derive(Parser)]
#[command(name = "santactl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the event queue, rules and sync state
    #[arg(global = true, short = 'd', long, default_value = "/var/db/santa-sync")]
    state_dir: PathBuf,

    /// Sync server base URL
    #[arg(global = true, short, long)]
    server: Option<String>,

    /// Machine serial number reported to the server
    #[arg(global = true, long)]
    serial: Option<String>,

    /// Host name reported to the server
    #[arg(global = true, long, default_value = "localhost")]
    hostname: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sync state, rule counts and queued events
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Run one full sync now
    Sync {
        /// Discard local rules and download all of them again
        #[arg(short, long)]
        clean: bool,
    },

    /// List events waiting for upload
    Pending {
        /// Maximum number of events to list
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Run the sync scheduler until interrupted
    Daemon {
        /// Log file to upload when the server asks for logs (repeatable)
        #[arg(long = "log-file")]
        log_files: Vec<PathBuf>,
    },

    /// Show version information
    Version,
}

impl Cli {
    fn server(&self) -> Result<&str, CliError> {
        self.server.as_deref().ok_or(CliError::MissingArg("--server"))
    }

    fn machine(&self) -> Result<MachineInfo, CliError> {
        let serial = self.serial.clone().ok_or(CliError::MissingArg("--serial"))?;
        Ok(MachineInfo {
            serial,
            hostname: self.hostname.clone(),
            santa_version: env!("CARGO_PKG_VERSION").to_string(),
            os_version: std::env::consts::OS.to_string(),
            os_build: std::env::consts::ARCH.to_string(),
            primary_user: std::env::var("USER").ok(),
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Status { format } => {
            commands::status::run(&cli.state_dir, *format)?;
        }
        Commands::Sync { clean } => {
            let setup = commands::Setup::new(&cli.state_dir, cli.server()?, cli.machine()?)?;
            commands::sync::run(&setup, *clean)?;
        }
        Commands::Pending { limit, format } => {
            commands::pending::run(&cli.state_dir, *limit, *format)?;
        }
        Commands::Daemon { log_files } => {
            let setup = commands::Setup::new(&cli.state_dir, cli.server()?, cli.machine()?)?;
            commands::daemon::run(setup, log_files.clone())?;
        }
        Commands::Version => {
            println!("santactl v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
