//! plugsync - keeps server plugins in sync with their latest CI builds.

mod commands;
mod error;
mod logging;
mod settings;
mod single_instance;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use plugsync_platform::AppPaths;

use crate::commands::AppContext;
use crate::error::AppError;
use crate::settings::Settings;
use crate::single_instance::SingleInstance;

#[derive(Parser)]
#[command(name = "plugsync")]
#[command(about = "Install plugin builds from GitHub Actions", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (defaults to settings.json in the config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output regardless of the settings file
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check every repository for a newer build
    Check {
        /// Also install updates for repositories with auto_update enabled
        #[arg(long)]
        download: bool,
    },

    /// Check, then install pending updates
    Update {
        /// Only install the update for this repository key
        key: Option<String>,
    },

    /// Show installed versions and plugin files
    Status,

    /// Keep running and check on the configured interval
    Watch,
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let paths = AppPaths::new()?;
    paths
        .ensure_dirs()
        .map_err(|error| AppError::io("failed to create application directories", error))?;

    let settings_path = cli.config.unwrap_or_else(|| paths.settings_file());
    let settings = Settings::load(&settings_path)?;
    logging::init_logging(
        &paths.log_file(),
        cli.debug || settings.debug_logging,
        settings.max_log_size_bytes,
    );

    let context = AppContext {
        paths,
        settings_path,
        settings,
    };

    if let Command::Status = cli.command {
        return commands::run_status(&context);
    }

    let _instance = SingleInstance::acquire(&context.paths.lock_file())?;
    match cli.command {
        Command::Check { download } => commands::run_check(&context, download).await,
        Command::Update { key } => commands::run_update(&context, key.as_deref()).await,
        Command::Watch => commands::run_watch(&context).await,
        Command::Status => commands::run_status(&context),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("plugsync: {error}");
            ExitCode::FAILURE
        }
    }
}
