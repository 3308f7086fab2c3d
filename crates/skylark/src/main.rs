// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Skylark - command-line tools for the Skylark messaging runtime.
//!
//! Validates configuration and inspects the chat history database.

mod history;
mod tracing_setup;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use skylark_config::SkylarkConfig;
use skylark_storage::ChatHistoryStore;
use tracing::{debug, error};

use crate::history::{HistoryCommand, run_history};

/// Skylark - messaging runtime tools.
#[derive(Parser, Debug)]
#[command(name = "skylark", version, about, long_about = None)]
struct Cli {
    /// Load this configuration file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate the configuration.
    Check,
    /// Inspect or edit the chat history database.
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
}

fn load_config(path: Option<&PathBuf>) -> Option<SkylarkConfig> {
    let loaded = match path {
        Some(path) => skylark_config::load_and_validate_path(path),
        None => skylark_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => Some(config),
        Err(errors) => {
            eprint!("{}", skylark_config::render_report(&errors));
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(config) = load_config(cli.config.as_ref()) else {
        return ExitCode::FAILURE;
    };
    tracing_setup::init_tracing(&config.runtime.log_level);
    debug!(database = %config.storage.database_path, "configuration loaded");

    match cli.command {
        Commands::Check => {
            println!("skylark: configuration ok (history at {})", config.storage.database_path);
            ExitCode::SUCCESS
        }
        Commands::History { command } => {
            let result = async {
                let store = ChatHistoryStore::open(&config).await?;
                let outcome = run_history(&store, command, &mut std::io::stdout().lock()).await;
                store.close().await?;
                outcome
            }
            .await;
            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %e, "history command failed");
                    eprintln!("skylark: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
