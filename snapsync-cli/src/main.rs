// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! snapsync CLI
//!
//! Runs the master, trigger and worker roles of a snapshot cold-start
//! experiment, and plays the controller of a memory-mapped signal file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod cpu_affinity;
mod metrics;

/// snapsync - Completion-barrier coordination for cold-start experiments
#[derive(Parser)]
#[command(name = "snapsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Experiment configuration file path
    #[arg(short, long, default_value = "snapsync.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the master (completion barrier) until Ctrl+C
    Master {
        /// Override the configured RPC listen address
        #[arg(long)]
        listen: Option<String>,
    },

    /// Arm the master and wake every worker, once per round
    Trigger {
        /// Override the configured number of rounds
        #[arg(short, long)]
        rounds: Option<u64>,
    },

    /// Run one worker from the configuration
    Worker {
        /// Worker id as listed under `workers`
        id: String,
    },

    /// Query the master's barrier state
    Status {
        /// Master address (defaults to the trigger's master)
        #[arg(long)]
        master: Option<String>,

        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Control a memory-mapped signal file directly
    Signal {
        #[command(subcommand)]
        action: SignalAction,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file (defaults to --config)
        file: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum SignalAction {
    /// Create the signal file and write the armed byte
    Arm {
        path: PathBuf,
        #[arg(long, default_value = "0")]
        armed: String,
    },

    /// Write a release byte, waking every waiter
    Release {
        path: PathBuf,
        #[arg(long, default_value = "0")]
        armed: String,
        #[arg(long, default_value = "1")]
        byte: String,
    },

    /// Show the current flag byte
    Show { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Master { listen } => commands::master::execute(&cli.config, listen).await,
        Commands::Trigger { rounds } => commands::trigger::execute(&cli.config, rounds).await,
        Commands::Worker { id } => commands::worker::execute(&cli.config, &id).await,
        Commands::Status { master, json } => {
            commands::status::execute(&cli.config, master, json).await
        }
        Commands::Signal { action } => commands::signal::execute(action),
        Commands::Validate { file } => {
            commands::validate::execute(file.as_deref().unwrap_or(&cli.config)).await
        }
    }
}
