//! Command-line interface definition for ksession
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand};

/// ksession - resilient Kafka consumer session
///
/// Consume records from Kafka topics through a self-healing consumer
/// session, or inspect the effective client configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "ksession")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "KSESSION_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Consume records and print them as JSON lines
    Consume {
        /// Topic to subscribe to (repeatable, overrides the config file)
        #[arg(short, long = "topic")]
        topics: Vec<String>,

        /// Consumer group id (overrides the config file)
        #[arg(short, long)]
        group_id: Option<String>,

        /// Stop after this many records
        #[arg(short = 'n', long)]
        max_records: Option<u64>,

        /// Emit logs as JSON
        #[arg(long)]
        json_logs: bool,
    },

    /// Print the effective client settings with secrets masked
    ShowConfig,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
