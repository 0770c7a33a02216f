//! ksession - resilient Kafka consumer session CLI
//!
#![doc = "Main entry point for the ksession application."]

use anyhow::Result;

use ksession::cli::{Cli, Commands};
use ksession::commands;
use ksession::config::AppConfig;
use ksession::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/ksession.yaml");
    let mut config = AppConfig::load(config_path, &cli)?;

    if let Commands::Consume { json_logs: true, .. } = &cli.command {
        config.logging.json_format = true;
    }

    init_logging(&config.logging)?;
    tracing::debug!(path = %config_path, "Configuration loaded");

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Consume {
            topics,
            group_id,
            max_records,
            json_logs: _,
        } => {
            tracing::info!("Starting consume mode");
            commands::consume::run_consume(config, topics, group_id, max_records).await?;
            Ok(())
        }
        Commands::ShowConfig => {
            commands::show_config::run_show_config(&config)?;
            Ok(())
        }
    }
}
