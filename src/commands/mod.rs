/*!
Command handlers for the CLI

This module provides the handlers invoked by the CLI entrypoint:

- `consume`     - Run a consumer session and print records as JSON lines
- `show_config` - Print the effective client settings with secrets masked
*/

use crate::config::AppConfig;
use crate::configuration::security::mask_secrets;
use crate::error::Result;
use std::sync::Arc;

// Consume command handler
pub mod consume {
    //! Runs a [`ConsumerSession`] against Kafka until interrupted.
    //!
    //! Each record goes through the configured middlewares; the built-in
    //! middleware prints the record as a JSON line on stdout.

    use super::*;
    use crate::configuration::middleware::{run_middlewares, Middleware, MiddlewareError};
    use crate::error::SessionError;
    use crate::resolver::DependencyResolver;
    use crate::session::ConsumerSession;
    use crate::transport::kafka::KafkaTransportFactory;
    use crate::types::ConsumedRecord;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    /// Prints every record as a single JSON line.
    pub struct PrintRecordMiddleware;

    #[async_trait]
    impl Middleware for PrintRecordMiddleware {
        async fn handle(&self, record: &ConsumedRecord) -> std::result::Result<(), MiddlewareError> {
            println!("{}", serde_json::to_string(&record.to_json())?);
            Ok(())
        }
    }

    /// Applies CLI overrides to the loaded configuration.
    pub fn apply_overrides(config: &mut AppConfig, topics: Vec<String>, group_id: Option<String>) {
        if !topics.is_empty() {
            config.kafka.topics = topics;
        }
        if let Some(group_id) = group_id {
            config.kafka.group_id = Some(group_id);
        }
    }

    /// Start consuming
    ///
    /// # Arguments
    ///
    /// * `config` - Application configuration (consumed)
    /// * `topics` - Topics overriding the configured ones, if non-empty
    /// * `group_id` - Group id overriding the configured one
    /// * `max_records` - Stop after this many records
    ///
    /// # Errors
    ///
    /// Returns error if the consumer configuration is invalid
    pub async fn run_consume(
        mut config: AppConfig,
        topics: Vec<String>,
        group_id: Option<String>,
        max_records: Option<u64>,
    ) -> Result<()> {
        apply_overrides(&mut config, topics, group_id);

        let configuration = config
            .consumer_builder()?
            .add_middlewares(|m| {
                m.add(PrintRecordMiddleware);
            })
            .with_statistics_handler(|json| {
                debug!(bytes = json.len(), "Statistics received");
            })
            .build()?;
        let middlewares = configuration.middlewares().to_vec();

        info!(
            name = %configuration.name(),
            topics = ?configuration.topics(),
            group_id = ?configuration.group_id(),
            "Starting consumer session"
        );

        let session = ConsumerSession::with_options(
            configuration,
            DependencyResolver::empty(),
            Arc::new(KafkaTransportFactory::new()),
            config.session_options(),
        );
        session.on_error(|_, error| {
            warn!(error = %error, fatal = error.fatal, "Kafka client reported an error");
        });
        session.on_partitions_assigned(|_, transport, partitions| {
            info!(
                member_id = ?transport.member_id(),
                count = partitions.len(),
                "Partitions assigned"
            );
        });

        let cancel = CancellationToken::new();
        let signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                signal.cancel();
            }
        });

        let mut consumed: u64 = 0;
        let result = loop {
            if max_records.is_some_and(|max| consumed >= max) {
                break Ok(());
            }
            match session.consume(&cancel).await {
                Ok(record) => {
                    if let Err(e) = run_middlewares(&middlewares, &record).await {
                        warn!(
                            topic = %record.topic,
                            partition = record.partition,
                            offset = record.offset,
                            "Middleware failed: {}",
                            e
                        );
                    }
                    consumed += 1;
                }
                Err(SessionError::Cancelled) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        info!(consumed, status = %session.status(), "Stopping consumer session");
        session.dispose();
        result?;
        Ok(())
    }
}

// Show-config command handler
pub mod show_config {
    //! Prints the client settings a consumer would be created with.

    use super::*;

    /// Renders the effective settings as `key = value` lines.
    ///
    /// # Errors
    ///
    /// Returns error if the consumer configuration is invalid
    pub fn render(config: &AppConfig) -> Result<Vec<String>> {
        let configuration = config.consumer_builder()?.build()?;
        let mut lines = vec![format!("# topics: {}", configuration.topics().join(", "))];
        lines.extend(
            mask_secrets(&configuration.client_settings())
                .into_iter()
                .map(|(key, value)| format!("{} = {}", key, value)),
        );
        Ok(lines)
    }

    /// Print the effective settings to stdout.
    pub fn run_show_config(config: &AppConfig) -> Result<()> {
        for line in render(config)? {
            println!("{}", line);
        }
        Ok(())
    }
}
