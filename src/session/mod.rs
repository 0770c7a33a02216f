//! Consumer session lifecycle.
//!
//! A [`ConsumerSession`] owns at most one live transport at a time and
//! keeps it healthy:
//!
//! - the transport is created and subscribed lazily on the first
//!   [`ConsumerSession::consume`] call;
//! - a fatal transport error tears the transport down, waits a fixed
//!   backoff and recreates it on the next loop iteration;
//! - non-fatal errors are logged and the pull is retried immediately;
//! - cancellation ends a pending pull or backoff right away.
//!
//! Partition assignments reported by the transport create a
//! [`FlowController`] for the new assignment; revocations and teardown
//! dispose it. Registered handlers are invoked in registration order.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ksession::configuration::ConsumerConfigurationBuilder;
//! use ksession::resolver::DependencyResolver;
//! use ksession::session::ConsumerSession;
//! use ksession::transport::kafka::KafkaTransportFactory;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let configuration = ConsumerConfigurationBuilder::new()
//!     .with_brokers("localhost:9092")
//!     .topic("orders")
//!     .with_group_id("order-processors")
//!     .build()?;
//!
//! let session = ConsumerSession::new(
//!     configuration,
//!     DependencyResolver::empty(),
//!     Arc::new(KafkaTransportFactory::new()),
//! );
//! session.on_partitions_assigned(|_, _, partitions| {
//!     println!("assigned {} partitions", partitions.len());
//! });
//!
//! let cancel = CancellationToken::new();
//! let record = session.consume(&cancel).await?;
//! println!("{}", record.to_json());
//! session.dispose();
//! # Ok(())
//! # }
//! ```

pub mod handlers;
pub mod status;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::configuration::ConsumerConfiguration;
use crate::error::{SessionError, TransportError};
use crate::flow::{FlowContext, FlowController, FlowControllerFactory, PartitionFlowControllerFactory};
use crate::resolver::DependencyResolver;
use crate::transport::events::{EventReceiver, EventSink, SessionEvent};
use crate::transport::{Transport, TransportFactory};
use crate::types::{
    BrokerError, ConsumedRecord, Offset, TopicPartition, TopicPartitionOffset,
    TopicPartitionTimestamp, WatermarkOffsets,
};

pub use handlers::{
    ErrorHandler, PartitionsAssignedHandler, PartitionsRevokedHandler, StatisticsHandler,
};
pub use status::ConsumerStatus;

use handlers::{ConfiguredAssignedHandler, ConfiguredRevokedHandler, ConfiguredStatisticsHandler};

/// Wait between tearing down a failed transport and creating a new one.
pub const DEFAULT_FATAL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Tunables of a [`ConsumerSession`].
#[derive(Clone)]
pub struct SessionOptions {
    /// Wait after a fatal error or a failed transport creation.
    pub fatal_error_backoff: Duration,
    /// Builds the flow controller for every non-empty assignment.
    pub flow_controller_factory: Arc<dyn FlowControllerFactory>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            fatal_error_backoff: DEFAULT_FATAL_ERROR_BACKOFF,
            flow_controller_factory: Arc::new(PartitionFlowControllerFactory),
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("fatal_error_backoff", &self.fatal_error_backoff)
            .finish_non_exhaustive()
    }
}

enum TransportState {
    Uninitialized,
    Active(Arc<dyn Transport>),
    Invalidated,
}

struct SessionState {
    transport: TransportState,
    generation: u64,
    assignment: Vec<TopicPartition>,
    flow: Option<Arc<dyn FlowController>>,
}

#[derive(Default)]
struct Handlers {
    assigned: RwLock<Vec<Arc<dyn PartitionsAssignedHandler>>>,
    revoked: RwLock<Vec<Arc<dyn PartitionsRevokedHandler>>>,
    errors: RwLock<Vec<Arc<dyn ErrorHandler>>>,
    statistics: RwLock<Vec<Arc<dyn StatisticsHandler>>>,
}

fn snapshot<T: ?Sized>(handlers: &RwLock<Vec<Arc<T>>>) -> Vec<Arc<T>> {
    handlers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn register<T: ?Sized>(handlers: &RwLock<Vec<Arc<T>>>, handler: Arc<T>) {
    handlers
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(handler);
}

struct SessionInner {
    configuration: ConsumerConfiguration,
    resolver: DependencyResolver,
    transport_factory: Arc<dyn TransportFactory>,
    options: SessionOptions,
    state: Mutex<SessionState>,
    handlers: Handlers,
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        match &self.lock_state().transport {
            TransportState::Active(transport) => Some(transport.clone()),
            _ => None,
        }
    }

    /// Returns the live transport, creating and subscribing one if needed.
    fn ensure_transport(self: &Arc<Self>) -> Result<Arc<dyn Transport>, TransportError> {
        let generation = {
            let mut state = self.lock_state();
            if let TransportState::Active(transport) = &state.transport {
                return Ok(transport.clone());
            }
            state.generation += 1;
            state.generation
        };

        let receiver: Weak<SessionInner> = Arc::downgrade(self);
        let sink = EventSink::new(generation, receiver);
        let transport = self.transport_factory.create(&self.configuration, sink.clone())?;
        sink.bind(&transport);

        {
            let mut state = self.lock_state();
            if state.generation != generation {
                drop(state);
                debug!(generation, "Discarding transport created concurrently");
                transport.close();
                return self.current_transport().ok_or(TransportError::Closed);
            }
            state.transport = TransportState::Active(transport.clone());
        }

        info!(
            generation,
            name = %transport.name(),
            topics = ?self.configuration.topics(),
            "Consumer created, subscribing"
        );
        transport.subscribe(self.configuration.topics())?;
        Ok(transport)
    }

    /// Closes the current transport and forgets the assignment.
    ///
    /// Idempotent. The transport may report a final revocation while it
    /// closes; otherwise the revocation handlers are run here with the
    /// positions read just before closing. Either way they run once and the
    /// flow controller is disposed once.
    fn invalidate(&self) {
        let (transport, assignment) = {
            let mut state = self.lock_state();
            let transport = match std::mem::replace(&mut state.transport, TransportState::Invalidated) {
                TransportState::Active(transport) => Some(transport),
                TransportState::Uninitialized | TransportState::Invalidated => None,
            };
            (transport, state.assignment.clone())
        };

        if let Some(transport) = &transport {
            let revoked = if assignment.is_empty() {
                Vec::new()
            } else {
                revocation_offsets(transport.as_ref(), &assignment)
            };

            debug!(name = %transport.name(), "Closing consumer");
            transport.close();

            let still_assigned = !self.lock_state().assignment.is_empty();
            if still_assigned && !revoked.is_empty() {
                info!(partitions = ?revoked, "Revoking assignment of closed consumer");
                self.notify_revoked(transport, &revoked);
            }
        }

        let flow = {
            let mut state = self.lock_state();
            state.assignment.clear();
            state.flow.take()
        };
        if let Some(flow) = flow {
            flow.dispose();
        }
        drop(transport);
    }

    fn notify_revoked(&self, transport: &Arc<dyn Transport>, partitions: &[TopicPartitionOffset]) {
        for handler in snapshot(&self.handlers.revoked) {
            handler.on_partitions_revoked(&self.resolver, transport.as_ref(), partitions);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_state().generation == generation
    }

    fn on_partitions_assigned(
        &self,
        generation: u64,
        transport: &Arc<dyn Transport>,
        partitions: Vec<TopicPartition>,
    ) {
        let previous = {
            let mut state = self.lock_state();
            if state.generation != generation
                || !matches!(state.transport, TransportState::Active(_))
            {
                debug!(generation, "Ignoring assignment from stale consumer");
                return;
            }
            let previous = state.flow.take();
            if !partitions.is_empty() {
                let flow = self.options.flow_controller_factory.create(FlowContext {
                    configuration: &self.configuration,
                    transport: transport.clone(),
                    assignment: &partitions,
                });
                state.flow = Some(Arc::from(flow));
            }
            state.assignment = partitions.clone();
            previous
        };
        if let Some(previous) = previous {
            previous.dispose();
        }

        info!(partitions = ?partitions, "Partitions assigned");
        for handler in snapshot(&self.handlers.assigned) {
            handler.on_partitions_assigned(&self.resolver, transport.as_ref(), &partitions);
        }
    }

    fn on_partitions_revoked(
        &self,
        generation: u64,
        transport: &Arc<dyn Transport>,
        partitions: Vec<TopicPartitionOffset>,
    ) {
        if !self.is_current(generation) {
            debug!(generation, "Ignoring revocation from stale consumer");
            return;
        }

        info!(partitions = ?partitions, "Partitions revoked");
        self.notify_revoked(transport, &partitions);

        let flow = {
            let mut state = self.lock_state();
            if state.generation != generation {
                return;
            }
            state.assignment.clear();
            state.flow.take()
        };
        if let Some(flow) = flow {
            flow.dispose();
        }
    }

    fn on_error(&self, generation: u64, transport: &Arc<dyn Transport>, error: BrokerError) {
        if !self.is_current(generation) {
            return;
        }
        for handler in snapshot(&self.handlers.errors) {
            handler.on_error(transport.as_ref(), &error);
        }
    }

    fn on_statistics(&self, generation: u64, transport: &Arc<dyn Transport>, json: String) {
        if !self.is_current(generation) {
            return;
        }
        for handler in snapshot(&self.handlers.statistics) {
            handler.on_statistics(transport.as_ref(), &json);
        }
    }
}

/// Positions of `partitions`, or `Invalid` offsets when the transport
/// cannot tell.
fn revocation_offsets(
    transport: &dyn Transport,
    partitions: &[TopicPartition],
) -> Vec<TopicPartitionOffset> {
    transport.position(partitions).unwrap_or_else(|e| {
        debug!(error = %e, "Positions unavailable, revoking without offsets");
        partitions
            .iter()
            .map(|tp| TopicPartitionOffset::new(tp.topic.clone(), tp.partition, Offset::Invalid))
            .collect()
    })
}

impl EventReceiver for SessionInner {
    fn receive(&self, generation: u64, transport: &Arc<dyn Transport>, event: SessionEvent) {
        match event {
            SessionEvent::PartitionsAssigned(partitions) => {
                self.on_partitions_assigned(generation, transport, partitions)
            }
            SessionEvent::PartitionsRevoked(partitions) => {
                self.on_partitions_revoked(generation, transport, partitions)
            }
            SessionEvent::Error(error) => self.on_error(generation, transport, error),
            SessionEvent::Statistics(json) => self.on_statistics(generation, transport, json),
        }
    }
}

/// Long-lived consumer session.
///
/// Dropping the session closes its transport.
pub struct ConsumerSession {
    inner: Arc<SessionInner>,
}

impl ConsumerSession {
    /// Creates a session with default options. No transport is created
    /// until the first [`Self::consume`].
    pub fn new(
        configuration: ConsumerConfiguration,
        resolver: DependencyResolver,
        transport_factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self::with_options(
            configuration,
            resolver,
            transport_factory,
            SessionOptions::default(),
        )
    }

    /// Creates a session with explicit options.
    ///
    /// Handlers declared on the configuration are registered first, in
    /// their declaration order.
    pub fn with_options(
        configuration: ConsumerConfiguration,
        resolver: DependencyResolver,
        transport_factory: Arc<dyn TransportFactory>,
        options: SessionOptions,
    ) -> Self {
        let handlers = Handlers::default();
        for callback in configuration.partitions_assigned_handlers() {
            register(
                &handlers.assigned,
                Arc::new(ConfiguredAssignedHandler(callback.clone())),
            );
        }
        for callback in configuration.partitions_revoked_handlers() {
            register(
                &handlers.revoked,
                Arc::new(ConfiguredRevokedHandler(callback.clone())),
            );
        }
        for callback in configuration.statistics_handlers() {
            register(
                &handlers.statistics,
                Arc::new(ConfiguredStatisticsHandler(callback.clone())),
            );
        }

        Self {
            inner: Arc::new(SessionInner {
                configuration,
                resolver,
                transport_factory,
                options,
                state: Mutex::new(SessionState {
                    transport: TransportState::Uninitialized,
                    generation: 0,
                    assignment: Vec::new(),
                    flow: None,
                }),
                handlers,
            }),
        }
    }

    /// Returns the next record.
    ///
    /// Creates and subscribes the transport if there is none. Fatal
    /// transport errors and failed creations recreate the transport after
    /// [`SessionOptions::fatal_error_backoff`]; other errors are retried
    /// immediately. Neither is surfaced to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Cancelled`] once `cancel` fires, whether
    /// the session is waiting for a record or backing off.
    pub async fn consume(&self, cancel: &CancellationToken) -> Result<ConsumedRecord, SessionError> {
        loop {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            let transport = match self.inner.ensure_transport() {
                Ok(transport) => transport,
                Err(e) => {
                    error!(error = %e, "Failed to start Kafka consumer, retrying after backoff");
                    self.inner.invalidate();
                    self.backoff(cancel).await?;
                    continue;
                }
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                result = transport.recv() => result,
            };
            drop(transport);

            match result {
                Ok(record) => return Ok(record),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Kafka consumer fatal error occurred, recreating consumer");
                    self.inner.invalidate();
                    self.backoff(cancel).await?;
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                }
            }
        }
    }

    async fn backoff(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            _ = tokio::time::sleep(self.inner.options.fatal_error_backoff) => Ok(()),
        }
    }

    /// Closes the transport and releases the assignment. Idempotent.
    ///
    /// A later [`Self::consume`] creates a fresh transport.
    pub fn dispose(&self) {
        self.inner.invalidate();
    }

    /// Registers a handler for partition assignments.
    pub fn register_partitions_assigned_handler(&self, handler: Arc<dyn PartitionsAssignedHandler>) {
        register(&self.inner.handlers.assigned, handler);
    }

    /// Registers a handler for partition revocations.
    pub fn register_partitions_revoked_handler(&self, handler: Arc<dyn PartitionsRevokedHandler>) {
        register(&self.inner.handlers.revoked, handler);
    }

    /// Registers a handler for client errors.
    pub fn register_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        register(&self.inner.handlers.errors, handler);
    }

    /// Registers a handler for statistics.
    pub fn register_statistics_handler(&self, handler: Arc<dyn StatisticsHandler>) {
        register(&self.inner.handlers.statistics, handler);
    }

    /// Registers a closure for partition assignments.
    pub fn on_partitions_assigned<F>(&self, handler: F)
    where
        F: Fn(&DependencyResolver, &dyn Transport, &[TopicPartition]) + Send + Sync + 'static,
    {
        self.register_partitions_assigned_handler(Arc::new(handler));
    }

    /// Registers a closure for partition revocations.
    pub fn on_partitions_revoked<F>(&self, handler: F)
    where
        F: Fn(&DependencyResolver, &dyn Transport, &[TopicPartitionOffset]) + Send + Sync + 'static,
    {
        self.register_partitions_revoked_handler(Arc::new(handler));
    }

    /// Registers a closure for client errors.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&dyn Transport, &BrokerError) + Send + Sync + 'static,
    {
        self.register_error_handler(Arc::new(handler));
    }

    /// Registers a closure for statistics.
    pub fn on_statistics<F>(&self, handler: F)
    where
        F: Fn(&dyn Transport, &str) + Send + Sync + 'static,
    {
        self.register_statistics_handler(Arc::new(handler));
    }

    fn connected(&self) -> Result<Arc<dyn Transport>, SessionError> {
        self.inner
            .current_transport()
            .ok_or(SessionError::NotConnected)
    }

    /// Current positions of `partitions`.
    pub fn position(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<Vec<TopicPartitionOffset>, SessionError> {
        Ok(self.connected()?.position(partitions)?)
    }

    /// Cached watermarks of `partition`. `None` without a transport.
    pub fn watermark_offsets(&self, partition: &TopicPartition) -> Option<WatermarkOffsets> {
        self.inner.current_transport()?.watermark_offsets(partition)
    }

    /// Watermarks of `partition` queried from the broker.
    pub fn query_watermark_offsets(
        &self,
        partition: &TopicPartition,
        timeout: Duration,
    ) -> Result<WatermarkOffsets, SessionError> {
        Ok(self.connected()?.query_watermark_offsets(partition, timeout)?)
    }

    /// Offsets for the given timestamps.
    pub fn offsets_for_times(
        &self,
        timestamps: &[TopicPartitionTimestamp],
        timeout: Duration,
    ) -> Result<Vec<TopicPartitionOffset>, SessionError> {
        Ok(self.connected()?.offsets_for_times(timestamps, timeout)?)
    }

    /// Synchronously commits `offsets`.
    pub fn commit(&self, offsets: &[TopicPartitionOffset]) -> Result<(), SessionError> {
        Ok(self.connected()?.commit(offsets)?)
    }

    /// Current subscription, or `None` without a transport.
    pub fn subscription(&self) -> Option<Vec<String>> {
        self.inner
            .current_transport()
            .map(|transport| transport.subscription())
    }

    /// Currently assigned partitions.
    pub fn assignment(&self) -> Vec<TopicPartition> {
        self.inner.lock_state().assignment.clone()
    }

    /// Current run status.
    pub fn status(&self) -> ConsumerStatus {
        let (flow, assigned) = {
            let state = self.inner.lock_state();
            (state.flow.clone(), state.assignment.len())
        };
        ConsumerStatus::derive(flow.map(|f| f.paused_partitions().len()), assigned)
    }

    /// Group member id, once joined.
    pub fn member_id(&self) -> Option<String> {
        self.inner.current_transport()?.member_id()
    }

    /// Client instance name of the live transport.
    pub fn client_instance_name(&self) -> Option<String> {
        self.inner
            .current_transport()
            .map(|transport| transport.name())
    }

    /// The configuration this session runs with.
    pub fn configuration(&self) -> &ConsumerConfiguration {
        &self.inner.configuration
    }

    /// The resolver handed to partition handlers.
    pub fn resolver(&self) -> &DependencyResolver {
        &self.inner.resolver
    }

    fn flow(&self) -> Result<Arc<dyn FlowController>, SessionError> {
        self.inner
            .lock_state()
            .flow
            .clone()
            .ok_or(SessionError::NotAssigned)
    }

    /// Pauses assigned `partitions`.
    pub fn pause(&self, partitions: &[TopicPartition]) -> Result<(), SessionError> {
        Ok(self.flow()?.pause(partitions)?)
    }

    /// Resumes paused `partitions`.
    pub fn resume(&self, partitions: &[TopicPartition]) -> Result<(), SessionError> {
        Ok(self.flow()?.resume(partitions)?)
    }

    /// Assigned partitions that are paused.
    pub fn paused_partitions(&self) -> Vec<TopicPartition> {
        self.flow()
            .map(|flow| flow.paused_partitions())
            .unwrap_or_default()
    }
}

impl Drop for ConsumerSession {
    fn drop(&mut self) {
        self.inner.invalidate();
    }
}

impl fmt::Debug for ConsumerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerSession")
            .field("name", &self.inner.configuration.name())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
