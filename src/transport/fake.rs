//! Scripted in-process transport for session tests
//!
//! [`FakeTransportFactory`] hands out [`FakeTransport`]s that share one
//! script of [`Step`]s. Each `recv` call consumes steps in order: partition
//! events are dispatched through the transport's event sink, records and
//! errors are returned. When the script is empty `recv` stays pending
//! forever, so tests end by cancelling.
//!
//! Every call that reaches a transport is appended to a shared [`Call`] log
//! so tests can assert on subscriptions, closes and commits across
//! recreations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::configuration::ConsumerConfiguration;
use crate::error::TransportError;
use crate::transport::events::{EventSink, SessionEvent};
use crate::transport::{Transport, TransportFactory};
use crate::types::{
    BrokerError, ConsumedRecord, Offset, TopicPartition, TopicPartitionOffset,
    TopicPartitionTimestamp, WatermarkOffsets,
};

/// One scripted action of `recv`.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return this record.
    Record(ConsumedRecord),
    /// Fail with this error.
    Error(TransportError),
    /// Report an assignment, then continue.
    Assign(Vec<TopicPartition>),
    /// Report a revocation, then continue.
    Revoke(Vec<TopicPartitionOffset>),
    /// Report a client error, then continue.
    ClientError(BrokerError),
    /// Report statistics, then continue.
    Statistics(String),
}

/// A call observed by a fake transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Subscribe(Vec<String>),
    Commit(Vec<TopicPartitionOffset>),
    Pause(Vec<TopicPartition>),
    Resume(Vec<TopicPartition>),
    Close,
}

#[derive(Default)]
struct Shared {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Call>>,
    sinks: Mutex<Vec<EventSink>>,
    created: AtomicUsize,
    failing_creates: AtomicUsize,
    revoke_on_close: AtomicBool,
    revoke_on_drop: AtomicBool,
}

/// Factory handing out scripted transports.
#[derive(Clone, Default)]
pub struct FakeTransportFactory {
    shared: Arc<Shared>,
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step to the shared script.
    pub fn push(&self, step: Step) -> &Self {
        self.shared.steps.lock().unwrap().push_back(step);
        self
    }

    /// Appends a record with `payload` to the script.
    pub fn push_record(&self, topic: &str, partition: i32, offset: i64, payload: &str) -> &Self {
        self.push(Step::Record(ConsumedRecord::new(
            topic,
            partition,
            offset,
            payload.as_bytes(),
        )))
    }

    /// Makes the next `count` creations fail.
    pub fn fail_next_creates(&self, count: usize) {
        self.shared.failing_creates.store(count, Ordering::SeqCst);
    }

    /// Makes `close` report a revocation of the current assignment.
    pub fn revoke_on_close(&self) {
        self.shared.revoke_on_close.store(true, Ordering::SeqCst);
    }

    /// Makes the transport report a revocation only when it is dropped,
    /// the way the Kafka client does when its handle is released.
    pub fn revoke_on_drop(&self) {
        self.shared.revoke_on_drop.store(true, Ordering::SeqCst);
    }

    /// Number of transports created so far.
    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// All calls observed so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().unwrap().clone()
    }

    /// Number of observed calls equal to `call`.
    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Sink handed to the most recently created transport.
    pub fn latest_sink(&self) -> Option<EventSink> {
        self.shared.sinks.lock().unwrap().last().cloned()
    }

    /// Sink handed to the `index`-th created transport.
    pub fn sink(&self, index: usize) -> Option<EventSink> {
        self.shared.sinks.lock().unwrap().get(index).cloned()
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(
        &self,
        _configuration: &ConsumerConfiguration,
        sink: EventSink,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let failing = self.shared.failing_creates.load(Ordering::SeqCst);
        if failing > 0 {
            self.shared.failing_creates.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::retriable("broker unreachable"));
        }

        let index = self.shared.created.fetch_add(1, Ordering::SeqCst);
        self.shared.sinks.lock().unwrap().push(sink.clone());
        Ok(Arc::new(FakeTransport {
            shared: self.shared.clone(),
            sink,
            name: format!("fake#consumer-{}", index + 1),
            subscription: Mutex::new(Vec::new()),
            assignment: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A scripted transport.
pub struct FakeTransport {
    shared: Arc<Shared>,
    sink: EventSink,
    name: String,
    subscription: Mutex<Vec<String>>,
    assignment: Mutex<Vec<TopicPartition>>,
    closed: AtomicBool,
}

impl FakeTransport {
    fn record(&self, call: Call) {
        self.shared.calls.lock().unwrap().push(call);
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.record(Call::Subscribe(topics.to_vec()));
        *self.subscription.lock().unwrap() = topics.to_vec();
        Ok(())
    }

    async fn recv(&self) -> Result<ConsumedRecord, TransportError> {
        loop {
            self.ensure_open()?;
            let step = self.shared.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Record(record)) => return Ok(record),
                Some(Step::Error(error)) => return Err(error),
                Some(Step::Assign(partitions)) => {
                    *self.assignment.lock().unwrap() = partitions.clone();
                    self.sink.dispatch(SessionEvent::PartitionsAssigned(partitions));
                }
                Some(Step::Revoke(offsets)) => {
                    self.assignment.lock().unwrap().clear();
                    self.sink.dispatch(SessionEvent::PartitionsRevoked(offsets));
                }
                Some(Step::ClientError(error)) => {
                    self.sink.dispatch(SessionEvent::Error(error));
                }
                Some(Step::Statistics(json)) => {
                    self.sink.dispatch(SessionEvent::Statistics(json));
                }
                None => std::future::pending::<()>().await,
            }
        }
    }

    fn subscription(&self) -> Vec<String> {
        self.subscription.lock().unwrap().clone()
    }

    fn member_id(&self) -> Option<String> {
        Some(format!("{}-member", self.name))
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn position(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<Vec<TopicPartitionOffset>, TransportError> {
        self.ensure_open()?;
        let assignment = self.assignment.lock().unwrap();
        partitions
            .iter()
            .map(|tp| {
                if assignment.contains(tp) {
                    Ok(TopicPartitionOffset::new(tp.topic.clone(), tp.partition, Offset::Offset(0)))
                } else {
                    Err(TransportError::PartitionNotFound(tp.clone()))
                }
            })
            .collect()
    }

    fn watermark_offsets(&self, _partition: &TopicPartition) -> Option<WatermarkOffsets> {
        None
    }

    fn query_watermark_offsets(
        &self,
        _partition: &TopicPartition,
        _timeout: Duration,
    ) -> Result<WatermarkOffsets, TransportError> {
        self.ensure_open()?;
        Ok(WatermarkOffsets { low: 0, high: 10 })
    }

    fn offsets_for_times(
        &self,
        timestamps: &[TopicPartitionTimestamp],
        _timeout: Duration,
    ) -> Result<Vec<TopicPartitionOffset>, TransportError> {
        self.ensure_open()?;
        Ok(timestamps
            .iter()
            .map(|entry| {
                TopicPartitionOffset::new(
                    entry.partition.topic.clone(),
                    entry.partition.partition,
                    Offset::Offset(entry.timestamp_ms),
                )
            })
            .collect())
    }

    fn commit(&self, offsets: &[TopicPartitionOffset]) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.record(Call::Commit(offsets.to_vec()));
        Ok(())
    }

    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.record(Call::Pause(partitions.to_vec()));
        Ok(())
    }

    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.record(Call::Resume(partitions.to_vec()));
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.record(Call::Close);
        if self.shared.revoke_on_close.load(Ordering::SeqCst) {
            let revoked: Vec<TopicPartitionOffset> = self
                .assignment
                .lock()
                .unwrap()
                .drain(..)
                .map(|tp| TopicPartitionOffset::new(tp.topic, tp.partition, Offset::Invalid))
                .collect();
            self.sink.dispatch(SessionEvent::PartitionsRevoked(revoked));
        }
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        if !self.shared.revoke_on_drop.load(Ordering::SeqCst) {
            return;
        }
        let revoked: Vec<TopicPartitionOffset> = self
            .assignment
            .get_mut()
            .unwrap()
            .drain(..)
            .map(|tp| TopicPartitionOffset::new(tp.topic, tp.partition, Offset::Invalid))
            .collect();
        self.sink.dispatch(SessionEvent::PartitionsRevoked(revoked));
    }
}
