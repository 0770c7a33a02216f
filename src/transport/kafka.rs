//! Kafka transport backed by `rdkafka`.
//!
//! [`KafkaTransportFactory`] builds a [`StreamConsumer`] from the
//! configuration's client settings. Client callbacks are routed through
//! [`SessionContext`] into the session's [`EventSink`]:
//!
//! - revocations are reported before the client gives the partitions up,
//!   together with the positions `recv` reached on them;
//! - assignments are reported once the client has applied them;
//! - client errors and raw statistics are forwarded unchanged.
//!
//! Once [`Transport::close`] has been called, rebalances are no longer
//! forwarded: the session revokes the assignment of a consumer it tears
//! down, and the client's own final revocation only arrives when the last
//! handle is dropped.
//!
//! Statistics also feed a [`WatermarkCache`] so that
//! [`Transport::watermark_offsets`] can answer without a broker round trip.

use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers};
use rdkafka::{ClientContext, Message, TopicPartitionList};
use tracing::{debug, info, warn};

use crate::configuration::ConsumerConfiguration;
use crate::error::TransportError;
use crate::transport::events::{EventSink, SessionEvent};
use crate::transport::{Transport, TransportFactory};
use crate::types::{
    BrokerError, ConsumedRecord, Offset, RecordHeader, TopicPartition, TopicPartitionOffset,
    TopicPartitionTimestamp, WatermarkOffsets,
};

impl From<KafkaError> for TransportError {
    fn from(error: KafkaError) -> Self {
        TransportError::Kafka {
            fatal: error.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal),
            message: error.to_string(),
        }
    }
}

impl From<rdkafka::Offset> for Offset {
    fn from(offset: rdkafka::Offset) -> Self {
        match offset {
            rdkafka::Offset::Beginning => Offset::Beginning,
            rdkafka::Offset::End => Offset::End,
            rdkafka::Offset::Stored => Offset::Stored,
            rdkafka::Offset::Invalid => Offset::Invalid,
            rdkafka::Offset::Offset(value) => Offset::Offset(value),
            rdkafka::Offset::OffsetTail(value) => Offset::Tail(value),
        }
    }
}

impl From<Offset> for rdkafka::Offset {
    fn from(offset: Offset) -> Self {
        match offset {
            Offset::Beginning => rdkafka::Offset::Beginning,
            Offset::End => rdkafka::Offset::End,
            Offset::Stored => rdkafka::Offset::Stored,
            Offset::Invalid => rdkafka::Offset::Invalid,
            Offset::Offset(value) => rdkafka::Offset::Offset(value),
            Offset::Tail(value) => rdkafka::Offset::OffsetTail(value),
        }
    }
}

/// Watermarks last seen in client statistics, per partition.
#[derive(Debug, Default)]
pub struct WatermarkCache {
    entries: Mutex<HashMap<TopicPartition, WatermarkOffsets>>,
}

impl WatermarkCache {
    /// Returns the cached watermarks of `partition`.
    pub fn get(&self, partition: &TopicPartition) -> Option<WatermarkOffsets> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(partition)
            .copied()
    }

    /// Stores watermarks for `partition`.
    pub fn set(&self, partition: TopicPartition, watermarks: WatermarkOffsets) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(partition, watermarks);
    }

    /// Updates the cache from a statistics JSON document.
    ///
    /// Reads `topics.<topic>.partitions.<id>.{lo_offset,hi_offset}`. The
    /// internal `-1` partition and negative (unknown) offsets are skipped.
    /// Malformed documents are ignored.
    pub fn update_from_statistics(&self, json: &str) {
        let value: serde_json::Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => {
                debug!("Ignoring unparseable statistics: {}", e);
                return;
            }
        };

        let Some(topics) = value.get("topics").and_then(|t| t.as_object()) else {
            return;
        };

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (topic, stats) in topics {
            let Some(partitions) = stats.get("partitions").and_then(|p| p.as_object()) else {
                continue;
            };
            for (id, partition) in partitions {
                let Ok(id) = id.parse::<i32>() else {
                    continue;
                };
                if id < 0 {
                    continue;
                }
                let low = partition.get("lo_offset").and_then(|v| v.as_i64());
                let high = partition.get("hi_offset").and_then(|v| v.as_i64());
                if let (Some(low), Some(high)) = (low, high) {
                    if low >= 0 && high >= 0 {
                        entries.insert(TopicPartition::new(topic.clone(), id), WatermarkOffsets { low, high });
                    }
                }
            }
        }
    }
}

/// Next offsets to consume, per partition, as seen by `recv`.
///
/// Stands in for the client position when a revocation is reported, since
/// the rebalance callback has no access to the consumer.
#[derive(Debug, Default)]
pub struct PositionTracker {
    next: Mutex<HashMap<TopicPartition, i64>>,
}

impl PositionTracker {
    /// Records that `record` was handed out.
    pub fn track(&self, record: &ConsumedRecord) {
        self.next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.topic_partition(), record.offset + 1);
    }

    /// Tracked position of `partition`.
    pub fn get(&self, partition: &TopicPartition) -> Option<i64> {
        self.next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(partition)
            .copied()
    }

    /// Revoked partitions with their tracked positions, falling back to the
    /// offset carried by the revocation. Forgets the revoked partitions.
    pub fn take_revoked(&self, revoked: &TopicPartitionList) -> Vec<TopicPartitionOffset> {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        revoked
            .elements()
            .iter()
            .map(|elem| {
                let offset = next
                    .remove(&TopicPartition::new(elem.topic(), elem.partition()))
                    .map(Offset::Offset)
                    .unwrap_or_else(|| elem.offset().into());
                TopicPartitionOffset::new(elem.topic(), elem.partition(), offset)
            })
            .collect()
    }
}

/// Client context that forwards callbacks to the session.
pub struct SessionContext {
    sink: EventSink,
    watermarks: Arc<WatermarkCache>,
    positions: PositionTracker,
    closing: AtomicBool,
}

impl SessionContext {
    /// Creates a context reporting into `sink`.
    pub fn new(sink: EventSink, watermarks: Arc<WatermarkCache>) -> Self {
        Self {
            sink,
            watermarks,
            positions: PositionTracker::default(),
            closing: AtomicBool::new(false),
        }
    }

    /// Stops forwarding rebalances. The session revokes the assignment of
    /// a closing consumer itself.
    fn begin_close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

impl ClientContext for SessionContext {
    fn stats_raw(&self, statistics: &[u8]) {
        let json = String::from_utf8_lossy(statistics).into_owned();
        self.watermarks.update_from_statistics(&json);
        self.sink.dispatch(SessionEvent::Statistics(json));
    }

    fn error(&self, error: KafkaError, reason: &str) {
        let code = error.rdkafka_error_code();
        let broker_error = BrokerError {
            code: code
                .map(|c| format!("{:?}", c))
                .unwrap_or_else(|| "Unknown".to_string()),
            reason: reason.to_string(),
            fatal: code == Some(RDKafkaErrorCode::Fatal),
        };
        warn!(error = %broker_error, "Kafka client error");
        self.sink.dispatch(SessionEvent::Error(broker_error));
    }
}

impl ConsumerContext for SessionContext {
    fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                let revoked = self.positions.take_revoked(tpl);
                if self.is_closing() {
                    debug!(count = revoked.len(), "Consumer closing, revocation already reported");
                    return;
                }
                info!(count = revoked.len(), "Partitions revoked");
                self.sink.dispatch(SessionEvent::PartitionsRevoked(revoked));
            }
            Rebalance::Assign(_) => {}
            Rebalance::Error(e) => {
                warn!("Rebalance error: {}", e);
                self.sink.dispatch(SessionEvent::Error(BrokerError {
                    code: "Rebalance".to_string(),
                    reason: e.to_string(),
                    fatal: false,
                }));
            }
        }
    }

    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        if let Rebalance::Assign(tpl) = rebalance {
            if self.is_closing() {
                return;
            }
            let assigned = topic_partitions(tpl);
            info!(count = assigned.len(), "Partitions assigned");
            self.sink.dispatch(SessionEvent::PartitionsAssigned(assigned));
        }
    }
}

fn topic_partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect()
}

fn topic_partition_offsets(tpl: &TopicPartitionList) -> Vec<TopicPartitionOffset> {
    tpl.elements()
        .iter()
        .map(|elem| TopicPartitionOffset::new(elem.topic(), elem.partition(), elem.offset().into()))
        .collect()
}

fn partition_list(partitions: &[TopicPartition]) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::with_capacity(partitions.len());
    for tp in partitions {
        tpl.add_partition(&tp.topic, tp.partition);
    }
    tpl
}

fn offset_list(offsets: &[TopicPartitionOffset]) -> Result<TopicPartitionList, TransportError> {
    let mut tpl = TopicPartitionList::with_capacity(offsets.len());
    for tpo in offsets {
        tpl.add_partition_offset(&tpo.topic, tpo.partition, tpo.offset.into())?;
    }
    Ok(tpl)
}

fn to_record(message: &BorrowedMessage<'_>) -> ConsumedRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| RecordHeader {
                    key: header.key.to_string(),
                    value: header.value.map(<[u8]>::to_vec),
                })
                .collect()
        })
        .unwrap_or_default();

    ConsumedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
        timestamp_ms: message.timestamp().to_millis(),
        headers,
    }
}

/// Transport over an `rdkafka` stream consumer.
pub struct KafkaTransport {
    consumer: StreamConsumer<SessionContext>,
    watermarks: Arc<WatermarkCache>,
    closed: AtomicBool,
}

impl KafkaTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;
        Ok(())
    }

    async fn recv(&self) -> Result<ConsumedRecord, TransportError> {
        self.ensure_open()?;
        match self.consumer.recv().await {
            Ok(message) => {
                let record = to_record(&message);
                self.consumer.context().positions.track(&record);
                Ok(record)
            }
            Err(e) => {
                let mut error = TransportError::from(e);
                if let Some((code, reason)) = self.consumer.client().fatal_error() {
                    error = TransportError::fatal(format!("{:?}: {}", code, reason));
                }
                Err(error)
            }
        }
    }

    fn subscription(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        if let Ok(tpl) = self.consumer.subscription() {
            for elem in tpl.elements() {
                if !topics.iter().any(|t| t == elem.topic()) {
                    topics.push(elem.topic().to_string());
                }
            }
        }
        topics
    }

    fn member_id(&self) -> Option<String> {
        let native = self.consumer.client().native_ptr();
        // SAFETY: the handle is live for the lifetime of the consumer. The
        // returned string is owned by us and released with rd_kafka_mem_free.
        unsafe {
            let ptr = rdkafka::bindings::rd_kafka_memberid(native);
            if ptr.is_null() {
                return None;
            }
            let member_id = CStr::from_ptr(ptr).to_string_lossy().into_owned();
            rdkafka::bindings::rd_kafka_mem_free(native, ptr.cast());
            if member_id.is_empty() {
                None
            } else {
                Some(member_id)
            }
        }
    }

    fn name(&self) -> String {
        let native = self.consumer.client().native_ptr();
        // SAFETY: rd_kafka_name returns a string owned by the live handle.
        unsafe {
            CStr::from_ptr(rdkafka::bindings::rd_kafka_name(native))
                .to_string_lossy()
                .into_owned()
        }
    }

    fn position(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<Vec<TopicPartitionOffset>, TransportError> {
        self.ensure_open()?;
        let all = self.consumer.position()?;
        partitions
            .iter()
            .map(|tp| {
                all.find_partition(&tp.topic, tp.partition)
                    .map(|elem| {
                        TopicPartitionOffset::new(tp.topic.clone(), tp.partition, elem.offset().into())
                    })
                    .ok_or_else(|| TransportError::PartitionNotFound(tp.clone()))
            })
            .collect()
    }

    fn watermark_offsets(&self, partition: &TopicPartition) -> Option<WatermarkOffsets> {
        self.watermarks.get(partition)
    }

    fn query_watermark_offsets(
        &self,
        partition: &TopicPartition,
        timeout: Duration,
    ) -> Result<WatermarkOffsets, TransportError> {
        self.ensure_open()?;
        let (low, high) =
            self.consumer
                .fetch_watermarks(&partition.topic, partition.partition, timeout)?;
        let watermarks = WatermarkOffsets { low, high };
        self.watermarks.set(partition.clone(), watermarks);
        Ok(watermarks)
    }

    fn offsets_for_times(
        &self,
        timestamps: &[TopicPartitionTimestamp],
        timeout: Duration,
    ) -> Result<Vec<TopicPartitionOffset>, TransportError> {
        self.ensure_open()?;
        let mut tpl = TopicPartitionList::with_capacity(timestamps.len());
        for entry in timestamps {
            tpl.add_partition_offset(
                &entry.partition.topic,
                entry.partition.partition,
                rdkafka::Offset::Offset(entry.timestamp_ms),
            )?;
        }
        let result = self.consumer.offsets_for_times(tpl, timeout)?;
        Ok(topic_partition_offsets(&result))
    }

    fn commit(&self, offsets: &[TopicPartitionOffset]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let tpl = offset_list(offsets)?;
        self.consumer.commit(&tpl, CommitMode::Sync)?;
        Ok(())
    }

    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.consumer.pause(&partition_list(partitions))?;
        Ok(())
    }

    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.consumer.resume(&partition_list(partitions))?;
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Closing Kafka consumer");
        self.consumer.context().begin_close();
        self.consumer.unsubscribe();
    }
}

/// Creates [`KafkaTransport`]s from the configuration's client settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct KafkaTransportFactory;

impl KafkaTransportFactory {
    /// Creates a new factory.
    pub fn new() -> Self {
        Self
    }
}

impl TransportFactory for KafkaTransportFactory {
    fn create(
        &self,
        configuration: &ConsumerConfiguration,
        sink: EventSink,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let watermarks = Arc::new(WatermarkCache::default());
        let context = SessionContext::new(sink, watermarks.clone());
        let consumer: StreamConsumer<SessionContext> = configuration
            .client_config()
            .create_with_context(context)?;

        info!(
            brokers = %configuration.brokers(),
            name = %configuration.name(),
            "Created Kafka consumer"
        );

        Ok(Arc::new(KafkaTransport {
            consumer,
            watermarks,
            closed: AtomicBool::new(false),
        }))
    }
}
