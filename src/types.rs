//! Broker-facing value types.
//!
//! Topic-partitions, offsets, watermarks and consumed records as seen by the
//! session. They are deliberately independent of the Kafka client so that
//! handlers and flow controllers can be written and tested without it.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A topic name and partition index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Topic name.
    pub topic: String,
    /// Partition index.
    pub partition: i32,
}

impl TopicPartition {
    /// Creates a new topic-partition.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ksession::types::TopicPartition;
    ///
    /// let tp = TopicPartition::new("orders", 2);
    /// assert_eq!(tp.to_string(), "orders[2]");
    /// ```
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// A position within a partition, including the logical positions the
/// broker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Offset {
    /// Start of the partition.
    Beginning,
    /// End of the partition.
    End,
    /// Last committed offset of the group.
    Stored,
    /// No valid offset.
    Invalid,
    /// A concrete offset.
    Offset(i64),
    /// The given number of messages before the end.
    Tail(i64),
}

impl Offset {
    /// Returns the concrete offset value, if any.
    pub fn value(&self) -> Option<i64> {
        match self {
            Self::Offset(value) => Some(*value),
            _ => None,
        }
    }
}

/// A topic-partition together with an offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPartitionOffset {
    /// Topic name.
    pub topic: String,
    /// Partition index.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: Offset,
}

impl TopicPartitionOffset {
    /// Creates a new topic-partition-offset.
    pub fn new(topic: impl Into<String>, partition: i32, offset: Offset) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    /// Returns the topic-partition part.
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// A topic-partition together with a timestamp, used for time based offset
/// lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPartitionTimestamp {
    /// Partition to look up.
    pub partition: TopicPartition,
    /// Timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl TopicPartitionTimestamp {
    /// Creates a new lookup entry.
    pub fn new(partition: TopicPartition, timestamp_ms: i64) -> Self {
        Self {
            partition,
            timestamp_ms,
        }
    }
}

/// Low and high watermark offsets of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkOffsets {
    /// Lowest available offset.
    pub low: i64,
    /// Offset of the next message to be produced.
    pub high: i64,
}

/// A message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Header key.
    pub key: String,
    /// Header value, absent for null headers.
    pub value: Option<Vec<u8>>,
}

/// A record returned by [`crate::session::ConsumerSession::consume`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedRecord {
    /// Topic the record was read from.
    pub topic: String,
    /// Partition the record was read from.
    pub partition: i32,
    /// Offset of the record.
    pub offset: i64,
    /// Record key.
    pub key: Option<Vec<u8>>,
    /// Record payload.
    pub payload: Option<Vec<u8>>,
    /// Record timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: Option<i64>,
    /// Record headers in wire order.
    #[serde(default)]
    pub headers: Vec<RecordHeader>,
}

impl ConsumedRecord {
    /// Creates a record with a payload and no key, timestamp or headers.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: Some(payload.to_vec()),
            timestamp_ms: None,
            headers: Vec::new(),
        }
    }

    /// Returns the topic-partition the record belongs to.
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Returns the offset to commit once this record is processed.
    pub fn next_offset(&self) -> TopicPartitionOffset {
        TopicPartitionOffset::new(self.topic.clone(), self.partition, Offset::Offset(self.offset + 1))
    }

    /// Returns the record timestamp as a UTC date-time.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp_ms
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }

    /// Renders the record as JSON with key and payload decoded lossily.
    pub fn to_json(&self) -> serde_json::Value {
        let text = |bytes: &Option<Vec<u8>>| {
            bytes
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
        };
        serde_json::json!({
            "topic": self.topic,
            "partition": self.partition,
            "offset": self.offset,
            "key": text(&self.key),
            "payload": text(&self.payload),
            "timestamp": self.timestamp().map(|ts| ts.to_rfc3339()),
            "headers": self.headers.iter().map(|h| h.key.clone()).collect::<Vec<_>>(),
        })
    }
}

/// An error reported by the broker or client through the error callback.
///
/// These are data delivered to error handlers, never session failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerError {
    /// Client error code name.
    pub code: String,
    /// Human-readable reason.
    pub reason: String,
    /// Whether the client flagged the error as fatal.
    pub fatal: bool,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.reason)
    }
}
