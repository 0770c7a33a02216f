//! Events a transport reports to the session that owns it.

use std::sync::{Arc, OnceLock, Weak};

use tracing::debug;

use crate::transport::Transport;
use crate::types::{BrokerError, TopicPartition, TopicPartitionOffset};

/// Something a transport observed outside the record stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The group assigned these partitions to this member.
    PartitionsAssigned(Vec<TopicPartition>),
    /// These partitions were taken away, with their last positions.
    PartitionsRevoked(Vec<TopicPartitionOffset>),
    /// The client reported an error.
    Error(BrokerError),
    /// Raw statistics JSON.
    Statistics(String),
}

pub(crate) trait EventReceiver: Send + Sync {
    fn receive(&self, generation: u64, transport: &Arc<dyn Transport>, event: SessionEvent);
}

/// Channel from one transport instance back to its session.
///
/// A sink is tagged with the generation of the transport it was created
/// for. Events from a transport the session has already replaced are
/// dropped by the session. The sink holds no strong references, so a
/// dropped session or transport silently swallows late events.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    generation: u64,
    receiver: Weak<dyn EventReceiver>,
    transport: OnceLock<Weak<dyn Transport>>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, receiver: Weak<dyn EventReceiver>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                generation,
                receiver,
                transport: OnceLock::new(),
            }),
        }
    }

    /// Attaches the transport this sink reports for. Only the first call
    /// has an effect.
    pub(crate) fn bind(&self, transport: &Arc<dyn Transport>) {
        let _ = self.inner.transport.set(Arc::downgrade(transport));
    }

    /// Generation of the transport this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Delivers `event` to the session.
    pub fn dispatch(&self, event: SessionEvent) {
        let Some(receiver) = self.inner.receiver.upgrade() else {
            debug!(generation = self.inner.generation, "Session gone, dropping event");
            return;
        };
        let Some(transport) = self.inner.transport.get().and_then(Weak::upgrade) else {
            debug!(
                generation = self.inner.generation,
                "Transport not bound or dropped, dropping event"
            );
            return;
        };
        receiver.receive(self.inner.generation, &transport, event);
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.inner.generation)
            .field("bound", &self.inner.transport.get().is_some())
            .finish()
    }
}
