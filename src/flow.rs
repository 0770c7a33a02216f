//! Per-assignment flow control.
//!
//! While partitions are assigned, the session owns exactly one
//! [`FlowController`]. It tracks which assigned partitions are paused and
//! forwards pause and resume requests to the transport. A new controller is
//! built for every non-empty assignment and disposed when the assignment is
//! revoked or the transport is torn down.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::configuration::{ConsumerConfiguration, ConsumerInitialState};
use crate::error::TransportError;
use crate::transport::Transport;
use crate::types::TopicPartition;

/// Pause and resume control over the current assignment.
pub trait FlowController: Send + Sync {
    /// Assigned partitions that are currently paused.
    fn paused_partitions(&self) -> Vec<TopicPartition>;

    /// Pauses `partitions`. Partitions outside the assignment are ignored.
    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), TransportError>;

    /// Resumes `partitions`. Partitions that are not paused are ignored.
    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), TransportError>;

    /// Releases the controller. Safe to call more than once.
    fn dispose(&self);
}

/// Everything a factory gets to build a controller.
pub struct FlowContext<'a> {
    pub configuration: &'a ConsumerConfiguration,
    pub transport: Arc<dyn Transport>,
    pub assignment: &'a [TopicPartition],
}

/// Builds a controller for a new assignment.
pub trait FlowControllerFactory: Send + Sync {
    fn create(&self, context: FlowContext<'_>) -> Box<dyn FlowController>;
}

/// Default factory producing [`PartitionFlowController`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct PartitionFlowControllerFactory;

impl FlowControllerFactory for PartitionFlowControllerFactory {
    fn create(&self, context: FlowContext<'_>) -> Box<dyn FlowController> {
        let controller =
            PartitionFlowController::new(context.transport, context.assignment.to_vec());
        if context.configuration.initial_state() == ConsumerInitialState::Paused {
            if let Err(e) = controller.pause(context.assignment) {
                warn!("Failed to pause initial assignment: {}", e);
            }
        }
        Box::new(controller)
    }
}

/// Flow controller over a fixed assignment.
pub struct PartitionFlowController {
    transport: Arc<dyn Transport>,
    assignment: Vec<TopicPartition>,
    paused: Mutex<BTreeSet<TopicPartition>>,
    disposed: AtomicBool,
}

impl PartitionFlowController {
    pub fn new(transport: Arc<dyn Transport>, assignment: Vec<TopicPartition>) -> Self {
        Self {
            transport,
            assignment,
            paused: Mutex::new(BTreeSet::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// The assignment this controller was built for.
    pub fn assignment(&self) -> &[TopicPartition] {
        &self.assignment
    }

    fn ensure_live(&self) -> Result<(), TransportError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl FlowController for PartitionFlowController {
    fn paused_partitions(&self) -> Vec<TopicPartition> {
        self.paused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), TransportError> {
        self.ensure_live()?;
        let mut paused = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        let targets: Vec<TopicPartition> = partitions
            .iter()
            .filter(|tp| self.assignment.contains(tp) && !paused.contains(*tp))
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        self.transport.pause(&targets)?;
        debug!(count = targets.len(), "Paused partitions");
        paused.extend(targets);
        Ok(())
    }

    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), TransportError> {
        self.ensure_live()?;
        let mut paused = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        let targets: Vec<TopicPartition> = partitions
            .iter()
            .filter(|tp| paused.contains(*tp))
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        self.transport.resume(&targets)?;
        debug!(count = targets.len(), "Resumed partitions");
        for tp in &targets {
            paused.remove(tp);
        }
        Ok(())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.paused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::ConsumerConfigurationBuilder;
    use crate::transport::MockTransport;
    use mockall::predicate::eq;

    fn tp(partition: i32) -> TopicPartition {
        TopicPartition::new("orders", partition)
    }

    fn controller(mock: MockTransport) -> PartitionFlowController {
        PartitionFlowController::new(Arc::new(mock), vec![tp(0), tp(1), tp(2)])
    }

    #[test]
    fn test_pause_ignores_unassigned_and_already_paused() {
        let mut mock = MockTransport::new();
        mock.expect_pause()
            .with(eq(vec![tp(0)]))
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_pause()
            .with(eq(vec![tp(1)]))
            .times(1)
            .returning(|_| Ok(()));
        let controller = controller(mock);

        controller.pause(&[tp(0), tp(9)]).unwrap();
        controller.pause(&[tp(0), tp(1)]).unwrap();
        controller.pause(&[tp(9)]).unwrap();

        assert_eq!(controller.paused_partitions(), vec![tp(0), tp(1)]);
    }

    #[test]
    fn test_resume_only_paused() {
        let mut mock = MockTransport::new();
        mock.expect_pause().times(1).returning(|_| Ok(()));
        mock.expect_resume()
            .with(eq(vec![tp(2)]))
            .times(1)
            .returning(|_| Ok(()));
        let controller = controller(mock);

        controller.pause(&[tp(2)]).unwrap();
        controller.resume(&[tp(0), tp(2)]).unwrap();
        controller.resume(&[tp(2)]).unwrap();

        assert!(controller.paused_partitions().is_empty());
    }

    #[test]
    fn test_transport_failure_leaves_state_unchanged() {
        let mut mock = MockTransport::new();
        mock.expect_pause()
            .returning(|_| Err(TransportError::retriable("Local: Erroneous state")));
        let controller = controller(mock);

        assert!(controller.pause(&[tp(0)]).is_err());
        assert!(controller.paused_partitions().is_empty());
    }

    #[test]
    fn test_dispose_is_idempotent_and_rejects_calls() {
        let mut mock = MockTransport::new();
        mock.expect_pause().times(1).returning(|_| Ok(()));
        let controller = controller(mock);
        controller.pause(&[tp(0)]).unwrap();

        controller.dispose();
        controller.dispose();

        assert!(controller.paused_partitions().is_empty());
        assert_eq!(controller.pause(&[tp(1)]), Err(TransportError::Closed));
        assert_eq!(controller.resume(&[tp(0)]), Err(TransportError::Closed));
    }

    #[test]
    fn test_factory_pauses_assignment_when_initially_paused() {
        let configuration = ConsumerConfigurationBuilder::new()
            .topic("orders")
            .with_initial_state(ConsumerInitialState::Paused)
            .build()
            .unwrap();
        let mut mock = MockTransport::new();
        mock.expect_pause()
            .with(eq(vec![tp(0), tp(1)]))
            .times(1)
            .returning(|_| Ok(()));
        let transport: Arc<dyn Transport> = Arc::new(mock);
        let assignment = vec![tp(0), tp(1)];

        let controller = PartitionFlowControllerFactory.create(FlowContext {
            configuration: &configuration,
            transport,
            assignment: &assignment,
        });

        assert_eq!(controller.paused_partitions(), assignment);
    }

    #[test]
    fn test_factory_running_state_pauses_nothing() {
        let configuration = ConsumerConfigurationBuilder::new()
            .topic("orders")
            .build()
            .unwrap();
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new());
        let assignment = vec![tp(0)];

        let controller = PartitionFlowControllerFactory.create(FlowContext {
            configuration: &configuration,
            transport,
            assignment: &assignment,
        });

        assert!(controller.paused_partitions().is_empty());
    }
}
