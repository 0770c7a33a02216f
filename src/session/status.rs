//! Consumer run status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse run status derived from the assignment and flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerStatus {
    /// Nothing is assigned.
    Stopped,
    /// Every assigned partition is flowing.
    Running,
    /// Every assigned partition is paused.
    Paused,
    /// Some assigned partitions are paused.
    PartiallyRunning,
}

impl ConsumerStatus {
    /// Derives the status from the number of paused and assigned partitions.
    ///
    /// `paused` is `None` when there is no flow controller. A flow
    /// controller only exists while partitions are assigned.
    ///
    /// ```rust
    /// use ksession::session::ConsumerStatus;
    ///
    /// assert_eq!(ConsumerStatus::derive(None, 0), ConsumerStatus::Stopped);
    /// assert_eq!(ConsumerStatus::derive(Some(1), 3), ConsumerStatus::PartiallyRunning);
    /// ```
    pub fn derive(paused: Option<usize>, assigned: usize) -> Self {
        match paused {
            None => Self::Stopped,
            Some(0) => Self::Running,
            Some(paused) if paused == assigned => Self::Paused,
            Some(_) => Self::PartiallyRunning,
        }
    }
}

impl fmt::Display for ConsumerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::PartiallyRunning => "partially_running",
        };
        f.write_str(s)
    }
}
