//! Instance lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle state of a live agent instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    /// Constructed, `started` hook not finished yet
    Starting,

    /// Accepting envelopes
    Running,

    /// Terminate received, draining and running the `stopped` hook
    Stopping,

    /// Fully deactivated and removed from the live table
    Stopped,
}

impl InstanceState {
    /// Check if the instance has finished its lifecycle
    pub fn is_stopped(&self) -> bool {
        matches!(self, InstanceState::Stopped)
    }

    /// Check if the instance can still be handed envelopes
    pub fn is_live(&self) -> bool {
        matches!(self, InstanceState::Starting | InstanceState::Running)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Starting => write!(f, "Starting"),
            InstanceState::Running => write!(f, "Running"),
            InstanceState::Stopping => write!(f, "Stopping"),
            InstanceState::Stopped => write!(f, "Stopped"),
        }
    }
}
