/// Run state definitions for the dispatcher lifecycle
///
/// This module defines the lifecycle states a dispatcher moves through and the
/// transitions allowed between them.
use std::fmt;

/// Represents the lifecycle state of a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    /// Dispatcher has been created but never started
    #[default]
    Idle,

    /// Dispatcher is active and admitting new work
    Running,

    /// Dispatcher is active but not admitting new work; in-flight fetches continue
    Paused,

    /// Dispatcher was stopped; no new work is admitted until the next start
    Stopped,
}

impl RunState {
    /// Returns true if the run is active (`Running` or `Paused`)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Returns true if the dispatcher may pop tasks and spawn workers
    pub fn is_dispatching(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if `start()` moves out of this state
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    /// Returns a short lowercase name for this state
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    /// Returns all possible run states
    pub fn all_states() -> Vec<Self> {
        vec![Self::Idle, Self::Running, Self::Paused, Self::Stopped]
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
