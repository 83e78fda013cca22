//! Error types for machine configuration and the worker task.

use crate::tree::StateId;

/// Errors surfaced synchronously while wiring up a machine, before it runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `start` was called without a prior `set_initial_state`.
    #[error("no initial state has been set")]
    NoInitialState,
    /// The given id does not belong to a state registered with this machine.
    #[error("state {0} is not registered with this machine")]
    UnknownState(StateId),
    /// `add_state` named a parent that has not been registered yet.
    ///
    /// Parents must be added before their children, which also rules out
    /// cycles in the hierarchy.
    #[error("parent state {0} is not registered with this machine")]
    UnknownParent(StateId),
}

/// Error type returned by the machine's background task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The worker task panicked (a hook fault) or was cancelled.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
