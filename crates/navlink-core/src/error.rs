//! Error taxonomy for the lifecycle core.
//!
//! Everything here is non-fatal to the process: the controller reports
//! failures through the event hub and returns to its last known-good
//! state. The only hard rejection is acting on a worker that does not
//! exist or starting a second transition while one is in flight.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::state::TrackingState;

/// Errors surfaced by the lifecycle controller and its collaborators.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// The configuration file is missing, unreadable, or invalid.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The hardware device file was not found, not writable, or the
    /// symlink claim failed. Halts the walk at `configured`.
    #[error("device access failed: {reason}")]
    DeviceAccess {
        /// What went wrong.
        reason: String,
    },

    /// An operation required a running worker but none exists.
    #[error("tracker worker is not running")]
    WorkerUnavailable,

    /// A second state transition was requested while one is in flight.
    #[error("a transition is already in flight (current state: {current})")]
    TransitionInFlight {
        /// The controller's state when the request was rejected.
        current: TrackingState,
    },

    /// The worker thread did not stop cooperatively within the bounded
    /// wait and was abandoned.
    #[error("worker thread did not stop within {waited:?}; abandoned")]
    ThreadTimeout {
        /// How long the controller waited before giving up.
        waited: Duration,
    },

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),

    /// Reading or writing the position-history file failed.
    #[error("position history I/O failed: {0}")]
    Persistence(#[from] std::io::Error),
}
