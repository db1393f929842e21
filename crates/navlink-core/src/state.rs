//! The tracking lifecycle state machine.
//!
//! ```text
//!            configure            initialize            track
//!   ┌──────┐ ────────► ┌────────────┐ ────────► ┌─────────────┐ ────────► ┌──────────┐
//!   │ None │           │ Configured │           │ Initialized │           │ Tracking │
//!   └──────┘ ◄──────── └────────────┘ ◄──────── └─────────────┘ ◄──────── └──────────┘
//!            deconfigure            uninitialize        stop tracking
//! ```
//!
//! States are totally ordered. A request to move more than one step walks
//! the intermediate states one asynchronous operation at a time; each
//! worker completion advances (or halts) the walk.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the tracking subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// No tracker connection exists.
    None,
    /// Configuration parsed, worker running, tools registered.
    Configured,
    /// Hardware initialized, device claim held.
    Initialized,
    /// Live pose tracking active.
    Tracking,
}

impl TrackingState {
    /// The next state up, if any.
    #[must_use]
    pub const fn up(self) -> Option<Self> {
        match self {
            Self::None => Some(Self::Configured),
            Self::Configured => Some(Self::Initialized),
            Self::Initialized => Some(Self::Tracking),
            Self::Tracking => None,
        }
    }

    /// The next state down, if any.
    #[must_use]
    pub const fn down(self) -> Option<Self> {
        match self {
            Self::None => None,
            Self::Configured => Some(Self::None),
            Self::Initialized => Some(Self::Configured),
            Self::Tracking => Some(Self::Initialized),
        }
    }

    /// Static name for logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Configured => "configured",
            Self::Initialized => "initialized",
            Self::Tracking => "tracking",
        }
    }
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_totally_ordered() {
        assert!(TrackingState::None < TrackingState::Configured);
        assert!(TrackingState::Configured < TrackingState::Initialized);
        assert!(TrackingState::Initialized < TrackingState::Tracking);
    }

    #[test]
    fn up_and_down_are_inverse_steps() {
        let mut state = TrackingState::None;
        let mut seen = vec![state];
        while let Some(next) = state.up() {
            state = next;
            seen.push(state);
        }
        assert_eq!(seen.len(), 4);
        while let Some(next) = state.down() {
            assert_eq!(seen.pop(), Some(state));
            state = next;
        }
        assert_eq!(state, TrackingState::None);
    }
}
