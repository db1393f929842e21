//! Outbound notifications for UI and visualization collaborators.
//!
//! The controller publishes every externally visible change through an
//! event hub. Subscribers get a plain mpsc receiver; senders whose
//! receiver has gone away are pruned on the next emit.

use std::sync::mpsc::{channel, Receiver, Sender};

use crate::state::TrackingState;

/// A notification emitted by the lifecycle controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    /// The lifecycle state changed.
    StateChanged(TrackingState),
    /// Configure completed and the tool registry was populated.
    Configured,
    /// The tracker connection was torn down.
    Deconfigured,
    /// Hardware initialization completed (also emitted on playback entry).
    Initialized,
    /// Hardware was uninitialized.
    Uninitialized,
    /// Live tracking started.
    TrackingStarted,
    /// Live tracking stopped.
    TrackingStopped,
    /// A different tool became dominant.
    DominantToolChanged {
        /// Uid of the new dominant tool.
        uid: String,
    },
    /// A tool's visibility flag flipped.
    ToolVisibility {
        /// Uid of the tool.
        uid: String,
        /// New visibility.
        visible: bool,
    },
    /// The tooltip offset changed.
    TooltipOffsetChanged(f64),
    /// A non-fatal problem was reported (configuration, device access,
    /// persistence).
    Warning(String),
}

/// Fan-out of [`TrackingEvent`]s to any number of subscribers.
#[derive(Default)]
pub struct EventHub {
    subscribers: Vec<Sender<TrackingEvent>>,
}

impl EventHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> Receiver<TrackingEvent> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&mut self, event: &TrackingEvent) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
