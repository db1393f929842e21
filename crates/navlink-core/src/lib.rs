//! Lifecycle management for pose-tracking hardware.
//!
//! The crate drives a tracking device through a strictly ordered state
//! machine and keeps a registry of the tools it reports:
//!
//! ```text
//!   none ──> configured ──> initialized ──> tracking
//!    ^           │              │               │
//!    └───────────┴──────────────┴───────────────┘
//!           (walked back down one step at a time)
//! ```
//!
//! [`LifecycleController`] is the entry point. `set_state` requests a walk
//! toward a target state; hardware operations run on a dedicated worker
//! thread and their completions are applied by pumping the controller, so
//! transitions advance one asynchronous step at a time and failures halt
//! the walk at the last state that still holds.
//!
//! Besides the state machine the crate provides:
//! - a [`registry::ToolRegistry`] with an always-present manual tool,
//! - [`dominant`]-tool selection driven by capability priority,
//! - [`playback`] of recorded tool motion through clock-driven proxies,
//! - incremental [`history`] persistence as JSON lines,
//! - a [`device`] claim seam for serial-port symlinks.

pub mod config;
pub mod controller;
pub mod device;
pub mod dominant;
pub mod error;
pub mod events;
pub mod history;
pub mod playback;
pub mod registry;
pub mod state;
pub mod tool;
pub mod transform;
pub mod worker;

pub use config::{Settings, TrackerConfig};
pub use controller::LifecycleController;
pub use error::TrackingError;
pub use events::TrackingEvent;
pub use playback::PlaybackClock;
pub use registry::ToolRegistry;
pub use state::TrackingState;
pub use tool::{Capability, CapabilitySet, Tool, ToolHandle, TrackedTool};
pub use transform::{TimestampMs, Transform3D};
