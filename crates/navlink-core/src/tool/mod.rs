//! Tool entities: capability sets, pose state and position history.
//!
//! A tool is a tracked physical or simulated object. Capabilities are an
//! explicit set of tags queried with [`CapabilitySet::contains`]; there is no
//! type hierarchy to downcast through. Tool handles are shared with consumers
//! by `Arc`, but mutation only happens on the orchestrating thread (live
//! updates applied by the controller, or playback sync).

pub mod filter;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::transform::{TimestampMs, Transform3D};

pub use filter::PositionFilter;

/// The uid of the always-present software-simulated tool.
pub const MANUAL_TOOL_UID: &str = "manual";

/// The pseudo-uid that resolves to the current dominant tool.
pub const ACTIVE_TOOL_UID: &str = "active";

/// A single tool capability tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Software-simulated, user-driven tool.
    Manual,
    /// Pointer / stylus instrument.
    Pointer,
    /// Spatial reference frame for the other tools.
    Reference,
    /// Ultrasound probe.
    UltrasoundProbe,
}

impl Capability {
    const fn bit(self) -> u8 {
        match self {
            Self::Manual => 1,
            Self::Pointer => 1 << 1,
            Self::Reference => 1 << 2,
            Self::UltrasoundProbe => 1 << 3,
        }
    }
}

/// A non-exclusive set of capability tags, stored as a bitset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// A set containing exactly one capability.
    #[must_use]
    pub const fn single(capability: Capability) -> Self {
        Self(capability.bit())
    }

    /// Add a capability to the set.
    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    /// Whether the set carries the given capability.
    #[must_use]
    pub const fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Self::empty();
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (capability, label) in [
            (Capability::Manual, "manual"),
            (Capability::Pointer, "pointer"),
            (Capability::Reference, "reference"),
            (Capability::UltrasoundProbe, "us-probe"),
        ] {
            if self.contains(capability) {
                if !first {
                    write!(f, "+")?;
                }
                write!(f, "{label}")?;
                first = false;
            }
        }
        if first {
            write!(f, "(none)")?;
        }
        Ok(())
    }
}

/// Time-ordered transform log for one tool.
pub type PositionHistory = BTreeMap<TimestampMs, Transform3D>;

/// Shared handle to a tracked tool.
///
/// Registry consumers hold these across configure cycles; playback swaps the
/// handle a uid maps to, never the uid itself.
pub type ToolHandle = Arc<dyn TrackedTool>;

/// The interface every registry entry satisfies: real tools, the manual
/// tool, and playback proxies.
pub trait TrackedTool: Send + Sync {
    /// Unique tool identifier.
    fn uid(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// The tool's capability tags.
    fn capabilities(&self) -> CapabilitySet;

    /// Current pose.
    fn transform(&self) -> Transform3D;

    /// Timestamp of the last pose update.
    fn timestamp(&self) -> TimestampMs;

    /// Whether the tool is currently visible to the tracker.
    fn visible(&self) -> bool;

    /// Set visibility. Returns true if the flag changed.
    fn set_visible(&self, visible: bool) -> bool;

    /// Apply a new pose at the given time.
    fn set_transform(&self, transform: Transform3D, timestamp: TimestampMs);

    /// Insert a history entry without touching the current pose.
    fn insert_history(&self, timestamp: TimestampMs, transform: Transform3D);

    /// Install or remove the position filter, discarding any filter state.
    fn reset_position_filter(&self, enabled: bool);

    /// Snapshot of the full position history.
    fn history(&self) -> PositionHistory;

    /// History entries within `[start, stop]`.
    fn session_history(&self, start: TimestampMs, stop: TimestampMs) -> PositionHistory;
}

/// Convenience predicate mirroring the capability-set query.
pub fn has_capability(tool: &dyn TrackedTool, capability: Capability) -> bool {
    tool.capabilities().contains(capability)
}

#[derive(Debug, Default)]
struct ToolState {
    transform: Transform3D,
    timestamp: TimestampMs,
    visible: bool,
    history: PositionHistory,
    filter: Option<PositionFilter>,
    /// Diagnostic: uid of the physical tool this (manual) tool mirrors.
    physical_source: Option<String>,
}

/// A real or manual tool backed by in-process state.
pub struct Tool {
    uid: String,
    name: String,
    capabilities: CapabilitySet,
    state: RwLock<ToolState>,
}

impl Tool {
    /// Create a tool with the given identity and capabilities.
    #[must_use]
    pub fn new(uid: impl Into<String>, name: impl Into<String>, capabilities: CapabilitySet) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            capabilities,
            state: RwLock::new(ToolState::default()),
        }
    }

    /// Create the manual tool: always visible, manual capability, identity
    /// pose.
    #[must_use]
    pub fn manual() -> Self {
        let tool = Self::new(
            MANUAL_TOOL_UID,
            "Manual tool",
            CapabilitySet::single(Capability::Manual),
        );
        tool.state.write().visible = true;
        tool
    }

    /// Reset the pose to identity, keeping history.
    pub fn reset_transform(&self) {
        let mut state = self.state.write();
        state.transform = Transform3D::identity();
    }

    /// Diagnostic: record which physical tool this tool mirrors.
    pub fn set_physical_source(&self, uid: impl Into<String>) {
        self.state.write().physical_source = Some(uid.into());
    }

    /// Diagnostic: the physical tool this tool mirrors, if any.
    #[must_use]
    pub fn physical_source(&self) -> Option<String> {
        self.state.read().physical_source.clone()
    }
}

impl TrackedTool for Tool {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn transform(&self) -> Transform3D {
        self.state.read().transform
    }

    fn timestamp(&self) -> TimestampMs {
        self.state.read().timestamp
    }

    fn visible(&self) -> bool {
        self.state.read().visible
    }

    fn set_visible(&self, visible: bool) -> bool {
        let mut state = self.state.write();
        let changed = state.visible != visible;
        state.visible = visible;
        changed
    }

    fn set_transform(&self, transform: Transform3D, timestamp: TimestampMs) {
        let mut state = self.state.write();
        let transform = match &mut state.filter {
            Some(filter) => filter.apply(transform),
            None => transform,
        };
        state.transform = transform;
        state.timestamp = timestamp;
        state.history.insert(timestamp, transform);
    }

    fn insert_history(&self, timestamp: TimestampMs, transform: Transform3D) {
        self.state.write().history.insert(timestamp, transform);
    }

    fn reset_position_filter(&self, enabled: bool) {
        let mut state = self.state.write();
        state.filter = enabled.then(PositionFilter::default);
    }

    fn history(&self) -> PositionHistory {
        self.state.read().history.clone()
    }

    fn session_history(&self, start: TimestampMs, stop: TimestampMs) -> PositionHistory {
        self.state
            .read()
            .history
            .range(start..=stop)
            .map(|(ts, t)| (*ts, *t))
            .collect()
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("uid", &self.uid)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_set_insert_and_query() {
        let mut set = CapabilitySet::empty();
        assert!(set.is_empty());
        set.insert(Capability::Pointer);
        set.insert(Capability::UltrasoundProbe);
        assert!(set.contains(Capability::Pointer));
        assert!(set.contains(Capability::UltrasoundProbe));
        assert!(!set.contains(Capability::Manual));
        assert_eq!(set.to_string(), "pointer+us-probe");
    }

    #[test]
    fn manual_tool_starts_visible_at_identity() {
        let tool = Tool::manual();
        assert_eq!(tool.uid(), MANUAL_TOOL_UID);
        assert!(tool.visible());
        assert!(tool.transform().approx_eq(&Transform3D::identity(), 0.0));
        assert!(has_capability(&tool, Capability::Manual));
    }

    #[test]
    fn set_transform_records_history() {
        let tool = Tool::new("t1", "t1", CapabilitySet::single(Capability::Pointer));
        tool.set_transform(Transform3D::translation(1.0, 0.0, 0.0), 10);
        tool.set_transform(Transform3D::translation(2.0, 0.0, 0.0), 20);
        let history = tool.history();
        assert_eq!(history.len(), 2);
        assert_eq!(tool.timestamp(), 20);
        assert_eq!(tool.transform().position().0, 2.0);
    }

    #[test]
    fn session_history_is_inclusive_range() {
        let tool = Tool::new("t1", "t1", CapabilitySet::empty());
        for ts in [10, 20, 30, 40] {
            tool.insert_history(ts, Transform3D::identity());
        }
        let session = tool.session_history(20, 30);
        assert_eq!(session.keys().copied().collect::<Vec<_>>(), vec![20, 30]);
    }

    #[test]
    fn filter_smooths_and_reset_clears_state() {
        let tool = Tool::new("t1", "t1", CapabilitySet::empty());
        tool.reset_position_filter(true);
        tool.set_transform(Transform3D::translation(0.0, 0.0, 0.0), 1);
        tool.set_transform(Transform3D::translation(10.0, 0.0, 0.0), 2);
        let (x, _, _) = tool.transform().position();
        assert!(x > 0.0 && x < 10.0, "filtered pose should lag: {x}");

        tool.reset_position_filter(false);
        tool.set_transform(Transform3D::translation(10.0, 0.0, 0.0), 3);
        assert_eq!(tool.transform().position().0, 10.0);
    }
}
