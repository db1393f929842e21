//! Deterministic offline replay of recorded tool motion.
//!
//! Entering playback wraps every non-manual tool in a clock-driven proxy.
//! The original tools are untouched; only the handle a uid maps to changes,
//! so the registry's key set stays identical and external holders of the
//! original handles keep valid objects. Leaving playback puts the original
//! handles back, restoring referential identity.
//!
//! The manual tool is never wrapped: it stays live so the user can override
//! a static replay (see the dominant-tool selection rules).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::registry::ToolRegistry;
use crate::tool::{CapabilitySet, PositionHistory, ToolHandle, TrackedTool};
use crate::transform::{now_ms, TimestampMs, Transform3D};

#[derive(Debug, Default, Clone, Copy)]
struct ClockState {
    start: TimestampMs,
    length: i64,
    offset: i64,
}

/// The shared playback clock: a recorded time range plus a movable offset.
#[derive(Debug, Default)]
pub struct PlaybackClock {
    state: Mutex<ClockState>,
}

impl PlaybackClock {
    /// Create an uninitialized clock at offset zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the replayed time range. Resets the offset to the start.
    pub fn initialize(&self, start: TimestampMs, length: i64) {
        *self.state.lock() = ClockState {
            start,
            length: length.max(0),
            offset: 0,
        };
    }

    /// The current playback time.
    #[must_use]
    pub fn now(&self) -> TimestampMs {
        let state = self.state.lock();
        state.start + state.offset
    }

    /// Move the clock to `offset` milliseconds past the range start,
    /// clamped to the range.
    pub fn set_offset(&self, offset: i64) {
        let mut state = self.state.lock();
        state.offset = offset.clamp(0, state.length);
    }

    /// The replayed range as (start, length in milliseconds).
    #[must_use]
    pub fn range(&self) -> (TimestampMs, i64) {
        let state = self.state.lock();
        (state.start, state.length)
    }
}

#[derive(Debug, Default)]
struct ProxyState {
    transform: Transform3D,
    timestamp: TimestampMs,
    visible: bool,
}

/// A clock-driven stand-in for a real tool during playback.
///
/// Reads poses from the base tool's recorded history; never writes to the
/// base. Identity (uid, name, capabilities) is forwarded so consumers see
/// the same tool.
pub struct PlaybackTool {
    base: ToolHandle,
    clock: Arc<PlaybackClock>,
    state: RwLock<ProxyState>,
}

impl PlaybackTool {
    fn new(base: ToolHandle, clock: Arc<PlaybackClock>) -> Self {
        Self {
            base,
            clock,
            state: RwLock::new(ProxyState::default()),
        }
    }

    /// The wrapped original tool.
    #[must_use]
    pub fn base(&self) -> ToolHandle {
        self.base.clone()
    }

    /// Apply the recorded pose at (or latest before) the clock time.
    ///
    /// Returns true if the proxy's visibility changed.
    pub fn sync_to_clock(&self) -> bool {
        let time = self.clock.now();
        let history = self.base.history();
        let sample = history.range(..=time).next_back();

        let mut state = self.state.write();
        match sample {
            Some((timestamp, transform)) => {
                state.transform = *transform;
                state.timestamp = *timestamp;
                let changed = !state.visible;
                state.visible = true;
                changed
            }
            None => {
                let changed = state.visible;
                state.visible = false;
                changed
            }
        }
    }
}

impl TrackedTool for PlaybackTool {
    fn uid(&self) -> &str {
        self.base.uid()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn capabilities(&self) -> CapabilitySet {
        self.base.capabilities()
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
        // Live updates are ignored during playback; the proxy pose only
        // moves with the clock.
        let mut state = self.state.write();
        state.transform = transform;
        state.timestamp = timestamp;
    }

    fn insert_history(&self, timestamp: TimestampMs, transform: Transform3D) {
        self.base.insert_history(timestamp, transform);
    }

    fn reset_position_filter(&self, enabled: bool) {
        self.base.reset_position_filter(enabled);
    }

    fn history(&self) -> PositionHistory {
        self.base.history()
    }

    fn session_history(&self, start: TimestampMs, stop: TimestampMs) -> PositionHistory {
        self.base.session_history(start, stop)
    }
}

/// An active playback session: the shared clock, the proxies, and the
/// original handles needed to restore the registry on exit.
pub struct PlaybackSession {
    clock: Arc<PlaybackClock>,
    originals: HashMap<String, ToolHandle>,
    proxies: Vec<Arc<PlaybackTool>>,
}

impl PlaybackSession {
    /// Wrap every non-manual tool in the registry with a playback proxy
    /// and initialize the clock from the union of the recorded histories.
    pub(crate) fn enter(registry: &mut ToolRegistry, clock: Arc<PlaybackClock>) -> Self {
        let mut originals = HashMap::new();
        let mut proxies = Vec::new();
        let mut range: Option<(TimestampMs, TimestampMs)> = None;

        let uids: Vec<String> = registry
            .real_tools()
            .map(|tool| tool.uid().to_string())
            .collect();

        for uid in uids {
            let Some(original) = registry.get(&uid) else {
                continue;
            };

            let history = original.history();
            if let (Some((first, _)), Some((last, _))) =
                (history.first_key_value(), history.last_key_value())
            {
                range = Some(match range {
                    Some((lo, hi)) => (lo.min(*first), hi.max(*last)),
                    None => (*first, *last),
                });
            }

            let proxy = Arc::new(PlaybackTool::new(original.clone(), clock.clone()));
            proxies.push(proxy.clone());
            registry.replace(&uid, proxy);
            originals.insert(uid, original);
        }

        let (start, stop) = range.unwrap_or_else(|| {
            let now = now_ms();
            (now, now)
        });
        clock.initialize(start, stop - start);

        for proxy in &proxies {
            proxy.sync_to_clock();
        }

        info!(
            tools = proxies.len(),
            start, length = stop - start, "opened playback mode"
        );
        Self {
            clock,
            originals,
            proxies,
        }
    }

    /// Put the original handles back, restoring referential identity.
    pub(crate) fn exit(self, registry: &mut ToolRegistry) {
        for (uid, original) in self.originals {
            registry.replace(&uid, original);
        }
        info!("closed playback mode");
    }

    /// The shared clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<PlaybackClock> {
        &self.clock
    }

    /// Re-apply recorded poses after a clock move.
    ///
    /// Returns the uids whose visibility changed.
    pub fn sync(&self) -> Vec<String> {
        self.proxies
            .iter()
            .filter(|proxy| proxy.sync_to_clock())
            .map(|proxy| proxy.uid().to_string())
            .collect()
    }

    /// The newest last-update timestamp among the proxies. Used by the
    /// manual-override selection rule.
    #[must_use]
    pub fn newest_proxy_timestamp(&self) -> TimestampMs {
        self.proxies
            .iter()
            .map(|proxy| proxy.timestamp())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{Capability, Tool, MANUAL_TOOL_UID};

    fn registry_with_history() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        let p1 = Arc::new(Tool::new("p1", "p1", CapabilitySet::single(Capability::Pointer)));
        let p2 = Arc::new(Tool::new("p2", "p2", CapabilitySet::single(Capability::Reference)));
        p1.set_transform(Transform3D::translation(1.0, 0.0, 0.0), 1_000);
        p1.set_transform(Transform3D::translation(2.0, 0.0, 0.0), 2_000);
        p2.set_transform(Transform3D::translation(9.0, 0.0, 0.0), 1_500);
        registry.add_real_tools(vec![p1, p2]);
        registry
    }

    #[test]
    fn enter_wraps_real_tools_and_exit_restores_identity() {
        let mut registry = registry_with_history();
        let before_uids = registry.uids();
        let original_p1 = registry.get("p1").unwrap();

        let session = PlaybackSession::enter(&mut registry, Arc::new(PlaybackClock::new()));
        assert_eq!(registry.uids(), before_uids);
        let proxied = registry.get("p1").unwrap();
        assert!(!Arc::ptr_eq(&proxied, &original_p1));
        assert_eq!(proxied.uid(), "p1");
        // The manual tool is never wrapped.
        let manual: ToolHandle = registry.manual().clone();
        assert!(Arc::ptr_eq(&registry.get(MANUAL_TOOL_UID).unwrap(), &manual));

        session.exit(&mut registry);
        assert_eq!(registry.uids(), before_uids);
        assert!(Arc::ptr_eq(&registry.get("p1").unwrap(), &original_p1));
    }

    #[test]
    fn clock_range_is_union_of_histories() {
        let mut registry = registry_with_history();
        let clock = Arc::new(PlaybackClock::new());
        let session = PlaybackSession::enter(&mut registry, clock.clone());
        assert_eq!(clock.range(), (1_000, 1_000));
        session.exit(&mut registry);
    }

    #[test]
    fn sync_applies_latest_sample_at_or_before_clock() {
        let mut registry = registry_with_history();
        let clock = Arc::new(PlaybackClock::new());
        let session = PlaybackSession::enter(&mut registry, clock.clone());

        clock.set_offset(500); // t = 1_500
        session.sync();
        let p1 = registry.get("p1").unwrap();
        assert_eq!(p1.timestamp(), 1_000);
        assert_eq!(p1.transform().position().0, 1.0);

        clock.set_offset(1_000); // t = 2_000
        session.sync();
        let p1 = registry.get("p1").unwrap();
        assert_eq!(p1.timestamp(), 2_000);
        assert_eq!(p1.transform().position().0, 2.0);

        session.exit(&mut registry);
    }

    #[test]
    fn proxy_without_samples_stays_invisible() {
        let mut registry = ToolRegistry::new();
        registry.add_real_tools(vec![Arc::new(Tool::new(
            "empty",
            "empty",
            CapabilitySet::empty(),
        ))]);
        let session = PlaybackSession::enter(&mut registry, Arc::new(PlaybackClock::new()));
        session.sync();
        assert!(!registry.get("empty").unwrap().visible());
        session.exit(&mut registry);
    }

    #[test]
    fn offset_is_clamped_to_range() {
        let clock = PlaybackClock::new();
        clock.initialize(1_000, 500);
        clock.set_offset(10_000);
        assert_eq!(clock.now(), 1_500);
        clock.set_offset(-5);
        assert_eq!(clock.now(), 1_000);
    }
}
