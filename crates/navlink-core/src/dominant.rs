//! Dominant-tool selection.
//!
//! Exactly one tool is authoritative for downstream consumers at any time.
//! Among the currently visible tools (the manual tool is always eligible)
//! the highest-ranked wins: ultrasound probe, then pointer, then manual,
//! then reference. Ties fall to registry iteration order, which is stable.
//!
//! Switching to a manual-capable tool copies the previous dominant pose
//! into the manual tool as its starting pose and shows it; switching to
//! anything else hides the manual tool.
//!
//! In playback mode a static replay never changes tool visibility, so an
//! extra rule applies: if the manual tool has a newer timestamp than every
//! playback proxy, the user is moving it, and it is forced dominant.

use crate::events::TrackingEvent;
use crate::registry::ToolRegistry;
use crate::tool::{Capability, CapabilitySet, TrackedTool, MANUAL_TOOL_UID};
use crate::transform::{now_ms, TimestampMs};

/// Rank of a capability set for dominant-tool selection. Higher wins.
///
/// Manual is checked first so a tool carrying manual plus other tags still
/// ranks as manual.
#[must_use]
pub fn priority(capabilities: CapabilitySet) -> u8 {
    if capabilities.contains(Capability::Manual) {
        return 2;
    }
    if capabilities.contains(Capability::UltrasoundProbe) {
        return 4;
    }
    if capabilities.contains(Capability::Pointer) {
        return 3;
    }
    if capabilities.contains(Capability::Reference) {
        return 1;
    }
    0
}

/// Chooses which tool is dominant.
#[derive(Debug)]
pub struct DominantToolSelector {
    /// Whether visibility changes automatically promote the best tool.
    pub auto_select: bool,
}

impl DominantToolSelector {
    /// Create a selector.
    #[must_use]
    pub const fn new(auto_select: bool) -> Self {
        Self { auto_select }
    }

    /// Make the given tool dominant, applying the manual-tool side effects.
    ///
    /// Returns the events to publish. A no-op (already dominant, or
    /// unknown uid) returns no events.
    pub fn set_dominant(&self, registry: &mut ToolRegistry, uid: &str) -> Vec<TrackingEvent> {
        if registry.dominant_uid() == uid {
            return Vec::new();
        }
        let Some(tool) = registry.get(uid) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let previous = registry.dominant();
        let manual = registry.manual().clone();

        if tool.capabilities().contains(Capability::Manual) {
            // Hand over the previous pose so the manual tool starts where
            // the last dominant tool left off.
            manual.set_transform(previous.transform(), now_ms());
            if manual.set_visible(true) {
                events.push(TrackingEvent::ToolVisibility {
                    uid: MANUAL_TOOL_UID.to_string(),
                    visible: true,
                });
            }
        } else if manual.set_visible(false) {
            events.push(TrackingEvent::ToolVisibility {
                uid: MANUAL_TOOL_UID.to_string(),
                visible: false,
            });
        }

        registry.set_dominant_uid(uid);
        events.push(TrackingEvent::DominantToolChanged {
            uid: uid.to_string(),
        });
        events
    }

    /// Re-evaluate the selection after a visibility change.
    ///
    /// `playback_newest` carries the maximum last-update timestamp among
    /// playback proxies while playback is active; it enables the manual
    /// override rule.
    pub fn check(
        &self,
        registry: &mut ToolRegistry,
        playback_newest: Option<TimestampMs>,
    ) -> Vec<TrackingEvent> {
        if let Some(newest_proxy) = playback_newest {
            if registry.manual().timestamp() > newest_proxy {
                return self.set_dominant(registry, MANUAL_TOOL_UID);
            }
        }

        if !self.auto_select {
            return Vec::new();
        }

        // First-wins on ties keeps the stable registry order authoritative.
        let mut best: Option<(u8, String)> = None;
        for (uid, tool) in registry.iter() {
            let eligible =
                tool.visible() || tool.capabilities().contains(Capability::Manual);
            if !eligible {
                continue;
            }
            let rank = priority(tool.capabilities());
            if best.as_ref().map_or(true, |(b, _)| rank > *b) {
                best = Some((rank, uid.to_string()));
            }
        }

        match best {
            Some((_, uid)) => self.set_dominant(registry, &uid),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::tool::Tool;
    use crate::transform::Transform3D;

    fn tool(uid: &str, capability: Capability, visible: bool) -> Arc<Tool> {
        let t = Arc::new(Tool::new(uid, uid, CapabilitySet::single(capability)));
        t.set_visible(visible);
        t
    }

    fn registry(tools: Vec<Arc<Tool>>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.add_real_tools(tools);
        registry
    }

    #[test]
    fn probe_outranks_pointer_outranks_manual_outranks_reference() {
        let mut reg = registry(vec![
            tool("probe", Capability::UltrasoundProbe, true),
            tool("pointer", Capability::Pointer, true),
            tool("reference", Capability::Reference, true),
        ]);
        let selector = DominantToolSelector::new(true);

        selector.check(&mut reg, None);
        assert_eq!(reg.dominant_uid(), "probe");

        reg.get("probe").unwrap().set_visible(false);
        selector.check(&mut reg, None);
        assert_eq!(reg.dominant_uid(), "pointer");

        reg.get("pointer").unwrap().set_visible(false);
        selector.check(&mut reg, None);
        assert_eq!(reg.dominant_uid(), MANUAL_TOOL_UID);
    }

    #[test]
    fn selecting_manual_copies_previous_pose_and_shows_it() {
        let mut reg = registry(vec![tool("pointer", Capability::Pointer, true)]);
        let selector = DominantToolSelector::new(true);
        selector.set_dominant(&mut reg, "pointer");
        reg.get("pointer")
            .unwrap()
            .set_transform(Transform3D::translation(7.0, 8.0, 9.0), 1);
        assert!(!reg.manual().visible());

        let events = selector.set_dominant(&mut reg, MANUAL_TOOL_UID);
        assert!(reg.manual().visible());
        assert!(reg
            .manual()
            .transform()
            .approx_eq(&Transform3D::translation(7.0, 8.0, 9.0), 1e-12));
        assert!(events.contains(&TrackingEvent::DominantToolChanged {
            uid: MANUAL_TOOL_UID.to_string()
        }));
    }

    #[test]
    fn selecting_non_manual_hides_manual() {
        let mut reg = registry(vec![tool("pointer", Capability::Pointer, true)]);
        let selector = DominantToolSelector::new(true);
        assert!(reg.manual().visible());
        let events = selector.set_dominant(&mut reg, "pointer");
        assert!(!reg.manual().visible());
        assert!(events.contains(&TrackingEvent::ToolVisibility {
            uid: MANUAL_TOOL_UID.to_string(),
            visible: false,
        }));
    }

    #[test]
    fn reselecting_current_dominant_is_a_no_op() {
        let mut reg = registry(vec![tool("pointer", Capability::Pointer, true)]);
        let selector = DominantToolSelector::new(true);
        selector.set_dominant(&mut reg, "pointer");
        assert!(selector.set_dominant(&mut reg, "pointer").is_empty());
    }

    #[test]
    fn playback_override_prefers_fresh_manual_tool() {
        let mut reg = registry(vec![tool("pointer", Capability::Pointer, true)]);
        let selector = DominantToolSelector::new(true);
        selector.set_dominant(&mut reg, "pointer");

        reg.manual().set_transform(Transform3D::identity(), 5_000);
        // Proxies are newer: normal ranking applies, pointer stays.
        selector.check(&mut reg, Some(9_000));
        assert_eq!(reg.dominant_uid(), "pointer");

        // Manual is newer than every proxy: forced dominant.
        reg.manual().set_transform(Transform3D::identity(), 10_000);
        selector.check(&mut reg, Some(9_000));
        assert_eq!(reg.dominant_uid(), MANUAL_TOOL_UID);
    }

    #[test]
    fn auto_select_off_keeps_current_dominant() {
        let mut reg = registry(vec![tool("probe", Capability::UltrasoundProbe, true)]);
        let selector = DominantToolSelector::new(false);
        assert!(selector.check(&mut reg, None).is_empty());
        assert_eq!(reg.dominant_uid(), MANUAL_TOOL_UID);
    }

    proptest! {
        /// Whatever the visibility pattern, the selected tool always has
        /// the maximum priority among eligible tools.
        #[test]
        fn selection_maximizes_priority(visible in proptest::collection::vec(any::<bool>(), 3)) {
            let capabilities = [
                Capability::UltrasoundProbe,
                Capability::Pointer,
                Capability::Reference,
            ];
            let tools: Vec<Arc<Tool>> = capabilities
                .iter()
                .zip(&visible)
                .enumerate()
                .map(|(i, (cap, vis))| tool(&format!("t{i}"), *cap, *vis))
                .collect();
            let mut reg = registry(tools.clone());
            let selector = DominantToolSelector::new(true);
            selector.check(&mut reg, None);

            let best = tools
                .iter()
                .filter(|t| t.visible())
                .map(|t| priority(t.capabilities()))
                .chain(std::iter::once(priority(reg.manual().capabilities())))
                .max()
                .unwrap();
            let selected = reg.dominant();
            prop_assert_eq!(priority(selected.capabilities()), best);
        }
    }
}
