//! The registry of tracked tools.
//!
//! Owns the uid-to-handle mapping and guarantees the manual tool is always
//! present: it is created at construction and survives every configure and
//! deconfigure cycle. Iteration order is the uid sort order, which makes
//! dominant-tool tie-breaking stable.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::tool::{Tool, ToolHandle, TrackedTool, ACTIVE_TOOL_UID, MANUAL_TOOL_UID};

/// Registry of tracked tools, keyed by uid.
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolHandle>,
    manual: Arc<Tool>,
    dominant_uid: String,
}

impl ToolRegistry {
    /// Create a registry containing only the manual tool, which starts out
    /// dominant.
    #[must_use]
    pub fn new() -> Self {
        let manual = Arc::new(Tool::manual());
        let mut tools: BTreeMap<String, ToolHandle> = BTreeMap::new();
        tools.insert(MANUAL_TOOL_UID.to_string(), manual.clone());
        Self {
            tools,
            manual,
            dominant_uid: MANUAL_TOOL_UID.to_string(),
        }
    }

    /// Look up a tool. The pseudo-uid `"active"` resolves to the current
    /// dominant tool.
    #[must_use]
    pub fn get(&self, uid: &str) -> Option<ToolHandle> {
        if uid == ACTIVE_TOOL_UID {
            return Some(self.dominant());
        }
        self.tools.get(uid).cloned()
    }

    /// The currently dominant tool. Never absent: falls back to the manual
    /// tool if the recorded uid has gone away.
    #[must_use]
    pub fn dominant(&self) -> ToolHandle {
        self.tools
            .get(&self.dominant_uid)
            .cloned()
            .unwrap_or_else(|| self.manual.clone())
    }

    /// Uid of the currently dominant tool.
    #[must_use]
    pub fn dominant_uid(&self) -> &str {
        &self.dominant_uid
    }

    pub(crate) fn set_dominant_uid(&mut self, uid: &str) {
        self.dominant_uid = uid.to_string();
    }

    /// The manual tool.
    #[must_use]
    pub fn manual(&self) -> &Arc<Tool> {
        &self.manual
    }

    /// Add the real tools discovered by a successful configure.
    ///
    /// All tools appear together; the manual tool is untouched.
    pub fn add_real_tools(&mut self, tools: Vec<Arc<Tool>>) {
        for tool in tools {
            self.tools.insert(tool.uid().to_string(), tool);
        }
    }

    /// Drop every non-manual tool and reset the manual tool's pose to
    /// identity. Used on deconfigure.
    pub fn remove_real_tools(&mut self) {
        self.tools.retain(|uid, _| uid == MANUAL_TOOL_UID);
        self.manual.reset_transform();
        if !self.tools.contains_key(&self.dominant_uid) {
            self.dominant_uid = MANUAL_TOOL_UID.to_string();
        }
    }

    /// Swap the handle a uid maps to, leaving the key set unchanged.
    ///
    /// Playback uses this to substitute proxies for real tools and back.
    /// Returns the previous handle, or `None` if the uid is unknown (in
    /// which case nothing is inserted).
    pub(crate) fn replace(&mut self, uid: &str, tool: ToolHandle) -> Option<ToolHandle> {
        let slot = self.tools.get_mut(uid)?;
        Some(std::mem::replace(slot, tool))
    }

    /// All uids, in iteration order.
    #[must_use]
    pub fn uids(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Iterate over all tools in stable (uid) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolHandle)> {
        self.tools.iter().map(|(uid, tool)| (uid.as_str(), tool))
    }

    /// Iterate over all non-manual tools in stable order.
    pub fn real_tools(&self) -> impl Iterator<Item = &ToolHandle> {
        self.tools
            .iter()
            .filter(|(uid, _)| uid.as_str() != MANUAL_TOOL_UID)
            .map(|(_, tool)| tool)
    }

    /// Number of registered tools (manual included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Always false: the manual tool is never removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{Capability, CapabilitySet};
    use crate::transform::Transform3D;

    fn pointer(uid: &str) -> Arc<Tool> {
        Arc::new(Tool::new(uid, uid, CapabilitySet::single(Capability::Pointer)))
    }

    #[test]
    fn manual_tool_always_present() {
        let mut registry = ToolRegistry::new();
        assert_eq!(registry.len(), 1);
        registry.add_real_tools(vec![pointer("p1"), pointer("p2")]);
        assert_eq!(registry.len(), 3);
        registry.remove_real_tools();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(MANUAL_TOOL_UID).is_some());
    }

    #[test]
    fn active_resolves_to_dominant() {
        let mut registry = ToolRegistry::new();
        registry.add_real_tools(vec![pointer("p1")]);
        registry.set_dominant_uid("p1");
        let active = registry.get(ACTIVE_TOOL_UID).unwrap();
        assert_eq!(active.uid(), "p1");
    }

    #[test]
    fn dominant_falls_back_to_manual() {
        let mut registry = ToolRegistry::new();
        registry.add_real_tools(vec![pointer("p1")]);
        registry.set_dominant_uid("p1");
        registry.remove_real_tools();
        assert_eq!(registry.dominant().uid(), MANUAL_TOOL_UID);
    }

    #[test]
    fn remove_real_tools_resets_manual_pose() {
        let mut registry = ToolRegistry::new();
        registry
            .manual()
            .set_transform(Transform3D::translation(1.0, 2.0, 3.0), 1);
        registry.remove_real_tools();
        assert!(registry
            .manual()
            .transform()
            .approx_eq(&Transform3D::identity(), 0.0));
    }

    #[test]
    fn replace_keeps_key_set() {
        let mut registry = ToolRegistry::new();
        registry.add_real_tools(vec![pointer("p1")]);
        let before = registry.uids();
        let original = registry.replace("p1", pointer("p1")).unwrap();
        assert_eq!(original.uid(), "p1");
        assert_eq!(registry.uids(), before);
        assert!(registry.replace("unknown", pointer("x")).is_none());
    }
}
