//! Simulated tracker backend.
//!
//! Stands in for real hardware in tests and offline use: it reports the
//! configured tools as discovered and succeeds at every operation unless a
//! failure is injected.

use std::time::Duration;

use crate::config::{ToolDescriptor, TrackerDescriptor};

use super::{DiscoveredTool, TrackerBackend, TrackerBackendFactory};

/// Which operations the simulated backend should fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimFailures {
    /// Fail the open (configure) call.
    pub open: bool,
    /// Fail hardware initialization.
    pub initialize: bool,
    /// Fail starting tracking.
    pub track: bool,
}

/// A scriptable, in-process tracker connection.
#[derive(Debug)]
pub struct SimTrackerBackend {
    tools: Vec<DiscoveredTool>,
    failures: SimFailures,
    /// Artificial latency per operation, to exercise the bounded waits.
    pub latency: Duration,
}

impl SimTrackerBackend {
    /// Create a backend reporting the given tools.
    #[must_use]
    pub fn new(tools: Vec<DiscoveredTool>, failures: SimFailures) -> Self {
        Self {
            tools,
            failures,
            latency: Duration::ZERO,
        }
    }

    fn delay(&self) {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }
}

impl TrackerBackend for SimTrackerBackend {
    fn open(&mut self) -> Result<Vec<DiscoveredTool>, String> {
        self.delay();
        if self.failures.open {
            return Err("simulated open failure".to_string());
        }
        Ok(self.tools.clone())
    }

    fn initialize(&mut self, on: bool) -> Result<(), String> {
        self.delay();
        if on && self.failures.initialize {
            return Err("simulated initialize failure".to_string());
        }
        Ok(())
    }

    fn track(&mut self, on: bool) -> Result<(), String> {
        self.delay();
        if on && self.failures.track {
            return Err("simulated track failure".to_string());
        }
        Ok(())
    }

    fn close(&mut self) {}
}

/// Factory producing simulated backends from configuration descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimBackendFactory {
    /// Failures injected into every created backend.
    pub failures: SimFailures,
    /// Latency applied to every operation.
    pub latency: Duration,
}

impl SimBackendFactory {
    /// A factory whose backends succeed at everything.
    #[must_use]
    pub fn reliable() -> Self {
        Self::default()
    }

    /// A factory injecting the given failures.
    #[must_use]
    pub const fn failing(failures: SimFailures) -> Self {
        Self {
            failures,
            latency: Duration::ZERO,
        }
    }
}

impl TrackerBackendFactory for SimBackendFactory {
    fn create(
        &self,
        _tracker: &TrackerDescriptor,
        tools: &[ToolDescriptor],
    ) -> Box<dyn TrackerBackend> {
        let discovered = tools
            .iter()
            .map(|descriptor| DiscoveredTool {
                uid: descriptor.uid.clone(),
                name: if descriptor.name.is_empty() {
                    descriptor.uid.clone()
                } else {
                    descriptor.name.clone()
                },
                capabilities: descriptor.capability_set(),
                is_reference: descriptor.reference
                    || descriptor.capabilities.contains("reference"),
            })
            .collect();
        let mut backend = SimTrackerBackend::new(discovered, self.failures);
        backend.latency = self.latency;
        Box::new(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Capability;

    #[test]
    fn factory_maps_descriptors_to_discovered_tools() {
        let tracker = TrackerDescriptor {
            kind: "sim".to_string(),
            name: String::new(),
        };
        let tools = vec![
            ToolDescriptor {
                uid: "probe-1".to_string(),
                name: String::new(),
                capabilities: ["us-probe".to_string()].into_iter().collect(),
                reference: false,
            },
            ToolDescriptor {
                uid: "ref-1".to_string(),
                name: "Reference".to_string(),
                capabilities: Default::default(),
                reference: true,
            },
        ];

        let mut backend = SimBackendFactory::reliable().create(&tracker, &tools);
        let discovered = backend.open().unwrap();
        assert_eq!(discovered.len(), 2);
        assert!(discovered[0]
            .capabilities
            .contains(Capability::UltrasoundProbe));
        assert_eq!(discovered[0].name, "probe-1");
        assert!(discovered[1].is_reference);
        assert!(discovered[1].capabilities.contains(Capability::Reference));
        assert_eq!(discovered[1].name, "Reference");
    }
}
