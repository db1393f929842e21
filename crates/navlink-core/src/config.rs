//! Configuration parsing and application settings.
//!
//! Two TOML surfaces feed the lifecycle manager:
//!
//! - the **tracker configuration file**: exactly one `[tracker]` descriptor
//!   plus zero or more `[[tool]]` descriptors, at most one of which may be
//!   marked as the reference tool. It is parsed once per configure call and
//!   consumed by the worker.
//! - the **application settings**: the active configuration file path, the
//!   logging folder, feature toggles, and the bounded-wait tunables for
//!   worker shutdown and playback entry.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tool::{Capability, CapabilitySet};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML content is invalid.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The content parsed but violates a structural rule.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Describes the tracker hardware to connect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerDescriptor {
    /// Tracker type tag, opaque to the lifecycle core (e.g. "polaris").
    pub kind: String,

    /// Human-readable tracker name.
    #[serde(default)]
    pub name: String,
}

/// Describes one tracked tool from the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier.
    pub uid: String,

    /// Human-readable tool name. Defaults to the uid.
    #[serde(default)]
    pub name: String,

    /// Capability tags (`pointer`, `reference`, `us-probe`).
    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    /// Marks this tool as the spatial reference frame.
    #[serde(default)]
    pub reference: bool,
}

impl ToolDescriptor {
    /// Resolve the descriptor's capability tags into a capability set.
    ///
    /// The `reference` flag implies the reference capability; unknown tags
    /// are ignored so a newer configuration file degrades gracefully.
    #[must_use]
    pub fn capability_set(&self) -> CapabilitySet {
        let mut set = CapabilitySet::empty();
        for tag in &self.capabilities {
            match tag.as_str() {
                "pointer" => set.insert(Capability::Pointer),
                "reference" => set.insert(Capability::Reference),
                "us-probe" | "probe" => set.insert(Capability::UltrasoundProbe),
                _ => {}
            }
        }
        if self.reference {
            set.insert(Capability::Reference);
        }
        set
    }
}

/// The parsed tracker configuration: one tracker, its tools.
///
/// Created by parsing a configuration file, consumed once by the worker on
/// configure, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// The tracker descriptor.
    pub tracker: TrackerDescriptor,

    /// Tool descriptors, at most one marked `reference`.
    #[serde(default, rename = "tool")]
    pub tools: Vec<ToolDescriptor>,
}

impl TrackerConfig {
    /// Load and validate a tracker configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a tracker configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let references = self
            .tools
            .iter()
            .filter(|t| t.reference || t.capabilities.contains("reference"))
            .count();
        if references > 1 {
            return Err(ConfigError::Validation(format!(
                "{references} tools are marked as reference, at most one is allowed"
            )));
        }

        let mut seen = BTreeSet::new();
        for tool in &self.tools {
            if tool.uid.is_empty() {
                return Err(ConfigError::Validation("tool with empty uid".to_string()));
            }
            if !seen.insert(&tool.uid) {
                return Err(ConfigError::Validation(format!(
                    "duplicate tool uid: {}",
                    tool.uid
                )));
            }
        }
        Ok(())
    }

    /// The uid of the tool marked as reference, if any.
    #[must_use]
    pub fn reference_uid(&self) -> Option<&str> {
        self.tools
            .iter()
            .find(|t| t.reference || t.capabilities.contains("reference"))
            .map(|t| t.uid.as_str())
    }
}

/// Application settings consumed by the lifecycle controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the active tracker configuration file. Changing it while
    /// configured forces a deconfigure-then-reconfigure cycle.
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Folder for position-history logs. Changing it while configured
    /// forces a deconfigure-then-reconfigure cycle.
    #[serde(default = "default_logging_folder")]
    pub logging_folder: PathBuf,

    /// Smooth tool poses with the position filter. Toggling resets the
    /// filter on every tool.
    #[serde(default)]
    pub position_filter_enabled: bool,

    /// Automatically promote the highest-priority visible tool to dominant.
    #[serde(default = "default_true")]
    pub auto_select_dominant_tool: bool,

    /// Diagnostic: after configure, copy physical properties from the first
    /// non-manual, non-reference tool onto the manual tool.
    #[serde(default)]
    pub manual_tool_mirrors_physical_tool: bool,

    /// How long to wait for the worker thread to stop cooperatively before
    /// abandoning it.
    #[serde(default = "default_worker_shutdown_timeout")]
    #[serde(with = "humantime_serde")]
    pub worker_shutdown_timeout: Duration,

    /// Number of poll iterations allowed while waiting for an in-flight
    /// configure when entering playback.
    #[serde(default = "default_playback_poll_attempts")]
    pub playback_poll_attempts: u32,

    /// Sleep between playback-entry poll iterations.
    #[serde(default = "default_playback_poll_interval")]
    #[serde(with = "humantime_serde")]
    pub playback_poll_interval: Duration,

    /// Device access configuration for the hardware symlink.
    #[serde(default)]
    pub device: DeviceConfig,
}

fn default_logging_folder() -> PathBuf {
    PathBuf::from(".")
}

const fn default_true() -> bool {
    true
}

const fn default_worker_shutdown_timeout() -> Duration {
    Duration::from_secs(2)
}

const fn default_playback_poll_attempts() -> u32 {
    100
}

const fn default_playback_poll_interval() -> Duration {
    Duration::from_millis(100)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_file: None,
            logging_folder: default_logging_folder(),
            position_filter_enabled: false,
            auto_select_dominant_tool: true,
            manual_tool_mirrors_physical_tool: false,
            worker_shutdown_timeout: default_worker_shutdown_timeout(),
            playback_poll_attempts: default_playback_poll_attempts(),
            playback_poll_interval: default_playback_poll_interval(),
            device: DeviceConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Where the well-known device symlink lives and which device files qualify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Directory holding the well-known symlink.
    #[serde(default = "default_link_dir")]
    pub link_dir: PathBuf,

    /// Symlink file name.
    #[serde(default = "default_link_name")]
    pub link_name: String,

    /// Directory scanned for candidate device files.
    #[serde(default = "default_scan_dir")]
    pub scan_dir: PathBuf,

    /// File-name prefixes that qualify as tracker serial devices.
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
}

fn default_link_dir() -> PathBuf {
    PathBuf::from("/var/lib/navlink/links")
}

fn default_link_name() -> String {
    "navlink.dev0".to_string()
}

fn default_scan_dir() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_patterns() -> Vec<String> {
    // cu.* applies to macOS, ttyUSB to Linux.
    ["cu.usbserial", "cu.KeySerial", "serial", "ttyUSB"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            link_dir: default_link_dir(),
            link_name: default_link_name(),
            scan_dir: default_scan_dir(),
            patterns: default_patterns(),
        }
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
        [tracker]
        kind = "polaris"
        name = "lab tracker"

        [[tool]]
        uid = "pointer-1"
        capabilities = ["pointer"]

        [[tool]]
        uid = "ref-1"
        reference = true
    "#;

    #[test]
    fn parses_tracker_and_tools() {
        let config = TrackerConfig::from_toml(VALID).unwrap();
        assert_eq!(config.tracker.kind, "polaris");
        assert_eq!(config.tools.len(), 2);
        assert_eq!(config.reference_uid(), Some("ref-1"));
    }

    #[test]
    fn rejects_two_reference_tools() {
        let content = r#"
            [tracker]
            kind = "polaris"

            [[tool]]
            uid = "a"
            reference = true

            [[tool]]
            uid = "b"
            reference = true
        "#;
        let err = TrackerConfig::from_toml(content).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_duplicate_uids() {
        let content = r#"
            [tracker]
            kind = "polaris"

            [[tool]]
            uid = "a"

            [[tool]]
            uid = "a"
        "#;
        assert!(matches!(
            TrackerConfig::from_toml(content),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn descriptor_capability_tags_resolve() {
        let config = TrackerConfig::from_toml(VALID).unwrap();
        let pointer = config.tools[0].capability_set();
        assert!(pointer.contains(Capability::Pointer));
        assert!(!pointer.contains(Capability::Reference));

        let reference = config.tools[1].capability_set();
        assert!(reference.contains(Capability::Reference));
    }

    #[test]
    fn settings_defaults_cover_bounded_waits() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.worker_shutdown_timeout, Duration::from_secs(2));
        assert_eq!(settings.playback_poll_attempts, 100);
        assert_eq!(settings.playback_poll_interval, Duration::from_millis(100));
        assert!(settings.auto_select_dominant_tool);
    }

    #[test]
    fn settings_duration_fields_use_humantime() {
        let settings: Settings =
            toml::from_str("worker_shutdown_timeout = \"5s\"").unwrap();
        assert_eq!(settings.worker_shutdown_timeout, Duration::from_secs(5));
    }
}
