//! Device-access seam for the hardware connection claim.
//!
//! The tracking library underneath expects a well-known symlink pointing at
//! the serial device file of the tracker. Claiming that link is an
//! OS-level, process-wide singleton resource: it is created right before
//! hardware initialization and removed on teardown, always serialized with
//! the lifecycle transitions. The lifecycle core only depends on the
//! [`DeviceAccess`] trait; the platform-specific scan-and-symlink
//! implementation lives behind it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, warn};

use crate::config::DeviceConfig;
use crate::error::TrackingError;

/// Claims and releases the process-wide hardware device resource.
pub trait DeviceAccess: Send {
    /// Claim the device, returning the path of the device file in use.
    fn claim(&mut self) -> Result<PathBuf, TrackingError>;

    /// Release the claim. Safe to call when nothing is claimed.
    fn release(&mut self);
}

/// A no-op claim, used on platforms without the symlink convention and in
/// tests.
#[derive(Debug, Default)]
pub struct NullDeviceAccess {
    claimed: bool,
}

impl DeviceAccess for NullDeviceAccess {
    fn claim(&mut self) -> Result<PathBuf, TrackingError> {
        self.claimed = true;
        Ok(PathBuf::from("null-device"))
    }

    fn release(&mut self) {
        self.claimed = false;
    }
}

/// Guards the one-claim-per-process invariant.
static CLAIM_HELD: AtomicBool = AtomicBool::new(false);

/// Scans for a tracker serial device and exposes it through the well-known
/// symlink. POSIX only.
#[cfg(unix)]
#[derive(Debug)]
pub struct SerialDeviceAccess {
    config: DeviceConfig,
    link: Option<PathBuf>,
}

#[cfg(unix)]
impl SerialDeviceAccess {
    /// Create an unclaimed accessor for the given device configuration.
    #[must_use]
    pub const fn new(config: DeviceConfig) -> Self {
        Self { config, link: None }
    }

    fn find_device(&self) -> Result<PathBuf, TrackingError> {
        let entries = std::fs::read_dir(&self.config.scan_dir).map_err(|e| {
            TrackingError::DeviceAccess {
                reason: format!(
                    "cannot scan {}: {e}",
                    self.config.scan_dir.display()
                ),
            }
        })?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| {
                        self.config.patterns.iter().any(|p| name.starts_with(p.as_str()))
                    })
            })
            .collect();
        candidates.sort();

        match candidates.as_slice() {
            [] => Err(TrackingError::DeviceAccess {
                reason: format!(
                    "no serial device found in {} matching {:?}",
                    self.config.scan_dir.display(),
                    self.config.patterns
                ),
            }),
            [device] => Ok(device.clone()),
            [device, ..] => {
                warn!(
                    count = candidates.len(),
                    chosen = %device.display(),
                    "more than one tracker device connected, using the first"
                );
                Ok(device.clone())
            }
        }
    }
}

#[cfg(unix)]
impl DeviceAccess for SerialDeviceAccess {
    fn claim(&mut self) -> Result<PathBuf, TrackingError> {
        if !self.config.link_dir.is_dir() {
            return Err(TrackingError::DeviceAccess {
                reason: format!(
                    "link folder {} does not exist; system is not properly installed",
                    self.config.link_dir.display()
                ),
            });
        }

        let device = self.find_device()?;

        let metadata = std::fs::metadata(&device).map_err(|e| TrackingError::DeviceAccess {
            reason: format!("cannot stat {}: {e}", device.display()),
        })?;
        if metadata.permissions().readonly() {
            return Err(TrackingError::DeviceAccess {
                reason: format!("device {} is not writable", device.display()),
            });
        }

        if CLAIM_HELD.swap(true, Ordering::SeqCst) {
            return Err(TrackingError::DeviceAccess {
                reason: "device claim already held by this process".to_string(),
            });
        }

        let link = self.config.link_dir.join(&self.config.link_name);
        // Replace a stale link from a previous run.
        let _ = std::fs::remove_file(&link);
        if let Err(e) = std::os::unix::fs::symlink(&device, &link) {
            CLAIM_HELD.store(false, Ordering::SeqCst);
            error!(
                link = %link.display(),
                device = %device.display(),
                error = %e,
                "symlink creation failed"
            );
            return Err(TrackingError::DeviceAccess {
                reason: format!(
                    "symlink {} -> {} failed: {e}",
                    link.display(),
                    device.display()
                ),
            });
        }

        info!(link = %link.display(), device = %device.display(), "claimed tracker device");
        self.link = Some(link);
        Ok(device)
    }

    fn release(&mut self) {
        if let Some(link) = self.link.take() {
            if let Err(e) = std::fs::remove_file(&link) {
                warn!(link = %link.display(), error = %e, "could not remove device symlink");
            }
            CLAIM_HELD.store(false, Ordering::SeqCst);
            info!("released tracker device claim");
        }
    }
}

#[cfg(unix)]
impl Drop for SerialDeviceAccess {
    fn drop(&mut self) {
        self.release();
    }
}
