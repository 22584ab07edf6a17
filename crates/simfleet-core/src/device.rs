//! Device model shared by every backend.
//!
//! A [`Device`] is a point-in-time snapshot of one emulator, simulator, or
//! attached physical device. Snapshots are cheap to clone and are never
//! cached: every registry query re-asks the backends, so callers should track
//! devices across calls by [`Device::id`] or [`Device::name`] only.

use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tokio::sync::Mutex;

/// The platform a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Android emulators (AVDs) and adb-attached devices.
    Android,
    /// iOS Simulators managed by `xcrun simctl`.
    Ios,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Android => write!(f, "android"),
            Platform::Ios => write!(f, "ios"),
        }
    }
}

/// Ownership of a device process started by this orchestrator.
///
/// Clones share the same child. Dropping the last clone does not kill the
/// process; call [`ProcessHandle::kill`] or shut the device down through its
/// backend.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    child: Arc<Mutex<Option<Child>>>,
}

impl ProcessHandle {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Arc::new(Mutex::new(Some(child))),
        }
    }

    /// OS process id at the time the process was spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the process to exit and release it.
    ///
    /// Returns immediately if the child was already reaped.
    pub async fn wait(&self) -> std::io::Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            child.wait().await?;
        }
        Ok(())
    }

    /// Exit status if the process has already exited.
    ///
    /// `None` while it is still running, and once it has been reaped through
    /// [`wait`](Self::wait) or [`kill`](Self::kill).
    pub async fn try_wait(&self) -> std::io::Result<Option<ExitStatus>> {
        match self.child.lock().await.as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }

    /// Kill the process and reap it.
    pub async fn kill(&self) -> std::io::Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            child.kill().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle").field("pid", &self.pid).finish()
    }
}

/// One emulator, simulator, or physical device as seen by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Backend-assigned identifier (AVD name, adb serial, or simulator UDID).
    pub id: String,

    /// Human-readable label (e.g. "Pixel_5", "iPhone 15 Pro").
    pub name: String,

    pub platform: Platform,

    /// `false` for physical hardware.
    pub is_emulator: bool,

    /// Whether the device OS is currently running.
    pub booted: bool,

    /// Backing process, present only while booted by this orchestrator.
    #[serde(skip)]
    pub process: Option<ProcessHandle>,

    /// Locale applied at boot, e.g. `fr_FR`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    /// Transport address of a running Android device (e.g. `emulator-5554`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

impl Device {
    /// A device that is not running.
    pub fn new(id: impl Into<String>, name: impl Into<String>, platform: Platform) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            platform,
            is_emulator: true,
            booted: false,
            process: None,
            locale: None,
            serial: None,
        }
    }

    /// True when `selector` is this device's id or name.
    pub fn matches(&self, selector: &str) -> bool {
        self.id == selector || self.name == selector
    }

    /// Snapshot with `booted = true`.
    pub fn into_booted(mut self, process: Option<ProcessHandle>) -> Self {
        self.booted = true;
        self.process = process;
        self
    }

    /// Snapshot with `booted = false`; drops the process handle and serial.
    pub fn into_shutdown(mut self) -> Self {
        self.booted = false;
        self.process = None;
        self.serial = None;
        self
    }

    pub fn with_locale(mut self, locale: Option<&str>) -> Self {
        self.locale = locale.map(str::to_string);
        self
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.id, self.platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_by_id_or_name() {
        let device = Device::new("emulator-avd-1", "Pixel_5", Platform::Android);
        assert!(device.matches("emulator-avd-1"));
        assert!(device.matches("Pixel_5"));
        assert!(!device.matches("Pixel"));
    }

    #[test]
    fn shutdown_snapshot_drops_process_state() {
        let mut device = Device::new("Pixel_5", "Pixel_5", Platform::Android).into_booted(None);
        device.serial = Some("emulator-5554".to_string());

        let down = device.into_shutdown();
        assert!(!down.booted);
        assert!(down.process.is_none());
        assert!(down.serial.is_none());
    }

    #[test]
    fn with_locale_sets_and_clears() {
        let device = Device::new("a", "a", Platform::Ios).with_locale(Some("fr_FR"));
        assert_eq!(device.locale.as_deref(), Some("fr_FR"));
        assert!(device.with_locale(None).locale.is_none());
    }

    #[test]
    fn serialization_skips_process_and_empty_fields() {
        let device = Device::new("UDID-1", "iPhone 15", Platform::Ios);
        let json = serde_json::to_value(&device).unwrap();

        assert_eq!(json["platform"], "ios");
        assert!(json.get("process").is_none());
        assert!(json.get("locale").is_none());
        assert!(json.get("serial").is_none());
    }

    #[test]
    fn platform_display() {
        assert_eq!(Platform::Android.to_string(), "android");
        assert_eq!(Platform::Ios.to_string(), "ios");
    }
}
