//! iOS Simulator backend built on Apple's `xcrun simctl`.
//!
//! # Requirements
//!
//! Xcode must be installed for `xcrun simctl` to be available.
//!
//! # Example
//!
//! ```no_run
//! use simfleet_core::backend::DeviceBackend;
//! use simfleet_core::ios::IosBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = IosBackend::new();
//! for device in backend.running_devices().await? {
//!     let png_bytes = backend.screenshot(&device).await?;
//!     println!("{}: {} bytes", device.name, png_bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backend::{BackendError, DeviceBackend};
use crate::device::{Device, Platform};
use crate::process;

const XCRUN: &str = "xcrun";

/// A simulator entry as reported by `xcrun simctl list devices -j`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorDevice {
    /// The unique device identifier (UDID) for this simulator.
    pub udid: String,

    /// The human-readable name of the device (e.g., "iPhone 15 Pro").
    pub name: String,

    /// The current state of the device (e.g., "Booted", "Shutdown").
    pub state: String,

    /// `false` when the runtime for this simulator is missing.
    #[serde(rename = "isAvailable", default = "default_available")]
    pub is_available: bool,
}

fn default_available() -> bool {
    true
}

impl SimulatorDevice {
    pub fn is_booted(&self) -> bool {
        self.state == "Booted"
    }

    fn into_device(self) -> Device {
        let booted = self.is_booted();
        let mut device = Device::new(self.udid, self.name, Platform::Ios);
        device.booted = booted;
        device
    }
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: HashMap<String, Vec<SimulatorDevice>>,
}

/// Parses `simctl list devices -j` output into a flat list of simulators.
///
/// Unavailable simulators (missing runtime) are dropped.
pub fn parse_device_list(json: &[u8]) -> Result<Vec<SimulatorDevice>, BackendError> {
    let device_list: DeviceList = serde_json::from_slice(json)?;
    Ok(device_list
        .devices
        .into_values()
        .flatten()
        .filter(|d| d.is_available)
        .collect())
}

/// Splits a locale tag such as `fr_FR` into the `AppleLanguages` and
/// `AppleLocale` values simctl expects.
pub fn apple_locale(locale: &str) -> (String, String) {
    let normalized = locale.replace('-', "_");
    let language = normalized
        .split('_')
        .next()
        .unwrap_or(normalized.as_str())
        .to_string();
    (language, normalized)
}

/// Backend for iOS Simulators.
#[derive(Debug, Default, Clone)]
pub struct IosBackend;

impl IosBackend {
    pub fn new() -> Self {
        Self
    }

    async fn list_simulators(&self) -> Result<Vec<SimulatorDevice>, BackendError> {
        let stdout = process::run_bytes(XCRUN, ["simctl", "list", "devices", "-j"]).await?;
        parse_device_list(&stdout)
    }

    async fn simctl_boot(&self, udid: &str) -> Result<(), BackendError> {
        let out = process::output(XCRUN, ["simctl", "boot", udid]).await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            // Already booted is not an error
            if !stderr.contains("current state: Booted") {
                return Err(BackendError::CommandFailed(stderr.trim().to_string()));
            }
        }
        Ok(())
    }

    async fn simctl_shutdown(&self, udid: &str) -> Result<(), BackendError> {
        let out = process::output(XCRUN, ["simctl", "shutdown", udid]).await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if !stderr.contains("current state: Shutdown") {
                return Err(BackendError::CommandFailed(stderr.trim().to_string()));
            }
        }
        Ok(())
    }

    async fn write_global_default(
        &self,
        udid: &str,
        key: &str,
        value_args: &[&str],
    ) -> Result<(), BackendError> {
        let mut args = vec![
            "simctl",
            "spawn",
            udid,
            "defaults",
            "write",
            "Apple Global Domain",
            key,
        ];
        args.extend_from_slice(value_args);
        process::run(XCRUN, args).await?;
        Ok(())
    }

    /// Locale preferences only take effect on the next boot, so the simulator
    /// is booted, configured, and rebooted.
    async fn apply_locale(&self, udid: &str, locale: &str) -> Result<(), BackendError> {
        let (language, apple_locale) = apple_locale(locale);
        debug!(udid, %language, %apple_locale, "Applying simulator locale");

        self.write_global_default(udid, "AppleLanguages", &["-array", &language])
            .await?;
        self.write_global_default(udid, "AppleLocale", &["-string", &apple_locale])
            .await?;

        self.simctl_shutdown(udid).await?;
        self.simctl_boot(udid).await
    }
}

#[async_trait]
impl DeviceBackend for IosBackend {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    async fn list(&self, sink: mpsc::Sender<Device>) -> Result<(), BackendError> {
        for simulator in self.list_simulators().await? {
            if sink.send(simulator.into_device()).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn boot(&self, device: &Device, locale: Option<&str>) -> Result<Device, BackendError> {
        info!(udid = %device.id, name = %device.name, ?locale, "Booting simulator");
        self.simctl_boot(&device.id).await?;
        if let Some(locale) = locale {
            self.apply_locale(&device.id, locale).await?;
        }
        Ok(device.clone().into_booted(None).with_locale(locale))
    }

    async fn shutdown(&self, device: &Device) -> Result<(), BackendError> {
        info!(udid = %device.id, name = %device.name, "Shutting down simulator");
        self.simctl_shutdown(&device.id).await
    }

    async fn clean_status_bar(&self, device: &Device) -> Result<(), BackendError> {
        process::run(
            XCRUN,
            [
                "simctl",
                "status_bar",
                device.id.as_str(),
                "override",
                "--time",
                "9:41",
                "--dataNetwork",
                "wifi",
                "--wifiMode",
                "active",
                "--wifiBars",
                "3",
                "--cellularMode",
                "active",
                "--cellularBars",
                "4",
                "--batteryState",
                "charged",
                "--batteryLevel",
                "100",
            ],
        )
        .await?;
        Ok(())
    }

    /// The capture is written to a temporary file and read back into memory.
    async fn screenshot(&self, device: &Device) -> Result<Vec<u8>, BackendError> {
        let temp_path = std::env::temp_dir()
            .join(format!("simfleet_screenshot_{}.png", uuid::Uuid::new_v4()));
        let temp_str = temp_path.to_string_lossy().into_owned();

        process::run(
            XCRUN,
            ["simctl", "io", device.id.as_str(), "screenshot", temp_str.as_str()],
        )
        .await?;

        let bytes = tokio::fs::read(&temp_path).await?;
        let _ = tokio::fs::remove_file(&temp_path).await;
        Ok(bytes)
    }

    async fn running_devices(&self) -> Result<Vec<Device>, BackendError> {
        Ok(self
            .list_simulators()
            .await?
            .into_iter()
            .filter(SimulatorDevice::is_booted)
            .map(SimulatorDevice::into_device)
            .collect())
    }

    async fn wait_until_running(
        &self,
        device: &Device,
        timeout: Duration,
    ) -> Result<Device, BackendError> {
        let bootstatus = process::run(XCRUN, ["simctl", "bootstatus", device.id.as_str(), "-b"]);
        match tokio::time::timeout(timeout, bootstatus).await {
            Ok(result) => {
                result?;
                let mut ready = device.clone();
                ready.booted = true;
                Ok(ready)
            }
            Err(_) => Err(BackendError::ReadinessTimeout(timeout)),
        }
    }
}
