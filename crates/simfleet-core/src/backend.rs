//! Platform backend trait.
//!
//! A [`DeviceBackend`] is the capability table one platform exposes to the
//! orchestrator: listing, boot, shutdown, readiness, screenshots, and status
//! bar cleanup. The Android and iOS implementations live in
//! [`crate::android`] and [`crate::ios`]; tests plug in in-memory backends.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::device::{Device, Platform};

/// Errors a backend can report.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The platform tool is not installed or not on `PATH`.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A platform command exited unsuccessfully.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// The backend does not know the requested device.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The operation requires a running device.
    #[error("Device is not running: {0}")]
    NotRunning(String),

    /// The device booted but never became usable.
    #[error("Device did not become ready within {0:?}")]
    ReadinessTimeout(Duration),

    /// Failed to parse JSON output from a platform tool.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operations every platform implementation provides.
///
/// Implementations must be safe to share across tasks; the registry calls
/// [`list`](Self::list) from a spawned producer task.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// The platform this backend serves.
    fn platform(&self) -> Platform;

    /// Push every known device into `sink` as soon as it is discovered.
    ///
    /// A closed sink means the consumer went away; implementations should
    /// stop early and return `Ok(())`.
    async fn list(&self, sink: mpsc::Sender<Device>) -> Result<(), BackendError>;

    /// Start the device, applying `locale` if given, and return the booted
    /// snapshot.
    async fn boot(&self, device: &Device, locale: Option<&str>) -> Result<Device, BackendError>;

    /// Stop the device. Must succeed for devices that are not running.
    async fn shutdown(&self, device: &Device) -> Result<(), BackendError>;

    /// Put the status bar into a clean, deterministic state for screenshots.
    async fn clean_status_bar(&self, device: &Device) -> Result<(), BackendError>;

    /// Capture the screen as PNG bytes.
    async fn screenshot(&self, device: &Device) -> Result<Vec<u8>, BackendError>;

    /// Devices that are currently running.
    async fn running_devices(&self) -> Result<Vec<Device>, BackendError>;

    /// Block until the booted device is usable, or fail with
    /// [`BackendError::ReadinessTimeout`] after `timeout`.
    async fn wait_until_running(
        &self,
        device: &Device,
        timeout: Duration,
    ) -> Result<Device, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_command_failed() {
        let err = BackendError::CommandFailed("adb: device offline".to_string());
        assert_eq!(err.to_string(), "Command execution failed: adb: device offline");
    }

    #[test]
    fn error_display_tool_not_found() {
        let err = BackendError::ToolNotFound("xcrun".to_string());
        assert_eq!(err.to_string(), "Tool not found: xcrun");
    }

    #[test]
    fn error_display_readiness_timeout() {
        let err = BackendError::ReadinessTimeout(Duration::from_secs(3));
        assert_eq!(err.to_string(), "Device did not become ready within 3s");
    }

    #[test]
    fn error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = BackendError::Io(io_err);
        assert!(err.to_string().contains("IO error"));
        assert!(err.to_string().contains("file not found"));
    }
}
