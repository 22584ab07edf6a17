//! Merged device enumeration across every registered backend.
//!
//! [`DeviceRegistry::devices`] fans out one producer task per backend and
//! fans their results into a single channel, so the first device arrives as
//! soon as any backend finds one. A backend that fails to enumerate (for
//! example because its tools are not installed) is logged and skipped; the
//! other backends keep delivering.
//!
//! # Example
//!
//! ```no_run
//! use simfleet_core::dispatch::Dispatcher;
//! use simfleet_core::registry::DeviceRegistry;
//!
//! # async fn example() {
//! let registry = DeviceRegistry::new(Dispatcher::host(None));
//! let mut devices = registry.devices();
//! while let Some(device) = devices.next().await {
//!     println!("{device}");
//! }
//! # }
//! ```

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn, Instrument};

use crate::device::Device;
use crate::dispatch::Dispatcher;

/// Buffered devices per enumeration before producers wait on the consumer.
const CHANNEL_CAPACITY: usize = 32;

/// Errors from device lookup.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No device has the given id or name.
    #[error("No device matches '{0}'")]
    DeviceNotFound(String),

    /// No selector was given and no device is running.
    #[error("No device selected and none is running")]
    NoDeviceSelected,
}

/// Live sequence of devices from all backends, in arrival order.
///
/// The sequence ends once every producer has finished.
pub struct DeviceStream {
    rx: mpsc::Receiver<Device>,
}

impl DeviceStream {
    /// The next device, or `None` when every backend is done.
    pub async fn next(&mut self) -> Option<Device> {
        self.rx.recv().await
    }

    /// Drain the stream into a vector, preserving arrival order.
    pub async fn collect(mut self) -> Vec<Device> {
        let mut devices = Vec::new();
        while let Some(device) = self.next().await {
            devices.push(device);
        }
        devices
    }
}

/// Queries backends for devices. Nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    dispatcher: Dispatcher,
}

impl DeviceRegistry {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Start enumerating every backend concurrently.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn devices(&self) -> DeviceStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        for backend in self.dispatcher.backends() {
            let backend = backend.clone();
            let tx = tx.clone();
            let platform = backend.platform();
            tokio::spawn(
                async move {
                    match backend.list(tx).await {
                        Ok(()) => debug!("Enumeration finished"),
                        Err(e) => warn!(error = %e, "Device enumeration failed"),
                    }
                }
                .instrument(tracing::debug_span!("enumerate", %platform)),
            );
        }

        DeviceStream { rx }
    }

    /// Devices matching any of `selectors`, in arrival order.
    pub async fn matching(&self, selectors: &[String]) -> Vec<Device> {
        let mut stream = self.devices();
        let mut matched = Vec::new();
        while let Some(device) = stream.next().await {
            if selectors.iter().any(|s| device.matches(s)) {
                matched.push(device);
            }
        }
        matched
    }

    /// The first device whose id or name equals `selector`.
    pub async fn find(&self, selector: &str) -> Result<Device, RegistryError> {
        let mut stream = self.devices();
        while let Some(device) = stream.next().await {
            if device.matches(selector) {
                return Ok(device);
            }
        }
        Err(RegistryError::DeviceNotFound(selector.to_string()))
    }

    /// Every currently running device. Backends that fail are skipped.
    pub async fn running(&self) -> Vec<Device> {
        let mut running = Vec::new();
        for backend in self.dispatcher.backends() {
            match backend.running_devices().await {
                Ok(devices) => running.extend(devices),
                Err(e) => warn!(platform = %backend.platform(), error = %e, "Running device query failed"),
            }
        }
        running
    }

    /// Resolve an optional selector once, at the call boundary: the named
    /// device when given, otherwise the first running device.
    pub async fn resolve(&self, selector: Option<&str>) -> Result<Device, RegistryError> {
        match selector {
            Some(selector) => self.find(selector).await,
            None => self
                .running()
                .await
                .into_iter()
                .next()
                .ok_or(RegistryError::NoDeviceSelected),
        }
    }
}
