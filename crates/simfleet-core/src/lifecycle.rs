//! Boot, readiness, and shutdown transitions for single devices.
//!
//! [`Lifecycle`] drives a device through not-booted → booted → ready →
//! shutdown by routing each step to the device's platform backend. It holds
//! no device state of its own; every call takes and returns snapshots.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, DeviceBackend};
use crate::device::{Device, Platform};
use crate::dispatch::Dispatcher;
use crate::registry::DeviceRegistry;

/// Errors from lifecycle operations.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// No backend is registered for the device's platform.
    #[error("No backend registered for platform {0}")]
    NoBackend(Platform),

    /// The backend failed to start the device.
    #[error("Failed to boot {id}: {source}")]
    Boot {
        id: String,
        #[source]
        source: BackendError,
    },

    /// The device booted but its readiness check failed.
    #[error("Readiness check failed for {id}: {source}")]
    Readiness {
        id: String,
        #[source]
        source: BackendError,
    },

    /// The device booted but was not usable before the deadline.
    #[error("{id} did not become ready within {timeout:?}")]
    ReadinessTimeout { id: String, timeout: Duration },

    /// The backend failed to stop the device.
    #[error("Failed to shut down {id}: {source}")]
    Shutdown {
        id: String,
        #[source]
        source: BackendError,
    },

    /// Any other backend operation failed.
    #[error("Backend error for {id}: {source}")]
    Backend {
        id: String,
        #[source]
        source: BackendError,
    },
}

/// Per-device state transitions.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    dispatcher: Dispatcher,
}

impl Lifecycle {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    fn backend(&self, device: &Device) -> Result<&Arc<dyn DeviceBackend>, LifecycleError> {
        self.dispatcher
            .backend_for(device)
            .ok_or(LifecycleError::NoBackend(device.platform))
    }

    /// Boot `device` with `locale` applied.
    ///
    /// An already booted device is returned unchanged without touching the
    /// backend, and `locale` is ignored in that case.
    pub async fn boot(&self, device: &Device, locale: Option<&str>) -> Result<Device, LifecycleError> {
        if device.booted {
            debug!(id = %device.id, "Device already booted");
            return Ok(device.clone());
        }

        let mut booted = self
            .backend(device)?
            .boot(device, locale)
            .await
            .map_err(|source| LifecycleError::Boot {
                id: device.id.clone(),
                source,
            })?;

        info!(id = %device.id, ?locale, "Device booted");
        booted.booted = true;
        Ok(booted.with_locale(locale))
    }

    /// Wait until the booted device is usable, bounded by `timeout`.
    ///
    /// The returned snapshot may lack the locale; callers re-apply it.
    pub async fn wait_until_ready(&self, device: &Device, timeout: Duration) -> Result<Device, LifecycleError> {
        let backend = self.backend(device)?;
        match tokio::time::timeout(timeout, backend.wait_until_running(device, timeout)).await {
            Ok(Ok(ready)) => {
                debug!(id = %device.id, "Device ready");
                Ok(ready)
            }
            Ok(Err(BackendError::ReadinessTimeout(_))) | Err(_) => Err(LifecycleError::ReadinessTimeout {
                id: device.id.clone(),
                timeout,
            }),
            Ok(Err(source)) => Err(LifecycleError::Readiness {
                id: device.id.clone(),
                source,
            }),
        }
    }

    /// Shut `device` down. Safe on devices this process did not boot.
    pub async fn shutdown(&self, device: &Device) -> Result<(), LifecycleError> {
        self.backend(device)?
            .shutdown(device)
            .await
            .map_err(|source| LifecycleError::Shutdown {
                id: device.id.clone(),
                source,
            })?;
        info!(id = %device.id, "Device shut down");
        Ok(())
    }

    /// Shut down every running device, best effort.
    ///
    /// Failures are logged per device and never stop the sweep.
    pub async fn shutdown_all(&self) {
        let running = DeviceRegistry::new(self.dispatcher.clone()).running().await;
        info!(count = running.len(), "Shutting down all running devices");

        for device in &running {
            if let Err(e) = self.shutdown(device).await {
                warn!(id = %device.id, error = %e, "Shutdown failed, continuing");
            }
        }
    }

    pub async fn clean_status_bar(&self, device: &Device) -> Result<(), LifecycleError> {
        self.backend(device)?
            .clean_status_bar(device)
            .await
            .map_err(|source| LifecycleError::Backend {
                id: device.id.clone(),
                source,
            })
    }

    /// Capture the device screen as PNG bytes.
    pub async fn screenshot(&self, device: &Device) -> Result<Vec<u8>, LifecycleError> {
        self.backend(device)?
            .screenshot(device)
            .await
            .map_err(|source| LifecycleError::Backend {
                id: device.id.clone(),
                source,
            })
    }
}
