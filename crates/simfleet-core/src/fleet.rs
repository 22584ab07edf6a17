//! One-stop facade over the registry, lifecycle, and orchestrator.
//!
//! Single-device operations take an optional device selector. It is resolved
//! once, when the call starts: the named device if given, otherwise the first
//! running device. Front ends read any ambient "current device" setting
//! themselves and pass it in here.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::FleetConfig;
use crate::device::Device;
use crate::dispatch::Dispatcher;
use crate::lifecycle::{Lifecycle, LifecycleError};
use crate::orchestrator::{CallbackError, ForEachOptions, Orchestrator, OrchestratorError};
use crate::registry::{DeviceRegistry, RegistryError};
use crate::screenshot::{save_screenshot, ScreenshotError};

/// Errors surfaced by [`Fleet`] operations.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Screenshot(#[from] ScreenshotError),
}

#[derive(Debug, Clone)]
pub struct Fleet {
    orchestrator: Orchestrator,
}

impl Fleet {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            orchestrator: Orchestrator::new(dispatcher),
        }
    }

    /// A fleet using the host's Android and iOS command-line tools.
    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(Dispatcher::host(config.android_sdk_root.as_deref()))
    }

    pub fn registry(&self) -> &DeviceRegistry {
        self.orchestrator.registry()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        self.orchestrator.lifecycle()
    }

    /// Every device from every backend, in arrival order.
    pub async fn list(&self) -> Vec<Device> {
        self.registry().devices().collect().await
    }

    pub async fn resolve(&self, device: Option<&str>) -> Result<Device, FleetError> {
        Ok(self.registry().resolve(device).await?)
    }

    pub async fn boot(&self, device: Option<&str>, locale: Option<&str>) -> Result<Device, FleetError> {
        let device = self.resolve(device).await?;
        Ok(self.lifecycle().boot(&device, locale).await?)
    }

    /// Boot and wait until the device is usable.
    pub async fn boot_ready(
        &self,
        device: Option<&str>,
        locale: Option<&str>,
        timeout: Duration,
    ) -> Result<Device, FleetError> {
        let booted = self.boot(device, locale).await?;
        let ready = self.lifecycle().wait_until_ready(&booted, timeout).await?;
        Ok(ready.with_locale(booted.locale.as_deref()))
    }

    pub async fn shutdown(&self, device: Option<&str>) -> Result<Device, FleetError> {
        let device = self.resolve(device).await?;
        self.lifecycle().shutdown(&device).await?;
        Ok(device.into_shutdown())
    }

    pub async fn shutdown_all(&self) {
        self.lifecycle().shutdown_all().await;
    }

    pub async fn clean_status_bar(&self, device: Option<&str>) -> Result<Device, FleetError> {
        let device = self.resolve(device).await?;
        self.lifecycle().clean_status_bar(&device).await?;
        Ok(device)
    }

    /// Raw PNG bytes of the device screen.
    pub async fn screenshot_bytes(&self, device: Option<&str>) -> Result<Vec<u8>, FleetError> {
        let device = self.resolve(device).await?;
        Ok(self.lifecycle().screenshot(&device).await?)
    }

    /// Save a capture into `dir` and return its path.
    pub async fn screenshot(
        &self,
        device: Option<&str>,
        dir: &Path,
        label: Option<&str>,
    ) -> Result<PathBuf, FleetError> {
        let device = self.resolve(device).await?;
        Ok(save_screenshot(self.lifecycle(), &device, dir, label).await?)
    }

    pub async fn for_each<F, Fut, E>(&self, options: &ForEachOptions, work: F) -> Result<usize, FleetError>
    where
        F: FnMut(Device) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<CallbackError>,
    {
        Ok(self.orchestrator.for_each(options, work).await?)
    }
}
