//! Shared test helpers for simfleet-core integration tests.
//!
//! This module provides a scriptable in-memory backend that records every
//! call it receives, so tests can assert on the exact sequence of boot,
//! readiness, and shutdown steps across platforms.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use simfleet_core::backend::{BackendError, DeviceBackend};
use simfleet_core::device::{Device, Platform};
use simfleet_core::dispatch::Dispatcher;

// ---------------------------------------------------------------------------
// Call log
// ---------------------------------------------------------------------------

/// One backend call, as recorded by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(Platform),
    Boot { id: String, locale: Option<String> },
    Wait(String),
    Shutdown(String),
    Screenshot(String),
    CleanStatusBar(String),
    Running(Platform),
}

/// Call log shared by every mock in a test.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Calls other than enumeration, which happens on background tasks.
    pub fn lifecycle_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List(_) | Call::Running(_)))
            .collect()
    }

    pub fn boots(&self) -> Vec<(String, Option<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Boot { id, locale } => Some((id, locale)),
                _ => None,
            })
            .collect()
    }

    pub fn shutdowns(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Shutdown(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Programmable mock backend
// ---------------------------------------------------------------------------

/// In-memory backend whose failures are scripted per device id.
pub struct MockBackend {
    platform: Platform,
    log: CallLog,
    devices: Vec<Device>,
    /// Delay before each device is emitted by `list`.
    list_delay: Duration,
    fail_list: bool,
    fail_boot: HashSet<String>,
    fail_shutdown: HashSet<String>,
    never_ready: HashSet<String>,
}

impl MockBackend {
    pub fn new(platform: Platform, log: &CallLog) -> Self {
        Self {
            platform,
            log: log.clone(),
            devices: Vec::new(),
            list_delay: Duration::ZERO,
            fail_list: false,
            fail_boot: HashSet::new(),
            fail_shutdown: HashSet::new(),
            never_ready: HashSet::new(),
        }
    }

    /// Add a device that is not running.
    pub fn device(mut self, name: &str) -> Self {
        self.devices.push(Device::new(name, name, self.platform));
        self
    }

    /// Add a device that is already running.
    pub fn running_device(mut self, name: &str) -> Self {
        let mut device = Device::new(name, name, self.platform);
        device.booted = true;
        self.devices.push(device);
        self
    }

    pub fn list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    pub fn fail_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn fail_boot(mut self, id: &str) -> Self {
        self.fail_boot.insert(id.to_string());
        self
    }

    pub fn fail_shutdown(mut self, id: &str) -> Self {
        self.fail_shutdown.insert(id.to_string());
        self
    }

    pub fn never_ready(mut self, id: &str) -> Self {
        self.never_ready.insert(id.to_string());
        self
    }

    pub fn into_arc(self) -> Arc<dyn DeviceBackend> {
        Arc::new(self)
    }
}

#[async_trait]
impl DeviceBackend for MockBackend {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn list(&self, sink: mpsc::Sender<Device>) -> Result<(), BackendError> {
        self.log.push(Call::List(self.platform));
        if self.fail_list {
            return Err(BackendError::ToolNotFound(format!("{}-tool", self.platform)));
        }
        for device in &self.devices {
            if !self.list_delay.is_zero() {
                tokio::time::sleep(self.list_delay).await;
            }
            if sink.send(device.clone()).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn boot(&self, device: &Device, locale: Option<&str>) -> Result<Device, BackendError> {
        self.log.push(Call::Boot {
            id: device.id.clone(),
            locale: locale.map(str::to_string),
        });
        if self.fail_boot.contains(&device.id) {
            return Err(BackendError::CommandFailed(format!("{} crashed", device.id)));
        }
        let mut booted = device.clone().into_booted(None).with_locale(locale);
        booted.serial = Some(format!("mock-{}", device.id));
        Ok(booted)
    }

    async fn shutdown(&self, device: &Device) -> Result<(), BackendError> {
        self.log.push(Call::Shutdown(device.id.clone()));
        if self.fail_shutdown.contains(&device.id) {
            return Err(BackendError::CommandFailed(format!("{} refused to stop", device.id)));
        }
        Ok(())
    }

    async fn clean_status_bar(&self, device: &Device) -> Result<(), BackendError> {
        self.log.push(Call::CleanStatusBar(device.id.clone()));
        Ok(())
    }

    async fn screenshot(&self, device: &Device) -> Result<Vec<u8>, BackendError> {
        self.log.push(Call::Screenshot(device.id.clone()));
        Ok(b"\x89PNG\r\n\x1a\nmock".to_vec())
    }

    async fn running_devices(&self) -> Result<Vec<Device>, BackendError> {
        self.log.push(Call::Running(self.platform));
        Ok(self.devices.iter().filter(|d| d.booted).cloned().collect())
    }

    /// Ready snapshots deliberately come back without the locale.
    async fn wait_until_running(
        &self,
        device: &Device,
        _timeout: Duration,
    ) -> Result<Device, BackendError> {
        self.log.push(Call::Wait(device.id.clone()));
        if self.never_ready.contains(&device.id) {
            std::future::pending::<()>().await;
        }
        let mut ready = device.clone();
        ready.locale = None;
        Ok(ready)
    }
}

/// A dispatcher holding the given mocks.
pub fn dispatcher(backends: Vec<MockBackend>) -> Dispatcher {
    backends
        .into_iter()
        .fold(Dispatcher::new(), |d, b| d.with_backend(b.into_arc()))
}

/// A unique scratch directory under the system temp dir.
pub fn scratch_dir() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("simfleet_test_{}", uuid::Uuid::new_v4().simple()))
}
