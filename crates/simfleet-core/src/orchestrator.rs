//! Sequential device × locale orchestration.
//!
//! [`Orchestrator::for_each`] is the entry point for batch work: it selects
//! devices from the registry, pairs each with every requested locale, and
//! processes the pairs one at a time:
//!
//! 1. **Boot** the device with the locale applied
//! 2. **Wait** until it is ready, bounded by the timeout
//! 3. **Invoke** the caller's work with the ready snapshot
//! 4. **Shut down** the device, whether or not the work succeeded
//!
//! Units never overlap. Emulators are heavy host resources, so at most one
//! device booted by the loop is running at any time.
//!
//! A device that appears in several units is booted afresh for each one,
//! starting from the snapshot its previous shutdown produced.
//!
//! A boot or readiness failure aborts the whole run without shutting the
//! device down; the device is left as the backend left it so it can be
//! inspected. A failure in the caller's work is returned after that unit's
//! shutdown has been attempted. No unit after a failure is started.
//!
//! # Example
//!
//! ```no_run
//! use simfleet_core::dispatch::Dispatcher;
//! use simfleet_core::orchestrator::{ForEachOptions, Orchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(Dispatcher::host(None));
//! let options = ForEachOptions::new(["Pixel_5", "iPhone 15"])
//!     .with_locales(["en_US", "fr_FR"]);
//!
//! orchestrator
//!     .for_each(&options, |device| async move {
//!         println!("ready: {device}");
//!         Ok::<(), std::io::Error>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::device::Device;
use crate::dispatch::Dispatcher;
use crate::lifecycle::{Lifecycle, LifecycleError};
use crate::registry::DeviceRegistry;

/// Default bound on the readiness wait.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(180);

/// Boxed error returned by caller-supplied work.
pub type CallbackError = Box<dyn StdError + Send + Sync>;

/// Errors that end a [`Orchestrator::for_each`] run.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Boot, readiness, or shutdown failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The caller's work failed for one unit.
    #[error("Callback failed for {id} (locale {}): {source}", .locale.as_deref().unwrap_or("default"))]
    Callback {
        id: String,
        locale: Option<String>,
        #[source]
        source: CallbackError,
    },
}

/// What [`Orchestrator::for_each`] iterates over.
#[derive(Debug, Clone)]
pub struct ForEachOptions {
    /// Device ids or names; a device is selected when any token matches.
    pub selectors: Vec<String>,
    /// Bound on the readiness wait for each unit.
    pub timeout: Duration,
    /// Locale variants; `None` boots without a locale.
    pub locales: Vec<Option<String>>,
}

impl ForEachOptions {
    /// Options with the default timeout and the single no-locale variant.
    pub fn new<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selectors: selectors.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_READY_TIMEOUT,
            locales: vec![None],
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Iterate every device once per locale. An empty list keeps the single
    /// no-locale variant.
    pub fn with_locales<I, S>(mut self, locales: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let locales: Vec<Option<String>> = locales.into_iter().map(|l| Some(l.into())).collect();
        self.locales = if locales.is_empty() { vec![None] } else { locales };
        self
    }
}

/// One (device, locale) pair.
#[derive(Debug, Clone)]
pub struct Unit {
    pub device: Device,
    pub locale: Option<String>,
}

/// Cross product of devices and locales, device-major.
pub fn units(devices: &[Device], locales: &[Option<String>]) -> Vec<Unit> {
    devices
        .iter()
        .flat_map(|device| {
            locales.iter().map(move |locale| Unit {
                device: device.clone(),
                locale: locale.clone(),
            })
        })
        .collect()
}

/// Runs caller work across devices and locales, one unit at a time.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: DeviceRegistry,
    lifecycle: Lifecycle,
}

impl Orchestrator {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            registry: DeviceRegistry::new(dispatcher.clone()),
            lifecycle: Lifecycle::new(dispatcher),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Run `work` once per selected (device, locale) unit.
    ///
    /// Returns the number of units processed. Fails with the first error;
    /// later units are not started.
    pub async fn for_each<F, Fut, E>(&self, options: &ForEachOptions, mut work: F) -> Result<usize, OrchestratorError>
    where
        F: FnMut(Device) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<CallbackError>,
    {
        let devices = self.registry.matching(&options.selectors).await;
        let units = units(&devices, &options.locales);
        info!(devices = devices.len(), units = units.len(), "Starting device iteration");

        // Snapshots of devices this run has already shut down, by id.
        let mut released: HashMap<String, Device> = HashMap::new();

        for (index, unit) in units.iter().enumerate() {
            let span = info_span!(
                "unit",
                index,
                device = %unit.device.id,
                locale = unit.locale.as_deref().unwrap_or("default"),
            );
            let device = released.remove(&unit.device.id).unwrap_or_else(|| unit.device.clone());
            let down = self
                .run_unit(device, unit.locale.as_deref(), options.timeout, &mut work)
                .instrument(span)
                .await?;
            released.insert(down.id.clone(), down);
        }

        Ok(units.len())
    }

    /// Boot, wait, work, shut down. Returns the post-shutdown snapshot.
    async fn run_unit<F, Fut, E>(
        &self,
        device: Device,
        locale: Option<&str>,
        timeout: Duration,
        work: &mut F,
    ) -> Result<Device, OrchestratorError>
    where
        F: FnMut(Device) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<CallbackError>,
    {
        let booted = self.lifecycle.boot(&device, locale).await?;
        let ready = self.lifecycle.wait_until_ready(&booted, timeout).await?;
        let ready = restore_boot_state(ready, &booted, locale);

        info!("Device ready, running work");
        let outcome = match AssertUnwindSafe(async move { work(ready).await }).catch_unwind().await {
            Ok(result) => result.map_err(|e| OrchestratorError::Callback {
                id: device.id.clone(),
                locale: locale.map(str::to_string),
                source: e.into(),
            }),
            Err(panic) => {
                warn!("Work panicked, shutting down before unwinding");
                if let Err(e) = self.lifecycle.shutdown(&booted).await {
                    warn!(error = %e, "Shutdown after panicked work failed");
                }
                resume_unwind(panic);
            }
        };

        let shutdown = self.lifecycle.shutdown(&booted).await;

        match (outcome, shutdown) {
            (Err(e), Err(shutdown_err)) => {
                warn!(error = %shutdown_err, "Shutdown after failed work also failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(shutdown_err)) => Err(shutdown_err.into()),
            (Ok(()), Ok(())) => Ok(booted.into_shutdown()),
        }
    }
}

/// Readiness checks may hand back a snapshot without the fields that only
/// the boot step knows about.
fn restore_boot_state(mut ready: Device, booted: &Device, locale: Option<&str>) -> Device {
    if ready.process.is_none() {
        ready.process = booted.process.clone();
    }
    if ready.serial.is_none() {
        ready.serial = booted.serial.clone();
    }
    ready.booted = true;
    ready.with_locale(locale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Platform;

    fn device(id: &str) -> Device {
        Device::new(id, id, Platform::Android)
    }

    #[test]
    fn units_are_device_major() {
        let devices = vec![device("a"), device("b")];
        let locales = vec![Some("en_US".to_string()), Some("fr_FR".to_string())];

        let order: Vec<(String, Option<String>)> = units(&devices, &locales)
            .into_iter()
            .map(|u| (u.device.id, u.locale))
            .collect();

        assert_eq!(
            order,
            vec![
                ("a".to_string(), Some("en_US".to_string())),
                ("a".to_string(), Some("fr_FR".to_string())),
                ("b".to_string(), Some("en_US".to_string())),
                ("b".to_string(), Some("fr_FR".to_string())),
            ]
        );
    }

    #[test]
    fn units_empty_when_no_devices() {
        assert!(units(&[], &[None]).is_empty());
    }

    #[test]
    fn options_defaults() {
        let options = ForEachOptions::new(["Pixel_5"]);
        assert_eq!(options.selectors, vec!["Pixel_5".to_string()]);
        assert_eq!(options.timeout, Duration::from_secs(180));
        assert_eq!(options.locales, vec![None]);
    }

    #[test]
    fn empty_locale_list_keeps_default_variant() {
        let options = ForEachOptions::new(["Pixel_5"]).with_locales(Vec::<String>::new());
        assert_eq!(options.locales, vec![None]);
    }

    #[test]
    fn restore_boot_state_reapplies_locale_and_serial() {
        let mut booted = device("Pixel_5").into_booted(None);
        booted.serial = Some("emulator-5554".to_string());
        booted.locale = Some("fr_FR".to_string());

        let ready = restore_boot_state(device("Pixel_5"), &booted, Some("fr_FR"));
        assert!(ready.booted);
        assert_eq!(ready.locale.as_deref(), Some("fr_FR"));
        assert_eq!(ready.serial.as_deref(), Some("emulator-5554"));
    }

    #[test]
    fn callback_error_display_names_locale() {
        let err = OrchestratorError::Callback {
            id: "Pixel_5".to_string(),
            locale: None,
            source: "boom".into(),
        };
        assert_eq!(err.to_string(), "Callback failed for Pixel_5 (locale default): boom");
    }
}
