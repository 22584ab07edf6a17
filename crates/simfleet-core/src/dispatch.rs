//! Routing from a device's platform to the backend that serves it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::android::AndroidBackend;
use crate::backend::DeviceBackend;
use crate::device::{Device, Platform};
use crate::ios::IosBackend;

/// Capability table with one backend per platform, populated at startup.
#[derive(Clone, Default)]
pub struct Dispatcher {
    backends: HashMap<Platform, Arc<dyn DeviceBackend>>,
}

impl Dispatcher {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The command-line backends for both platforms.
    pub fn host(android_sdk_root: Option<&Path>) -> Self {
        Self::new()
            .with_backend(Arc::new(AndroidBackend::new(android_sdk_root)))
            .with_backend(Arc::new(IosBackend::new()))
    }

    /// Register `backend` for its platform, replacing any previous entry.
    pub fn with_backend(mut self, backend: Arc<dyn DeviceBackend>) -> Self {
        self.backends.insert(backend.platform(), backend);
        self
    }

    pub fn backend(&self, platform: Platform) -> Option<&Arc<dyn DeviceBackend>> {
        self.backends.get(&platform)
    }

    pub fn backend_for(&self, device: &Device) -> Option<&Arc<dyn DeviceBackend>> {
        self.backend(device.platform)
    }

    /// Every registered backend, in no particular order.
    pub fn backends(&self) -> impl Iterator<Item = &Arc<dyn DeviceBackend>> {
        self.backends.values()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("platforms", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}
