//! # simfleet-core
//!
//! Core library for orchestrating Android emulators and iOS Simulators.
//!
//! This crate enumerates devices across platforms, boots them to a ready
//! state, runs caller work against each device and locale in turn, captures
//! screenshots, and shuts devices down again.
//!
//! ## Modules
//!
//! - [`device`] - Device snapshots and platform tags
//! - [`backend`] - The [`backend::DeviceBackend`] trait every platform implements
//! - [`android`] - Backend over the Android SDK's `adb` and `emulator`
//! - [`ios`] - Backend over Apple's `xcrun simctl`
//! - [`dispatch`] - Platform → backend routing table
//! - [`registry`] - Merged, streaming device enumeration
//! - [`lifecycle`] - Boot, readiness, and shutdown of single devices
//! - [`orchestrator`] - Sequential device × locale iteration
//! - [`screenshot`] - Screenshot naming and persistence
//! - [`fleet`] - Facade tying the above together
//! - [`config`] - Persistent settings in `~/.simfleet/`
//!
//! ## External Dependencies
//!
//! - **Android SDK** (`adb`, `emulator`) for Android devices
//! - **Xcode** (`xcrun simctl`) for iOS Simulators
//!
//! A platform whose tools are missing simply contributes no devices.
//!
//! ## Example
//!
//! ```no_run
//! use simfleet_core::config::FleetConfig;
//! use simfleet_core::fleet::Fleet;
//! use simfleet_core::orchestrator::ForEachOptions;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fleet = Fleet::from_config(&FleetConfig::load());
//! let options = ForEachOptions::new(["Pixel_5"]).with_locales(["en_US", "de_DE"]);
//!
//! let shots = std::path::Path::new("screenshots");
//! let lifecycle = fleet.lifecycle().clone();
//! fleet
//!     .for_each(&options, |device| {
//!         let lifecycle = lifecycle.clone();
//!         async move {
//!             simfleet_core::screenshot::save_screenshot(&lifecycle, &device, shots, Some("home")).await?;
//!             Ok::<(), simfleet_core::screenshot::ScreenshotError>(())
//!         }
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod android;
pub mod backend;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod fleet;
pub mod ios;
pub mod lifecycle;
pub mod orchestrator;
pub mod process;
pub mod registry;
pub mod screenshot;
