//! Android backend built on the SDK's `adb` and `emulator` tools.
//!
//! Running devices come from `adb devices`; AVDs that are not running come
//! from `emulator -list-avds`. An AVD keeps its name as its [`Device::id`]
//! whether or not it is running, and the adb serial (`emulator-5554`) is
//! carried in [`Device::serial`] while it runs.
//!
//! # Tool resolution
//!
//! Tools are looked up under the SDK root (`platform-tools/adb`,
//! `emulator/emulator`) when one is configured or set through
//! `ANDROID_SDK_ROOT` / `ANDROID_HOME`, and on `PATH` otherwise.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, DeviceBackend};
use crate::device::{Device, Platform, ProcessHandle};
use crate::process;

/// First console port the emulator accepts; serials are `emulator-<port>`.
const FIRST_CONSOLE_PORT: u16 = 5554;
/// Last console port the emulator accepts.
const LAST_CONSOLE_PORT: u16 = 5584;
const EMULATOR_SERIAL_PREFIX: &str = "emulator-";
/// How often readiness is polled.
const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// How long an owned emulator process gets to exit after `emu kill`.
const EXIT_GRACE: Duration = Duration::from_secs(30);
/// How long a freshly spawned emulator may take to show up in `adb devices`.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(60);

/// One line of `adb devices` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbEntry {
    pub serial: String,
    /// `device`, `offline`, `unauthorized`, ...
    pub state: String,
}

impl AdbEntry {
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }

    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with(EMULATOR_SERIAL_PREFIX)
    }
}

/// Parses `adb devices` output, skipping the header and daemon chatter.
pub fn parse_adb_devices(output: &str) -> Vec<AdbEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(AdbEntry {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// Parses `emulator -list-avds` output into AVD names.
pub fn parse_avd_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        // The emulator prints diagnostics prefixed with INFO/WARNING to stdout.
        .filter(|line| !line.is_empty() && !line.contains(' ') && !line.contains('|'))
        .map(str::to_string)
        .collect()
}

/// Parses `adb emu avd name` output ("Pixel_5\r\nOK") into the AVD name.
pub fn parse_avd_name(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != "OK")
        .map(str::to_string)
}

/// Converts `fr_FR` into the `fr-FR` form `-change-locale` expects.
pub fn emulator_locale(locale: &str) -> String {
    locale.replace('_', "-")
}

/// The first even console port in the emulator's range not already used by
/// one of `serials`.
pub fn free_console_port<'a, I>(serials: I) -> Option<u16>
where
    I: IntoIterator<Item = &'a str>,
{
    let used: HashSet<u16> = serials
        .into_iter()
        .filter_map(|s| s.strip_prefix(EMULATOR_SERIAL_PREFIX))
        .filter_map(|port| port.parse().ok())
        .collect();
    (FIRST_CONSOLE_PORT..=LAST_CONSOLE_PORT)
        .step_by(2)
        .find(|port| !used.contains(port))
}

/// Backend for Android emulators and adb-attached devices.
/// `CommandFailed` if the emulator process owned by `handle` has exited.
async fn check_alive(avd: &str, handle: &ProcessHandle) -> Result<(), BackendError> {
    match handle.try_wait().await? {
        Some(status) => Err(BackendError::CommandFailed(format!(
            "emulator for {avd} exited with {status}"
        ))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct AndroidBackend {
    adb: PathBuf,
    emulator: PathBuf,
}

impl Default for AndroidBackend {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AndroidBackend {
    /// Resolve tools under `sdk_root`, falling back to the SDK environment
    /// variables and then `PATH`.
    pub fn new(sdk_root: Option<&Path>) -> Self {
        let sdk_root = sdk_root.map(Path::to_path_buf).or_else(|| {
            std::env::var_os("ANDROID_SDK_ROOT")
                .or_else(|| std::env::var_os("ANDROID_HOME"))
                .map(PathBuf::from)
        });

        match sdk_root {
            Some(root) => Self {
                adb: root.join("platform-tools").join("adb"),
                emulator: root.join("emulator").join("emulator"),
            },
            None => Self {
                adb: PathBuf::from("adb"),
                emulator: PathBuf::from("emulator"),
            },
        }
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb
    }

    pub fn emulator_path(&self) -> &Path {
        &self.emulator
    }

    async fn adb_entries(&self) -> Result<Vec<AdbEntry>, BackendError> {
        let out = process::run(&self.adb, ["devices"]).await?;
        Ok(parse_adb_devices(&out))
    }

    async fn adb_shell(&self, serial: &str, command: &[&str]) -> Result<String, BackendError> {
        let mut args = vec!["-s", serial, "shell"];
        args.extend_from_slice(command);
        process::run(&self.adb, args).await
    }

    /// Snapshot for an online adb entry.
    async fn describe(&self, entry: &AdbEntry) -> Result<Device, BackendError> {
        let mut device = if entry.is_emulator() {
            let out = process::run(&self.adb, ["-s", entry.serial.as_str(), "emu", "avd", "name"]).await?;
            let avd = parse_avd_name(&out).unwrap_or_else(|| entry.serial.clone());
            Device::new(avd.clone(), avd, Platform::Android)
        } else {
            let model = self
                .adb_shell(&entry.serial, &["getprop", "ro.product.model"])
                .await
                .map(|m| m.trim().to_string())
                .unwrap_or_default();
            let name = if model.is_empty() { entry.serial.clone() } else { model };
            let mut device = Device::new(entry.serial.clone(), name, Platform::Android);
            device.is_emulator = false;
            device
        };
        device.booted = true;
        device.serial = Some(entry.serial.clone());
        Ok(device)
    }

    async fn running(&self) -> Result<Vec<Device>, BackendError> {
        let mut devices = Vec::new();
        for entry in self.adb_entries().await?.iter().filter(|e| e.is_online()) {
            match self.describe(entry).await {
                Ok(device) => devices.push(device),
                Err(e) => warn!(serial = %entry.serial, error = %e, "Skipping unresponsive device"),
            }
        }
        Ok(devices)
    }

    /// The adb serial of `device`, looked up among running devices when the
    /// snapshot does not carry one.
    async fn serial_of(&self, device: &Device) -> Result<Option<String>, BackendError> {
        if let Some(serial) = &device.serial {
            return Ok(Some(serial.clone()));
        }
        if !device.is_emulator {
            return Ok(Some(device.id.clone()));
        }
        Ok(self
            .running()
            .await?
            .into_iter()
            .find(|d| d.id == device.id)
            .and_then(|d| d.serial))
    }

    async fn require_serial(&self, device: &Device) -> Result<String, BackendError> {
        self.serial_of(device)
            .await?
            .ok_or_else(|| BackendError::NotRunning(device.id.clone()))
    }

    /// Wait for a spawned emulator to appear in `adb devices`.
    ///
    /// Fails if the emulator process exits first. Gives up quietly after
    /// [`REGISTER_TIMEOUT`] and leaves the rest to the readiness wait.
    async fn await_registration(&self, avd: &str, serial: &str, handle: &ProcessHandle) -> Result<(), BackendError> {
        let deadline = tokio::time::Instant::now() + REGISTER_TIMEOUT;
        loop {
            check_alive(avd, handle).await?;

            if let Ok(entries) = self.adb_entries().await {
                if entries.iter().any(|e| e.serial == serial) {
                    debug!(%avd, %serial, "Emulator registered with adb");
                    return Ok(());
                }
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(%avd, %serial, "Emulator not yet visible to adb, continuing");
                return Ok(());
            }

            tokio::time::sleep(BOOT_POLL_INTERVAL).await;
        }
    }

    async fn demo_command(&self, serial: &str, command: &str, extras: &[&str]) -> Result<(), BackendError> {
        let mut args = vec![
            "am",
            "broadcast",
            "-a",
            "com.android.systemui.demo",
            "-e",
            "command",
            command,
        ];
        args.extend_from_slice(extras);
        self.adb_shell(serial, &args).await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceBackend for AndroidBackend {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    /// Running devices are emitted first, as soon as each is described;
    /// idle AVDs follow once the emulator tool answers.
    async fn list(&self, sink: mpsc::Sender<Device>) -> Result<(), BackendError> {
        let entries = match self.adb_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "adb unavailable, listing idle AVDs only");
                Vec::new()
            }
        };

        let mut running_avds = HashSet::new();
        for entry in entries.iter().filter(|e| e.is_online()) {
            let device = match self.describe(entry).await {
                Ok(device) => device,
                Err(e) => {
                    warn!(serial = %entry.serial, error = %e, "Skipping unresponsive device");
                    continue;
                }
            };
            if device.is_emulator {
                running_avds.insert(device.id.clone());
            }
            if sink.send(device).await.is_err() {
                return Ok(());
            }
        }

        let out = process::run(&self.emulator, ["-list-avds"]).await?;
        for avd in parse_avd_list(&out) {
            if running_avds.contains(&avd) {
                continue;
            }
            if sink.send(Device::new(avd.clone(), avd, Platform::Android)).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn boot(&self, device: &Device, locale: Option<&str>) -> Result<Device, BackendError> {
        if !device.is_emulator {
            // Physical devices are running whenever adb can see them.
            return Ok(device.clone().into_booted(None).with_locale(locale));
        }

        let entries = self.adb_entries().await?;
        let port = free_console_port(entries.iter().map(|e| e.serial.as_str()))
            .ok_or_else(|| BackendError::CommandFailed("no free emulator console port".to_string()))?;
        let port_arg = port.to_string();

        let mut args = vec![
            "-avd",
            device.id.as_str(),
            "-port",
            port_arg.as_str(),
            "-no-snapshot-save",
            "-no-boot-anim",
        ];
        let locale_arg = locale.map(emulator_locale);
        if let Some(locale_arg) = &locale_arg {
            args.push("-change-locale");
            args.push(locale_arg.as_str());
        }

        info!(avd = %device.id, port, ?locale, "Booting emulator");
        let handle = ProcessHandle::new(process::spawn(&self.emulator, args)?);
        let serial = format!("{EMULATOR_SERIAL_PREFIX}{port}");
        self.await_registration(&device.id, &serial, &handle).await?;

        let mut booted = device.clone().into_booted(Some(handle));
        booted.serial = Some(serial);
        Ok(booted.with_locale(locale))
    }

    async fn shutdown(&self, device: &Device) -> Result<(), BackendError> {
        if !device.is_emulator {
            debug!(serial = %device.id, "Physical devices are left running");
            return Ok(());
        }

        let Some(serial) = self.serial_of(device).await? else {
            debug!(avd = %device.id, "Emulator is not running");
            return Ok(());
        };

        info!(avd = %device.id, %serial, "Shutting down emulator");
        process::run(&self.adb, ["-s", serial.as_str(), "emu", "kill"]).await?;

        if let Some(handle) = &device.process {
            if tokio::time::timeout(EXIT_GRACE, handle.wait()).await.is_err() {
                warn!(avd = %device.id, pid = ?handle.pid(), "Emulator did not exit, killing");
                handle.kill().await?;
            }
        }
        Ok(())
    }

    async fn clean_status_bar(&self, device: &Device) -> Result<(), BackendError> {
        let serial = self.require_serial(device).await?;
        self.adb_shell(&serial, &["settings", "put", "global", "sysui_demo_allowed", "1"])
            .await?;
        self.demo_command(&serial, "enter", &[]).await?;
        self.demo_command(&serial, "clock", &["-e", "hhmm", "1200"]).await?;
        self.demo_command(&serial, "battery", &["-e", "level", "100", "-e", "plugged", "false"])
            .await?;
        self.demo_command(&serial, "network", &["-e", "wifi", "show", "-e", "level", "4"])
            .await?;
        self.demo_command(
            &serial,
            "network",
            &["-e", "mobile", "show", "-e", "datatype", "none", "-e", "level", "4"],
        )
        .await?;
        self.demo_command(&serial, "notifications", &["-e", "visible", "false"])
            .await
    }

    async fn screenshot(&self, device: &Device) -> Result<Vec<u8>, BackendError> {
        let serial = self.require_serial(device).await?;
        process::run_bytes(&self.adb, ["-s", serial.as_str(), "exec-out", "screencap", "-p"]).await
    }

    async fn running_devices(&self) -> Result<Vec<Device>, BackendError> {
        self.running().await
    }

    async fn wait_until_running(
        &self,
        device: &Device,
        timeout: Duration,
    ) -> Result<Device, BackendError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let serial = device
            .serial
            .clone()
            .ok_or_else(|| BackendError::NotRunning(device.id.clone()))?;

        loop {
            if let Some(handle) = &device.process {
                check_alive(&device.id, handle).await?;
            }

            // adb fails while the emulator is still registering; keep polling.
            if let Ok(out) = self.adb_shell(&serial, &["getprop", "sys.boot_completed"]).await {
                if out.trim() == "1" {
                    debug!(%serial, "Device reported boot completed");
                    let mut ready = device.clone();
                    ready.booted = true;
                    return Ok(ready);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(BackendError::ReadinessTimeout(timeout));
            }

            tokio::time::sleep(BOOT_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADB_DEVICES: &str = "* daemon not running; starting now at tcp:5037\n\
        * daemon started successfully\n\
        List of devices attached\n\
        emulator-5554\tdevice\n\
        emulator-5556\toffline\n\
        R58M123ABC\tdevice\n\
        \n";

    #[test]
    fn parse_adb_devices_skips_header_and_daemon_lines() {
        let entries = parse_adb_devices(ADB_DEVICES);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].serial, "emulator-5554");
        assert!(entries[0].is_online());
        assert!(entries[0].is_emulator());
        assert!(!entries[1].is_online());
        assert!(!entries[2].is_emulator());
    }

    #[test]
    fn parse_adb_devices_empty() {
        assert!(parse_adb_devices("List of devices attached\n\n").is_empty());
    }

    #[test]
    fn parse_avd_list_ignores_diagnostics() {
        let out = "INFO    | Storing crashdata in: /tmp/android/emu-crash.db\nPixel_5\nPixel_7_API_34\n";
        assert_eq!(parse_avd_list(out), vec!["Pixel_5", "Pixel_7_API_34"]);
    }

    #[test]
    fn parse_avd_name_reads_first_line() {
        assert_eq!(parse_avd_name("Pixel_5\r\nOK\r\n").as_deref(), Some("Pixel_5"));
        assert_eq!(parse_avd_name("OK\r\n"), None);
    }

    #[test]
    fn emulator_locale_uses_dash() {
        assert_eq!(emulator_locale("fr_FR"), "fr-FR");
        assert_eq!(emulator_locale("de"), "de");
    }

    #[test]
    fn free_console_port_skips_used_ports() {
        assert_eq!(free_console_port([]), Some(5554));
        assert_eq!(
            free_console_port(["emulator-5554", "R58M123ABC", "emulator-5558"]),
            Some(5556)
        );
    }

    #[test]
    fn free_console_port_exhausted() {
        let serials: Vec<String> = (5554..=5584).step_by(2).map(|p| format!("emulator-{p}")).collect();
        assert_eq!(free_console_port(serials.iter().map(String::as_str)), None);
    }

    #[test]
    fn tools_resolve_under_sdk_root() {
        let backend = AndroidBackend::new(Some(Path::new("/opt/android-sdk")));
        assert_eq!(backend.adb_path(), Path::new("/opt/android-sdk/platform-tools/adb"));
        assert_eq!(backend.emulator_path(), Path::new("/opt/android-sdk/emulator/emulator"));
    }

    #[tokio::test]
    async fn physical_device_boot_is_immediate() {
        let mut device = Device::new("R58M123ABC", "SM-G970F", Platform::Android);
        device.is_emulator = false;

        let booted = AndroidBackend::new(Some(Path::new("/nonexistent")))
            .boot(&device, Some("fr_FR"))
            .await
            .unwrap();
        assert!(booted.booted);
        assert_eq!(booted.locale.as_deref(), Some("fr_FR"));
    }

    #[tokio::test]
    async fn wait_until_running_requires_serial() {
        let device = Device::new("Pixel_5", "Pixel_5", Platform::Android);
        let result = AndroidBackend::new(Some(Path::new("/nonexistent")))
            .wait_until_running(&device, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(BackendError::NotRunning(id)) if id == "Pixel_5"));
    }

    #[tokio::test]
    async fn list_without_any_tools_is_tool_not_found() {
        let backend = AndroidBackend::new(Some(Path::new("/nonexistent-sdk")));
        let (tx, _rx) = mpsc::channel(4);
        assert!(matches!(backend.list(tx).await, Err(BackendError::ToolNotFound(_))));
    }

    /// Lay out an SDK root whose tools are shell scripts.
    #[cfg(unix)]
    fn fake_sdk(adb: Option<&str>, emulator: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let root = std::env::temp_dir().join(format!("simfleet_fake_sdk_{}", uuid::Uuid::new_v4()));
        let install = |relative: &str, body: &str| {
            let path = root.join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        };
        if let Some(body) = adb {
            install("platform-tools/adb", body);
        }
        install("emulator/emulator", emulator);
        root
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn list_without_adb_still_reports_idle_avds() {
        let sdk = fake_sdk(None, "printf 'Pixel_5\nPixel_7\n'");
        let backend = AndroidBackend::new(Some(sdk.as_path()));
        let (tx, mut rx) = mpsc::channel(4);

        backend.list(tx).await.unwrap();

        let mut names = Vec::new();
        while let Some(device) = rx.recv().await {
            assert!(!device.booted);
            names.push(device.name);
        }
        assert_eq!(names, vec!["Pixel_5", "Pixel_7"]);
        let _ = std::fs::remove_dir_all(sdk);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn boot_fails_when_emulator_exits_early() {
        let sdk = fake_sdk(Some("echo 'List of devices attached'"), "exit 1");
        let backend = AndroidBackend::new(Some(sdk.as_path()));
        let device = Device::new("No_Such_AVD", "No_Such_AVD", Platform::Android);

        let started = std::time::Instant::now();
        let result = backend.boot(&device, None).await;

        match result {
            Err(BackendError::CommandFailed(msg)) => assert!(msg.contains("No_Such_AVD"), "{msg}"),
            other => panic!("Expected CommandFailed, got: {:?}", other),
        }
        assert!(started.elapsed() < REGISTER_TIMEOUT);
        let _ = std::fs::remove_dir_all(sdk);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn readiness_wait_stops_when_emulator_exits() {
        let sdk = fake_sdk(Some("exit 1"), "exit 0");
        let backend = AndroidBackend::new(Some(sdk.as_path()));
        let child = process::spawn(backend.emulator_path(), ["-avd", "Pixel_5"]).unwrap();
        let handle = ProcessHandle::new(child);
        let mut device = Device::new("Pixel_5", "Pixel_5", Platform::Android).into_booted(Some(handle));
        device.serial = Some("emulator-5554".to_string());

        let result = backend.wait_until_running(&device, Duration::from_secs(30)).await;
        assert!(matches!(result, Err(BackendError::CommandFailed(_))), "{result:?}");
        let _ = std::fs::remove_dir_all(sdk);
    }
}
