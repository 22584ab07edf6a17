//! Command-line front end for simfleet device orchestration.
//!
//! # Usage
//!
//! ```bash
//! # List every Android emulator/device and iOS Simulator
//! simfleet list
//! simfleet --format json list
//!
//! # Boot a device with a locale and wait until it is usable
//! simfleet boot Pixel_5 --locale fr_FR --wait
//!
//! # Operate on the "current" device (SIMFLEET_DEVICE, else the first running one)
//! export SIMFLEET_DEVICE="iPhone 15"
//! simfleet clean-status-bar
//! simfleet screenshot --dir shots --label home
//!
//! # Screenshot as base64 PNG on stdout
//! simfleet screenshot Pixel_5 > screen.b64
//!
//! # Shut down one device or everything that is running
//! simfleet shutdown Pixel_5
//! simfleet shutdown-all
//!
//! # Run a command once per device and locale, booting and shutting down around it
//! simfleet run -d Pixel_5 -d "iPhone 15" -l en_US -l de_DE -- ./capture.sh
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use base64::Engine;
use clap::{CommandFactory, Parser, Subcommand};
use simfleet_core::config::{config_path, FleetConfig};
use simfleet_core::device::Device;
use simfleet_core::fleet::{Fleet, FleetError};
use simfleet_core::orchestrator::{CallbackError, ForEachOptions};
use simfleet_core::screenshot::save_screenshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Boot, drive, and tear down Android emulators and iOS Simulators.
#[derive(Parser)]
#[command(name = "simfleet")]
#[command(about = "Orchestrate Android emulators and iOS Simulators")]
#[command(version)]
struct Cli {
    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "SIMFLEET_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Android SDK root (overrides the configured one)
    #[arg(long)]
    android_sdk: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List available devices across platforms
    List,

    /// Boot a device
    Boot {
        /// Device id or name
        #[arg(env = "SIMFLEET_DEVICE")]
        device: Option<String>,
        /// Locale to apply, e.g. fr_FR
        #[arg(short, long)]
        locale: Option<String>,
        /// Wait until the device is ready
        #[arg(short, long)]
        wait: bool,
        /// Readiness timeout in seconds
        #[arg(short = 'o', long)]
        timeout: Option<u64>,
    },

    /// Shut down a device
    Shutdown {
        /// Device id or name
        #[arg(env = "SIMFLEET_DEVICE")]
        device: Option<String>,
    },

    /// Shut down every running device
    ShutdownAll,

    /// Capture a screenshot (base64-encoded PNG on stdout unless --dir is given)
    Screenshot {
        /// Device id or name
        #[arg(env = "SIMFLEET_DEVICE")]
        device: Option<String>,
        /// Directory to save the PNG into
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Label appended to the file name
        #[arg(long)]
        label: Option<String>,
    },

    /// Put the status bar into a clean state for screenshots
    CleanStatusBar {
        /// Device id or name
        #[arg(env = "SIMFLEET_DEVICE")]
        device: Option<String>,
    },

    /// Run a command once per device and locale
    Run {
        /// Device ids or names to run on
        #[arg(short, long = "device", required = true)]
        devices: Vec<String>,
        /// Locales to iterate (defaults to the configured list, else none)
        #[arg(short, long = "locale")]
        locales: Vec<String>,
        /// Readiness timeout in seconds
        #[arg(short = 'o', long)]
        timeout: Option<u64>,
        /// Clean the status bar before running the command
        #[arg(long)]
        clean_status_bar: bool,
        /// Save a screenshot with this label after the command succeeds
        #[arg(long)]
        screenshot: Option<String>,
        /// Directory for screenshots
        #[arg(long)]
        dir: Option<PathBuf>,
        /// The command to run; receives SIMFLEET_DEVICE, SIMFLEET_DEVICE_NAME,
        /// SIMFLEET_PLATFORM and SIMFLEET_LOCALE
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Show or edit the configuration file
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a value (android-sdk-root, boot-timeout-secs, screenshot-dir, locales)
    Set { key: String, value: String },
    /// Reset a value to its default
    Unset { key: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn init_tracing(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("simfleet.log"));
            let file_appender = tracing_appender::rolling::never(dir, name);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file_appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[derive(Debug)]
enum CliError {
    Selection(String),
    Failed(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Failed(_) => ExitCode::from(1),
            CliError::Selection(_) => ExitCode::from(2),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Selection(msg) => write!(f, "Device selection failed: {}", msg),
            CliError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<FleetError> for CliError {
    fn from(e: FleetError) -> Self {
        match e {
            FleetError::Registry(e) => CliError::Selection(e.to_string()),
            other => CliError::Failed(other.to_string()),
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| CliError::Failed(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

fn describe(device: &Device) -> String {
    let state = if device.booted { " (Booted)" } else { "" };
    let locale = device.locale.as_deref().map(|l| format!(" [{}]", l)).unwrap_or_default();
    format!("{} -- {} [{}]{}{}", device.id, device.name, device.platform, locale, state)
}

/// Print `device` in the selected format, with `message` as the text-mode
/// status line.
fn report(cli: &Cli, device: &Device, message: &str) -> Result<(), CliError> {
    match cli.format {
        OutputFormat::Json => print_json(device),
        OutputFormat::Text => {
            if !cli.quiet {
                eprintln!("{} {}", message, describe(device));
            }
            Ok(())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = FleetConfig::load();
    if let Some(sdk) = &cli.android_sdk {
        config.android_sdk_root = Some(sdk.clone());
    }
    let fleet = Fleet::from_config(&config);

    match &cli.command {
        Command::List => {
            let devices = fleet.list().await;
            if cli.format == OutputFormat::Json {
                print_json(&devices)?;
            } else if devices.is_empty() {
                eprintln!("No devices found");
            } else {
                for device in &devices {
                    println!("{}", describe(device));
                }
            }
        }
        Command::Boot {
            device,
            locale,
            wait,
            timeout,
        } => {
            let booted = if *wait {
                let timeout = timeout.map(Duration::from_secs).unwrap_or_else(|| config.boot_timeout());
                fleet.boot_ready(device.as_deref(), locale.as_deref(), timeout).await?
            } else {
                fleet.boot(device.as_deref(), locale.as_deref()).await?
            };
            report(&cli, &booted, "Booted")?;
        }
        Command::Shutdown { device } => {
            let down = fleet.shutdown(device.as_deref()).await?;
            report(&cli, &down, "Shut down")?;
        }
        Command::ShutdownAll => {
            fleet.shutdown_all().await;
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "success": true }));
            } else if !cli.quiet {
                eprintln!("Shut down all running devices");
            }
        }
        Command::Screenshot { device, dir, label } => match dir.as_ref().or(config.screenshot_dir.as_ref()) {
            Some(dir) => {
                let path = fleet.screenshot(device.as_deref(), dir, label.as_deref()).await?;
                if cli.format == OutputFormat::Json {
                    println!("{}", serde_json::json!({ "path": path }));
                } else {
                    println!("{}", path.display());
                }
            }
            None => {
                let bytes = fleet.screenshot_bytes(device.as_deref()).await?;
                println!("{}", base64::engine::general_purpose::STANDARD.encode(bytes));
            }
        },
        Command::CleanStatusBar { device } => {
            let device = fleet.clean_status_bar(device.as_deref()).await?;
            report(&cli, &device, "Cleaned status bar of")?;
        }
        Command::Run {
            devices,
            locales,
            timeout,
            clean_status_bar,
            screenshot,
            dir,
            command,
        } => {
            let locales = if locales.is_empty() { &config.locales } else { locales };
            let options = ForEachOptions::new(devices.iter().cloned())
                .with_locales(locales.iter().cloned())
                .with_timeout(timeout.map(Duration::from_secs).unwrap_or_else(|| config.boot_timeout()));
            let shots = match screenshot {
                Some(label) => {
                    let dir = dir
                        .clone()
                        .or_else(|| config.screenshot_dir.clone())
                        .unwrap_or_else(|| PathBuf::from("."));
                    Some((dir, label.clone()))
                }
                None => None,
            };

            let processed = fleet
                .for_each(&options, |device| {
                    let lifecycle = fleet.lifecycle().clone();
                    let command = command.clone();
                    let shots = shots.clone();
                    let clean = *clean_status_bar;
                    async move {
                        if clean {
                            lifecycle.clean_status_bar(&device).await?;
                        }
                        run_unit_command(&command, &device).await?;
                        if let Some((dir, label)) = shots {
                            save_screenshot(&lifecycle, &device, &dir, Some(&label)).await?;
                        }
                        Ok::<(), CallbackError>(())
                    }
                })
                .await?;

            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "success": true, "units": processed }));
            } else if !cli.quiet {
                eprintln!("Completed {} unit(s)", processed);
            }
        }
        Command::Config { action: Some(action) } => {
            // Edit the file as stored; --android-sdk applies to this run only.
            let mut stored = FleetConfig::load();
            let edited = match action {
                ConfigAction::Set { key, value } => stored.set(key, value),
                ConfigAction::Unset { key } => stored.unset(key),
            };
            edited.map_err(|e| CliError::Failed(e.to_string()))?;
            stored
                .save()
                .map_err(|e| CliError::Failed(format!("Failed to save {}: {}", config_path().display(), e)))?;
            if !cli.quiet && cli.format == OutputFormat::Text {
                eprintln!("Saved {}", config_path().display());
            }
        }
        Command::Config { action: None } => {
            if cli.format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::json!({ "path": config_path(), "config": config })
                );
            } else {
                println!("# {}", config_path().display());
                print_json(&config)?;
            }
        }
        Command::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "simfleet", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Run the user's command against one ready device.
async fn run_unit_command(command: &[String], device: &Device) -> Result<(), CallbackError> {
    let (program, args) = command.split_first().ok_or("empty command")?;
    info!(%program, device = %device.id, "Running command");

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .env("SIMFLEET_DEVICE", &device.id)
        .env("SIMFLEET_DEVICE_NAME", &device.name)
        .env("SIMFLEET_PLATFORM", device.platform.to_string());
    match &device.locale {
        Some(locale) => cmd.env("SIMFLEET_LOCALE", locale),
        None => cmd.env_remove("SIMFLEET_LOCALE"),
    };

    let status = cmd.status().await?;
    if !status.success() {
        return Err(format!("'{}' exited with {}", program, status).into());
    }
    Ok(())
}
