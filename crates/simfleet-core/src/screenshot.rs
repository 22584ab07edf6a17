//! Screenshot persistence.
//!
//! Files are named from the device name, the applied locale, and a caller
//! label, joined with underscores: `Pixel_5_fr_FR_home.png`. Unset or empty
//! parts are left out.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::device::Device;
use crate::lifecycle::{Lifecycle, LifecycleError};

/// Extension of the PNG captures every backend produces.
pub const SCREENSHOT_EXTENSION: &str = "png";

/// Errors from capturing and saving a screenshot.
#[derive(Error, Debug)]
pub enum ScreenshotError {
    #[error(transparent)]
    Capture(#[from] LifecycleError),

    #[error("Failed to write screenshot to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// File name for a capture of `name` under `locale` tagged with `label`.
pub fn screenshot_file_name(name: &str, locale: Option<&str>, label: Option<&str>) -> String {
    let stem = [Some(name), locale, label]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    format!("{stem}.{SCREENSHOT_EXTENSION}")
}

/// Capture `device` and write the image into `dir`, creating it if needed.
///
/// Returns the path of the written file.
pub async fn save_screenshot(
    lifecycle: &Lifecycle,
    device: &Device,
    dir: &Path,
    label: Option<&str>,
) -> Result<PathBuf, ScreenshotError> {
    let bytes = lifecycle.screenshot(device).await?;

    let write_err = |path: &Path, source| ScreenshotError::Write {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(|e| write_err(dir, e))?;

    let path = dir.join(screenshot_file_name(&device.name, device.locale.as_deref(), label));
    tokio::fs::write(&path, &bytes).await.map_err(|e| write_err(&path, e))?;

    info!(path = %path.display(), bytes = bytes.len(), "Screenshot saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_all_fields() {
        assert_eq!(
            screenshot_file_name("Pixel_5", Some("fr_FR"), Some("home")),
            "Pixel_5_fr_FR_home.png"
        );
    }

    #[test]
    fn omits_missing_locale() {
        assert_eq!(screenshot_file_name("Pixel_5", None, Some("home")), "Pixel_5_home.png");
    }

    #[test]
    fn omits_empty_fields() {
        assert_eq!(screenshot_file_name("Pixel_5", Some(""), None), "Pixel_5.png");
    }

    #[test]
    fn keeps_spaces_in_names() {
        assert_eq!(
            screenshot_file_name("iPhone 15", Some("de_DE"), Some("login")),
            "iPhone 15_de_DE_login.png"
        );
    }
}
