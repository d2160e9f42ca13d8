use crate::error::{Error, Result};
use image::{DynamicImage, ImageFormat};
use log::debug;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

/// Runs `argv --image <tmp.jpeg>` and parses its stdout as JSON.
///
/// The frame is handed over through a temporary file that is removed
/// whatever the outcome.
pub async fn run_json<T: DeserializeOwned>(
    argv: &[String],
    image: &DynamicImage,
    timeout: Duration,
) -> Result<T> {
    let path = std::env::temp_dir().join(format!("plate-gate-{}.jpeg", Uuid::new_v4().simple()));
    let result = run_with_file(argv, image, &path, timeout).await;
    if let Err(e) = std::fs::remove_file(&path) {
        debug!("Unable to remove {:?}: {}", path, e);
    }
    result
}

async fn run_with_file<T: DeserializeOwned>(
    argv: &[String],
    image: &DynamicImage,
    path: &Path,
    timeout: Duration,
) -> Result<T> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::Command("empty command line".to_string()))?;
    write_jpeg(image, path)?;

    let output = Command::new(program)
        .args(args)
        .arg("--image")
        .arg(path)
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout, output)
        .await
        .map_err(|_| Error::Timeout(timeout.as_secs()))??;

    if !output.status.success() {
        return Err(Error::Command(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.trim().is_empty() {
        return Err(Error::Command(format!("{} produced no output", program)));
    }
    Ok(serde_json::from_str(stdout.trim())?)
}

pub fn write_jpeg(image: &DynamicImage, path: &Path) -> Result<()> {
    // JPEG has no alpha channel.
    DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path, ImageFormat::Jpeg)?;
    Ok(())
}
