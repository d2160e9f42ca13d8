use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub registry_path: PathBuf,
    pub actuator_base_url: String,
    pub vision_endpoint: String,
    pub vision_api_key: String,
    pub registration_base_url: String,
    pub detector_command: Vec<String>,
    pub ocr_command: Vec<String>,
    pub min_detection_confidence: f32,
    pub min_ocr_confidence: f32,
    pub frame_skip: u32,
    pub dwell: Duration,
    pub actuator_timeout: Duration,
    pub vision_timeout: Duration,
    pub command_timeout: Duration,
    pub crops_dir: Option<PathBuf>,
    pub listen_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{} environment variable unset", key)))
        };
        let command = |key: &str| -> Result<Vec<String>> {
            let raw = required(key)?;
            match shell_words::split(&raw) {
                Ok(parts) if !parts.is_empty() => Ok(parts),
                _ => Err(Error::Config(format!("{} is not a valid command: {}", key, raw))),
            }
        };
        let secs = |key: &str, default: u64| -> Result<Duration> {
            parse_or(&lookup, key, default).map(Duration::from_secs)
        };

        Ok(Config {
            registry_path: PathBuf::from(required("REGISTRY_PATH")?),
            actuator_base_url: required("ACTUATOR_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            vision_endpoint: required("VISION_ENDPOINT")?,
            vision_api_key: required("VISION_API_KEY")?,
            registration_base_url: required("REGISTRATION_BASE_URL")?,
            detector_command: command("DETECTOR_COMMAND")?,
            ocr_command: command("OCR_COMMAND")?,
            min_detection_confidence: parse_or(&lookup, "MIN_DETECTION_CONFIDENCE", 0.25)?,
            min_ocr_confidence: parse_or(&lookup, "MIN_OCR_CONFIDENCE", 0.0)?,
            frame_skip: parse_or(&lookup, "FRAME_SKIP", 5)?,
            dwell: secs("DWELL_SECS", 2)?,
            actuator_timeout: secs("ACTUATOR_TIMEOUT_SECS", 5)?,
            vision_timeout: secs("VISION_TIMEOUT_SECS", 30)?,
            command_timeout: secs("COMMAND_TIMEOUT_SECS", 10)?,
            crops_dir: lookup("CROPS_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            listen_port: parse_or(&lookup, "LISTEN_PORT", 8402)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, raw))),
    }
}
