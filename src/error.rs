use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("plate {plate} is already registered")]
    DuplicateKey { plate: String },
    #[error("actuator endpoint {endpoint} unreachable: {reason}")]
    ActuatorUnreachable { endpoint: String, reason: String },
    #[error("cloud vision unavailable: {0}")]
    VisionUnavailable(String),
    #[error("external command failed: {0}")]
    Command(String),
    #[error("timed out after {0} seconds")]
    Timeout(u64),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
