//! Error types
//!
//! Configuration problems and engine start-up failures are fatal and surface
//! through [`MeterError`]. Everything that can go wrong inside a single read
//! cycle is logged and degrades the result instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not initialize recognition engine: {0}")]
    EngineInit(String),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MeterError {
    pub fn config(msg: impl Into<String>) -> Self {
        MeterError::Config(msg.into())
    }

    /// Whether this error must stop the caller instead of degrading a cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MeterError::Config(_) | MeterError::EngineInit(_))
    }
}

pub type Result<T> = std::result::Result<T, MeterError>;
