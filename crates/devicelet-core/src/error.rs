//! Error types for devicelet

use thiserror::Error;

/// Main error type for devicelet
#[derive(Error, Debug)]
pub enum DeviceletError {
    /// Static resource definition or agent configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Socket bind, serve or self-connect failure
    #[error("Startup error: {0}")]
    Startup(String),

    /// Registration handshake with the kubelet failed
    #[error("Registration error: {0}")]
    Registration(String),

    /// Allocation named a device the pool does not hold
    #[error("invalid allocation request: unknown device: {0}")]
    UnknownDevice(String),

    /// Socket removal failed while stopping
    #[error("Cleanup error: {0}")]
    Cleanup(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for devicelet operations
pub type DeviceletResult<T> = Result<T, DeviceletError>;

impl From<serde_json::Error> for DeviceletError {
    fn from(err: serde_json::Error) -> Self {
        DeviceletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DeviceletError {
    fn from(err: toml::de::Error) -> Self {
        DeviceletError::Config(err.to_string())
    }
}
