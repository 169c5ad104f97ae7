//! Error types for sidmon.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SidError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors
    #[error("Audio device not found: {device}")]
    DeviceNotFound { device: String },

    /// The device could not be opened at the requested rate/format/channels.
    /// Fatal at startup: acquisition never begins.
    #[error("Failed to open audio device: {message}")]
    DeviceOpen { message: String },

    /// A capture read failed mid-session. The acquisition loop stops
    /// gracefully; already-written buffers stay intact.
    #[error("Audio device read failed: {message}")]
    DeviceRead { message: String },

    // Spectral estimation errors. Recovered locally: the affected interval
    // records 0.0 for every station.
    #[error("PSD computation failed: {message}")]
    SpectralCompute { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Type alias for convenience
pub type Result<T> = std::result::Result<T, SidError>;
