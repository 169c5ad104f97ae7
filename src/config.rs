use crate::defaults;
use crate::error::{Result, SidError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub monitor: MonitorConfig,
    #[serde(rename = "station")]
    pub stations: Vec<StationConfig>,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture backend.
    pub backend: Backend,
    /// Device name; None selects the backend's default input.
    pub device: Option<String>,
    pub sampling_rate: u32,
    pub channels: usize,
}

/// Measurement configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between two recorded measurements. Must be > 2 and divide
    /// 86400 so the day partitions into whole slots.
    pub log_interval: u32,
    /// Acquisition strategy.
    pub trigger: TriggerMode,
    /// Emit an hourly snapshot of the open buffers.
    pub hourly_save: bool,
    /// Multiplier applied to every signal strength before storage.
    pub scaling_factor: f64,
}

/// One monitored VLF transmitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationConfig {
    /// Transmitter call sign, e.g. "NWC".
    pub call_sign: String,
    /// Transmit frequency in Hz, e.g. 19800.
    pub frequency: u32,
    /// Capture channel the antenna for this station is wired to.
    #[serde(default)]
    pub channel: usize,
}

/// Audio backend selection.
///
/// Backends are compiled-in implementations of the device capability; the
/// factory in `audio::device` maps each variant to a concrete type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Cpal,
    /// Deterministic sine generator, for bench setups without an antenna.
    Sine,
}

/// Acquisition strategy selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Wall-clock timer that pulls one window synchronously per interval.
    Blocking,
    /// Continuous capture bucketed by the drift-corrected stream engine.
    #[default]
    Streaming,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            device: None,
            sampling_rate: defaults::SAMPLING_RATE,
            channels: defaults::CHANNELS,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_interval: defaults::LOG_INTERVAL_S,
            trigger: TriggerMode::default(),
            hourly_save: false,
            scaling_factor: defaults::SCALING_FACTOR,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Missing fields take default values; the result is validated before
    /// it is returned.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(SidError::ConfigFileNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.log_interval <= 2 {
            return Err(SidError::ConfigInvalidValue {
                key: "monitor.log_interval".to_string(),
                message: "must be greater than 2 seconds".to_string(),
            });
        }
        if defaults::SECONDS_PER_DAY % self.monitor.log_interval != 0 {
            return Err(SidError::ConfigInvalidValue {
                key: "monitor.log_interval".to_string(),
                message: "must divide 86400 so a day splits into whole slots".to_string(),
            });
        }
        if self.audio.sampling_rate == 0 {
            return Err(SidError::ConfigInvalidValue {
                key: "audio.sampling_rate".to_string(),
                message: "must be non-zero".to_string(),
            });
        }
        if self.audio.channels == 0 {
            return Err(SidError::ConfigInvalidValue {
                key: "audio.channels".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.stations.is_empty() {
            return Err(SidError::ConfigInvalidValue {
                key: "station".to_string(),
                message: "at least one [[station]] must be configured".to_string(),
            });
        }
        for station in &self.stations {
            if station.channel >= self.audio.channels {
                return Err(SidError::ConfigInvalidValue {
                    key: format!("station.{}.channel", station.call_sign),
                    message: format!(
                        "channel {} out of range (only {} capture channel(s))",
                        station.channel, self.audio.channels
                    ),
                });
            }
            if station.frequency as u64 * 2 > self.audio.sampling_rate as u64 {
                return Err(SidError::ConfigInvalidValue {
                    key: format!("station.{}.frequency", station.call_sign),
                    message: format!(
                        "{} Hz is above the Nyquist limit of a {} Hz capture",
                        station.frequency, self.audio.sampling_rate
                    ),
                });
            }
        }
        Ok(())
    }

    /// Number of measurement slots in one UTC day.
    pub fn buffer_size(&self) -> usize {
        (defaults::SECONDS_PER_DAY / self.monitor.log_interval) as usize
    }
}
