//! sidmon - VLF signal monitor
//!
//! Captures audio from a receiver's sound card, cuts the stream into
//! wall-clock-aligned measurement windows with drift correction, and
//! records per-station signal strengths into day buffers.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod acquisition;
pub mod audio;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod orchestrator;
pub mod spectral;

// Acquisition core
pub use acquisition::{
    AudioChunk, BucketerConfig, Clock, DriftState, IntervalTimer, ManualClock, SampleWindow,
    StreamBucketer, SystemClock, Tick, TickSchedule, WindowReady,
};

// Device abstraction
pub use audio::{open_device, AudioDevice, ChunkCallback, MockAudioDevice};

// Processing and storage
pub use buffer::{BufferEvent, BufferStore, Snapshot};
pub use orchestrator::{
    LogViewer, NullSink, Orchestrator, RunState, ShutdownHandle, SnapshotSink, Viewer,
};
pub use spectral::{SpectralExtractor, StationBinding, WindowMeasurement};

// Error handling
pub use error::{Result, SidError};

// Config
pub use config::{AudioConfig, Backend, Config, MonitorConfig, StationConfig, TriggerMode};
