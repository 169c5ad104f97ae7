//! Audio device backends.
//!
//! `device` defines the capability contract and the backend factory;
//! `capture` is the cpal implementation, `synth` a deterministic sine
//! generator.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod device;
pub mod synth;

pub use device::{open_device, AudioDevice, ChunkCallback, MockAudioDevice};
