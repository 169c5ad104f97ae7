//! Synthetic sine-wave device.
//!
//! Serves a pure tone as if it were a sound card, with a correct audio
//! frame counter. Useful for bench setups without an antenna and for
//! exercising the spectral path end to end: a tone at a station frequency
//! must surface in exactly that station's FFT bin.

use crate::acquisition::frame::{AudioChunk, SampleWindow};
use crate::audio::device::{AudioDevice, ChunkCallback};
use crate::config::AudioConfig;
use crate::error::{Result, SidError};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default tone frequency when the config does not name one.
const DEFAULT_FREQUENCY_HZ: f64 = 10_000.0;

/// Streamed chunk cadence.
const CHUNK_MS: u64 = 100;

/// Tone amplitude in i16 full scale.
const AMPLITUDE: f64 = 0.8 * i16::MAX as f64;

/// Generate `frames` frames of a sine tone starting at audio frame
/// `start_index`, replicated across all channels.
pub fn sine_samples(
    frequency_hz: f64,
    sampling_rate: u32,
    channels: usize,
    start_index: i64,
    frames: usize,
) -> Vec<i16> {
    let mut samples = Vec::with_capacity(frames * channels);
    for n in 0..frames {
        let t = (start_index + n as i64) as f64 / sampling_rate as f64;
        let value = (AMPLITUDE * (TAU * frequency_hz * t).sin()).round() as i16;
        for _ in 0..channels {
            samples.push(value);
        }
    }
    samples
}

/// A sound-card stand-in that plays one endless tone.
pub struct SineDevice {
    name: String,
    frequency_hz: f64,
    sampling_rate: u32,
    channels: usize,
    sample_index: i64,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SineDevice {
    /// Open the generator. The config's `device` field, when present, is
    /// parsed as the tone frequency in Hz.
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let frequency_hz = match config.device.as_deref() {
            None => DEFAULT_FREQUENCY_HZ,
            Some(text) => text.parse::<f64>().map_err(|_| SidError::DeviceOpen {
                message: format!("sine backend expects a frequency in Hz, got '{text}'"),
            })?,
        };
        if frequency_hz * 2.0 > config.sampling_rate as f64 {
            return Err(SidError::DeviceOpen {
                message: format!(
                    "tone {frequency_hz} Hz is above Nyquist for {} Hz",
                    config.sampling_rate
                ),
            });
        }
        Ok(Self {
            name: format!("sine {frequency_hz} Hz"),
            frequency_hz,
            sampling_rate: config.sampling_rate,
            channels: config.channels,
            sample_index: 0,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }
}

impl AudioDevice for SineDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture_window(&mut self, seconds: u32) -> Result<SampleWindow> {
        let frames = (seconds * self.sampling_rate) as usize;
        let samples = sine_samples(
            self.frequency_hz,
            self.sampling_rate,
            self.channels,
            self.sample_index,
            frames,
        );
        self.sample_index += frames as i64;
        Ok(SampleWindow::new(samples, self.channels))
    }

    fn start(&mut self, mut on_chunk: ChunkCallback) -> Result<()> {
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let frequency_hz = self.frequency_hz;
        let sampling_rate = self.sampling_rate;
        let channels = self.channels;
        let chunk_frames = (sampling_rate as u64 * CHUNK_MS / 1000) as usize;
        let mut sample_index = self.sample_index;

        self.worker = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let samples = sine_samples(
                    frequency_hz,
                    sampling_rate,
                    channels,
                    sample_index,
                    chunk_frames,
                );
                on_chunk(AudioChunk::new(sample_index, samples));
                sample_index += chunk_frames as i64;
                thread::sleep(Duration::from_millis(CHUNK_MS));
            }
        }));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }
}

impl Drop for SineDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
