//! Frame types flowing through the acquisition engine.

use chrono::{DateTime, Utc};

/// A chunk of interleaved multi-channel samples delivered by an audio device.
///
/// `sample_index` counts frames (one sample per channel) since an arbitrary
/// but fixed epoch, at the device's declared sampling rate. It is the audio
/// clock: contiguous chunks satisfy
/// `next.sample_index == prev.sample_index + prev.frames(channels)`.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Audio-clock frame index of the first frame in this chunk.
    pub sample_index: i64,
    /// Interleaved samples, `frames * channels` values.
    pub samples: Vec<i16>,
}

impl AudioChunk {
    pub fn new(sample_index: i64, samples: Vec<i16>) -> Self {
        Self {
            sample_index,
            samples,
        }
    }

    /// Number of frames in this chunk.
    pub fn frames(&self, channels: usize) -> usize {
        self.samples.len() / channels
    }

    /// Chunk duration in seconds.
    pub fn duration_s(&self, channels: usize, sampling_rate: u32) -> f64 {
        self.frames(channels) as f64 / sampling_rate as f64
    }
}

/// Exactly one log interval of audio: `interval * sampling_rate` frames,
/// interleaved. Only complete windows are ever handed to spectral analysis.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: Vec<i16>,
    channels: usize,
}

impl SampleWindow {
    /// Wrap interleaved samples. The sample count must be a whole number of
    /// frames.
    pub fn new(samples: Vec<i16>, channels: usize) -> Self {
        debug_assert!(channels > 0);
        debug_assert_eq!(samples.len() % channels, 0);
        Self { samples, channels }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// De-interleave one channel as f64, ready for PSD computation.
    pub fn channel(&self, channel: usize) -> Vec<f64> {
        debug_assert!(channel < self.channels);
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .map(|&s| s as f64)
            .collect()
    }
}

/// A completed measurement window, stamped with the wall-clock start of the
/// interval it covers.
#[derive(Debug, Clone)]
pub struct WindowReady {
    pub window: SampleWindow,
    /// UTC time of the window's first sample (the interval start).
    pub utc: DateTime<Utc>,
    /// Slot in the day buffer: `(h*3600 + m*60 + s) / interval`.
    pub data_index: usize,
}
