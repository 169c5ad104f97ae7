//! Audio device capability contract.
//!
//! A device must deliver interleaved i16 frames at its declared sampling
//! rate together with a monotonically increasing frame counter. Both
//! acquisition strategies consume this trait: the blocking trigger pulls
//! one window synchronously, the streaming bucketer subscribes to chunks.

use crate::acquisition::frame::{AudioChunk, SampleWindow};
use crate::config::{AudioConfig, Backend};
use crate::error::{Result, SidError};

/// Callback invoked from the device's capture context for every chunk.
pub type ChunkCallback = Box<dyn FnMut(AudioChunk) + Send>;

/// Capability contract every audio backend must satisfy.
///
/// Implementations exist for cpal (feature `cpal-audio`) and for a
/// deterministic sine generator. Tests use [`MockAudioDevice`].
pub trait AudioDevice: Send {
    /// Human-readable device identification for logs.
    fn name(&self) -> &str;

    /// Block until exactly `seconds` of audio has been captured and return
    /// it as one window. Used by the blocking trigger.
    fn capture_window(&mut self, seconds: u32) -> Result<SampleWindow>;

    /// Begin continuous capture, invoking `on_chunk` for every chunk the
    /// hardware delivers. Chunk size and cadence are not guaranteed.
    fn start(&mut self, on_chunk: ChunkCallback) -> Result<()>;

    /// Stop capture and release the device. Idempotent; safe to call after
    /// a prior failure.
    fn close(&mut self) -> Result<()>;

    /// Take the latest asynchronous capture fault, if one occurred. The
    /// streaming loop polls this because stream errors surface in the
    /// backend's callback thread, not through `start`'s return value.
    fn take_error(&mut self) -> Option<SidError> {
        None
    }
}

/// Open the backend selected by the configuration.
pub fn open_device(config: &AudioConfig) -> Result<Box<dyn AudioDevice>> {
    match config.backend {
        #[cfg(feature = "cpal-audio")]
        Backend::Cpal => Ok(Box::new(crate::audio::capture::CpalDevice::open(config)?)),
        #[cfg(not(feature = "cpal-audio"))]
        Backend::Cpal => Err(SidError::DeviceOpen {
            message: "built without the cpal-audio feature".to_string(),
        }),
        Backend::Sine => Ok(Box::new(crate::audio::synth::SineDevice::open(config)?)),
    }
}

/// Mock audio device for tests.
///
/// Serves a repeating sample pattern with a correct frame counter, and can
/// be configured to fail at any point of the contract.
pub struct MockAudioDevice {
    channels: usize,
    sampling_rate: u32,
    pattern: Vec<i16>,
    sample_index: i64,
    started: bool,
    closed: bool,
    close_count: usize,
    fail_capture: bool,
    fail_start: bool,
    stream_fault: bool,
}

impl MockAudioDevice {
    pub fn new(sampling_rate: u32, channels: usize) -> Self {
        Self {
            channels,
            sampling_rate,
            pattern: vec![100],
            sample_index: 0,
            started: false,
            closed: false,
            close_count: 0,
            fail_capture: false,
            fail_start: false,
            stream_fault: false,
        }
    }

    /// Serve this repeating per-sample pattern instead of the default.
    pub fn with_pattern(mut self, pattern: Vec<i16>) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_capture_failure(mut self) -> Self {
        self.fail_capture = true;
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Report a stream fault on the first `take_error` poll after `start`.
    pub fn with_stream_failure(mut self) -> Self {
        self.stream_fault = true;
        self
    }

    pub fn close_count(&self) -> usize {
        self.close_count
    }

    fn fill(&mut self, frames: usize) -> Vec<i16> {
        let mut samples = Vec::with_capacity(frames * self.channels);
        for i in 0..frames * self.channels {
            samples.push(self.pattern[i % self.pattern.len()]);
        }
        self.sample_index += frames as i64;
        samples
    }
}

impl AudioDevice for MockAudioDevice {
    fn name(&self) -> &str {
        "mock"
    }

    fn capture_window(&mut self, seconds: u32) -> Result<SampleWindow> {
        if self.fail_capture {
            return Err(SidError::DeviceRead {
                message: "mock capture failure".to_string(),
            });
        }
        let frames = (seconds * self.sampling_rate) as usize;
        Ok(SampleWindow::new(self.fill(frames), self.channels))
    }

    fn start(&mut self, mut on_chunk: ChunkCallback) -> Result<()> {
        if self.fail_start {
            return Err(SidError::DeviceOpen {
                message: "mock start failure".to_string(),
            });
        }
        self.started = true;
        // Deliver one second of audio immediately; tests drive further
        // chunks through the bucketer directly.
        let start = self.sample_index;
        let frames = self.sampling_rate as usize;
        on_chunk(AudioChunk::new(start, self.fill(frames)));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.close_count += 1;
        Ok(())
    }

    fn take_error(&mut self) -> Option<SidError> {
        if self.stream_fault {
            self.stream_fault = false;
            Some(SidError::DeviceRead {
                message: "mock stream fault".to_string(),
            })
        } else {
            None
        }
    }
}
