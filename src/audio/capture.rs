//! Real audio capture using CPAL (Cross-Platform Audio Library).

use crate::acquisition::frame::{AudioChunk, SampleWindow};
use crate::audio::device::{AudioDevice, ChunkCallback};
use crate::config::AudioConfig;
use crate::error::{Result, SidError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Poll period while waiting for the capture buffer to fill.
const CAPTURE_POLL_MS: u64 = 5;

/// List the names of all available input devices.
pub fn list_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().map_err(|e| SidError::DeviceOpen {
        message: format!("Failed to enumerate input devices: {e}"),
    })?;

    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    Ok(names)
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match device_name {
        Some(name) => {
            let devices = host.input_devices().map_err(|e| SidError::DeviceOpen {
                message: format!("Failed to enumerate input devices: {e}"),
            })?;
            for device in devices {
                if device.name().as_deref() == Ok(name) {
                    return Ok(device);
                }
            }
            Err(SidError::DeviceNotFound {
                device: name.to_string(),
            })
        }
        None => host
            .default_input_device()
            .ok_or_else(|| SidError::DeviceNotFound {
                device: "default".to_string(),
            }),
    }
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is owned by `CpalDevice`, which is driven from a
/// single thread at a time; stream methods never cross thread boundaries.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Audio capture through cpal at the configured rate and channel count.
///
/// Samples are interleaved i16. Devices that only expose float formats are
/// handled by converting f32 to full-scale i16 in the data callback. A
/// running frame counter provides the audio-clock timestamp for streamed
/// chunks.
pub struct CpalDevice {
    name: String,
    device: cpal::Device,
    sampling_rate: u32,
    channels: usize,
    stream: Option<SendableStream>,
    /// Blocking-mode accumulation buffer; excess frames beyond a window
    /// stay here and carry into the next capture.
    buffer: Arc<Mutex<Vec<i16>>>,
    /// Audio-clock frame counter shared with the data callback.
    frame_counter: Arc<AtomicI64>,
    /// Fault reported by the stream's error callback. cpal delivers these
    /// on its own thread, so they are parked here for `take_error`.
    stream_fault: Arc<Mutex<Option<SidError>>>,
}

impl CpalDevice {
    /// Open the configured input device. Fails if the device cannot be
    /// found; format problems surface when the stream is built.
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let device = find_device(config.device.as_deref())?;
        let name = device
            .name()
            .unwrap_or_else(|_| "unknown input".to_string());
        tracing::info!(device = %name, rate = config.sampling_rate, channels = config.channels,
            "opened cpal capture device");
        Ok(Self {
            name,
            device,
            sampling_rate: config.sampling_rate,
            channels: config.channels,
            stream: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
            frame_counter: Arc::new(AtomicI64::new(0)),
            stream_fault: Arc::new(Mutex::new(None)),
        })
    }

    /// Build an input stream feeding interleaved i16 samples to `handler`.
    ///
    /// Tries the native i16 format first, then falls back to f32 with
    /// software conversion (PipeWire and some USB codecs only expose
    /// float).
    fn build_stream(&self, handler: Box<dyn FnMut(&[i16]) + Send>) -> Result<cpal::Stream> {
        let stream_config = cpal::StreamConfig {
            channels: self.channels as u16,
            sample_rate: cpal::SampleRate(self.sampling_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let handler = Arc::new(Mutex::new(handler));

        // Native i16 path.
        let sink = Arc::clone(&handler);
        let fault = Arc::clone(&self.stream_fault);
        if let Ok(stream) = self.device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut handler) = sink.lock() {
                    (*handler)(data);
                }
            },
            move |err| {
                tracing::error!("audio stream error: {err}");
                if let Ok(mut slot) = fault.lock() {
                    slot.get_or_insert(SidError::DeviceRead {
                        message: format!("audio stream error: {err}"),
                    });
                }
            },
            None,
        ) {
            return Ok(stream);
        }

        // f32 with software conversion to full-scale i16.
        let sink = Arc::clone(&handler);
        let fault = Arc::clone(&self.stream_fault);
        self.device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    if let Ok(mut handler) = sink.lock() {
                        (*handler)(&converted);
                    }
                },
                move |err| {
                    tracing::error!("audio stream error: {err}");
                    if let Ok(mut slot) = fault.lock() {
                        slot.get_or_insert(SidError::DeviceRead {
                            message: format!("audio stream error: {err}"),
                        });
                    }
                },
                None,
            )
            .map_err(|e| SidError::DeviceOpen {
                message: format!("unsupported stream format: {e}"),
            })
    }

    fn ensure_buffer_stream(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.frame_counter);
        let channels = self.channels;
        let stream = self.build_stream(Box::new(move |data| {
            counter.fetch_add((data.len() / channels) as i64, Ordering::SeqCst);
            if let Ok(mut buf) = buffer.lock() {
                buf.extend_from_slice(data);
            }
        }))?;
        stream.play().map_err(|e| SidError::DeviceOpen {
            message: format!("failed to start stream: {e}"),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }
}

impl AudioDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture_window(&mut self, seconds: u32) -> Result<SampleWindow> {
        self.ensure_buffer_stream()?;
        let needed = (seconds * self.sampling_rate) as usize * self.channels;
        // A stalled device must surface as a read error, not a hang.
        let deadline = std::time::Instant::now() + Duration::from_secs(2 * seconds as u64 + 5);
        loop {
            {
                let mut buf = self.buffer.lock().map_err(|_| SidError::DeviceRead {
                    message: "capture buffer poisoned".to_string(),
                })?;
                if buf.len() >= needed {
                    let samples: Vec<i16> = buf.drain(..needed).collect();
                    return Ok(SampleWindow::new(samples, self.channels));
                }
            }
            if let Some(err) = self.take_error() {
                return Err(err);
            }
            if std::time::Instant::now() >= deadline {
                return Err(SidError::DeviceRead {
                    message: format!("device produced no {seconds} s window before timeout"),
                });
            }
            thread::sleep(Duration::from_millis(CAPTURE_POLL_MS));
        }
    }

    fn start(&mut self, on_chunk: ChunkCallback) -> Result<()> {
        if self.stream.is_some() {
            return Err(SidError::DeviceOpen {
                message: "capture already running".to_string(),
            });
        }
        let counter = Arc::clone(&self.frame_counter);
        let channels = self.channels;
        let on_chunk = Arc::new(Mutex::new(on_chunk));
        let stream = self.build_stream(Box::new(move |data| {
            let frames = (data.len() / channels) as i64;
            let start = counter.fetch_add(frames, Ordering::SeqCst);
            if let Ok(mut callback) = on_chunk.lock() {
                (*callback)(AudioChunk::new(start, data.to_vec()));
            }
        }))?;
        stream.play().map_err(|e| SidError::DeviceOpen {
            message: format!("failed to start stream: {e}"),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(SendableStream(stream)) = self.stream.take() {
            let _ = stream.pause();
        }
        Ok(())
    }

    fn take_error(&mut self) -> Option<SidError> {
        self.stream_fault.lock().ok().and_then(|mut slot| slot.take())
    }
}
