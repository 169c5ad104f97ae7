//! Power spectral density estimation and station bin lookup.
//!
//! One complete measurement window (interval seconds of audio) is reduced
//! to an averaged one-sided PSD per channel; each monitored station then
//! reads a single bin of it. Welch-style averaging over non-overlapping
//! Hann-windowed segments, all arithmetic in f64.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::acquisition::frame::SampleWindow;
use crate::config::StationConfig;
use crate::defaults;
use crate::error::{Result, SidError};

/// A station resolved against a concrete sampling rate: which channel to
/// read and which PSD bin holds its carrier.
#[derive(Debug, Clone)]
pub struct StationBinding {
    pub call_sign: String,
    pub channel: usize,
    pub frequency: u32,
    pub bin: usize,
}

/// Result of measuring one window: per-station strengths in binding order
/// and the display channel's full PSD.
#[derive(Debug, Clone)]
pub struct WindowMeasurement {
    pub strengths: Vec<f64>,
    pub psd: Vec<f64>,
}

/// Averaged-periodogram PSD over fixed-size segments.
pub struct SpectralExtractor {
    sampling_rate: u32,
    nfft: usize,
    fft: Arc<dyn Fft<f64>>,
    /// Hann window, length `nfft`.
    window: Vec<f64>,
    /// `sum(window[i]^2)`, part of the PSD normalization.
    window_power: f64,
}

impl SpectralExtractor {
    /// Build an extractor for the given sampling rate. The segment size
    /// scales with the rate so bin spacing stays constant across devices.
    pub fn new(sampling_rate: u32) -> Self {
        let nfft = defaults::nfft_for_rate(sampling_rate);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(nfft);
        let window: Vec<f64> = (0..nfft)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / nfft as f64).cos()))
            .collect();
        let window_power = window.iter().map(|w| w * w).sum();
        Self {
            sampling_rate,
            nfft,
            fft,
            window,
            window_power,
        }
    }

    pub fn nfft(&self) -> usize {
        self.nfft
    }

    /// Center frequency of each one-sided PSD bin, in Hz.
    pub fn frequencies(&self) -> Vec<f64> {
        let step = self.sampling_rate as f64 / self.nfft as f64;
        (0..=self.nfft / 2).map(|k| k as f64 * step).collect()
    }

    /// Resolve station configs to PSD bins. `bin = round(f * nfft / rate)`.
    pub fn bind_stations(&self, stations: &[StationConfig]) -> Result<Vec<StationBinding>> {
        stations
            .iter()
            .map(|station| {
                let bin = (station.frequency as f64 * self.nfft as f64
                    / self.sampling_rate as f64)
                    .round() as usize;
                if bin > self.nfft / 2 {
                    return Err(SidError::ConfigInvalidValue {
                        key: "station.frequency".into(),
                        message: format!(
                            "{} at {} Hz is above the Nyquist limit for {} Hz sampling",
                            station.call_sign, station.frequency, self.sampling_rate
                        ),
                    });
                }
                Ok(StationBinding {
                    call_sign: station.call_sign.clone(),
                    channel: station.channel,
                    frequency: station.frequency,
                    bin,
                })
            })
            .collect()
    }

    /// One-sided PSD of a single channel, averaged over all complete
    /// non-overlapping segments. Units are power per Hz; the trailing
    /// partial segment is ignored.
    ///
    /// # Errors
    ///
    /// [`SidError::SpectralCompute`] if fewer than `nfft` samples are given
    /// or the input contains non-finite values.
    pub fn psd(&self, samples: &[f64]) -> Result<Vec<f64>> {
        if samples.len() < self.nfft {
            return Err(SidError::SpectralCompute {
                message: format!(
                    "need at least {} samples for one segment, got {}",
                    self.nfft,
                    samples.len()
                ),
            });
        }
        if let Some(bad) = samples.iter().find(|s| !s.is_finite()) {
            return Err(SidError::SpectralCompute {
                message: format!("non-finite sample in input: {bad}"),
            });
        }

        let bins = self.nfft / 2 + 1;
        let segments = samples.len() / self.nfft;
        let mut accum = vec![0.0f64; bins];
        let mut buffer = vec![Complex::new(0.0, 0.0); self.nfft];

        for seg in 0..segments {
            let segment = &samples[seg * self.nfft..(seg + 1) * self.nfft];
            for (slot, (&s, &w)) in buffer.iter_mut().zip(segment.iter().zip(&self.window)) {
                *slot = Complex::new(s * w, 0.0);
            }
            self.fft.process(&mut buffer);
            for (k, acc) in accum.iter_mut().enumerate() {
                *acc += buffer[k].norm_sqr();
            }
        }

        let norm = self.sampling_rate as f64 * self.window_power * segments as f64;
        for (k, acc) in accum.iter_mut().enumerate() {
            *acc /= norm;
            // One-sided spectrum: interior bins carry both halves.
            if k != 0 && k != self.nfft / 2 {
                *acc *= 2.0;
            }
        }
        Ok(accum)
    }

    /// Signal strength of every bound station for one window, plus the
    /// full PSD of the first station's channel for live display. Channels
    /// are transformed at most once each.
    pub fn measure(
        &self,
        window: &SampleWindow,
        bindings: &[StationBinding],
    ) -> Result<WindowMeasurement> {
        let mut per_channel: Vec<Option<Vec<f64>>> = vec![None; window.channels()];
        let mut strengths = Vec::with_capacity(bindings.len());
        for binding in bindings {
            if binding.channel >= window.channels() {
                return Err(SidError::SpectralCompute {
                    message: format!(
                        "{} reads channel {} but the window has {}",
                        binding.call_sign,
                        binding.channel,
                        window.channels()
                    ),
                });
            }
            if per_channel[binding.channel].is_none() {
                per_channel[binding.channel] = Some(self.psd(&window.channel(binding.channel))?);
            }
            let psd = per_channel[binding.channel]
                .as_ref()
                .ok_or_else(|| SidError::Other("channel PSD missing".into()))?;
            strengths.push(psd[binding.bin]);
        }
        let display_channel = bindings.first().map_or(0, |b| b.channel);
        let psd = per_channel
            .get_mut(display_channel)
            .and_then(Option::take)
            .unwrap_or_default();
        Ok(WindowMeasurement { strengths, psd })
    }
}
