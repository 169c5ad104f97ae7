//! Drift-corrected bucketing of a continuous audio stream.
//!
//! The sound card's sample clock and the system clock run independently and
//! neither is perfect. The bucketer reconciles them: it accumulates chunks,
//! tracks the drift between audio-sample-derived time and wall-clock time,
//! and cuts the stream into windows aligned to wall-clock interval edges.
//! Corrections are realized by consuming slightly fewer or slightly more
//! raw frames per window, so the *boundaries* stay aligned, not just the
//! drift estimate.
//!
//! All state here is owned by whoever calls [`StreamBucketer::push_chunk`];
//! chunks arriving from multiple device threads need an external mutex.

use crate::acquisition::clock::{self, Clock};
use crate::acquisition::frame::{AudioChunk, SampleWindow, WindowReady};
use crate::config::Config;
use crate::defaults;

/// Bucketing parameters, fixed for one device session.
#[derive(Debug, Clone)]
pub struct BucketerConfig {
    pub interval_s: u32,
    pub sampling_rate: u32,
    pub channels: usize,
    /// Minimum usable window: a boundary that would close a window shorter
    /// than this is deferred to the next one.
    pub nfft: usize,
}

impl BucketerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval_s: config.monitor.log_interval,
            sampling_rate: config.audio.sampling_rate,
            channels: config.audio.channels,
            nfft: defaults::nfft_for_rate(config.audio.sampling_rate),
        }
    }

    /// Frames per completed window.
    fn window_frames(&self) -> i64 {
        self.interval_s as i64 * self.sampling_rate as i64
    }
}

/// Drift-control state. Lives for one device session; reset whenever a
/// jump of at least one full interval is detected.
#[derive(Debug, Clone, Default)]
pub struct DriftState {
    /// Cumulative correction added to raw audio frame indices. After the
    /// initial snap this calibrates the device's arbitrary counter epoch to
    /// wall-clock epoch seconds.
    pub correction_samples: i64,
    /// EMA of the drift, biased toward the smallest observed value: audio
    /// samples cannot have been produced in the future relative to wall
    /// clock, so the minimum drift is the best latency estimate.
    pub error_ema: f64,
    /// Integral of the EMA; tracks a steady clock-rate mismatch such as a
    /// card delivering 95999 Hz instead of 96000 Hz.
    pub integral_error: f64,
}

/// Buckets a callback-delivered chunk stream into interval-aligned windows.
pub struct StreamBucketer<C: Clock> {
    cfg: BucketerConfig,
    clock: C,
    drift: DriftState,
    /// Pending interleaved samples not yet cut into a window.
    pending: Vec<i16>,
    /// Raw audio frame index of the first pending frame.
    pending_start: Option<i64>,
    /// Corrected audio frame index of the next interval edge.
    next_boundary: Option<i64>,
    /// Correction (frames) computed by the control loop, realized at the
    /// next boundary.
    pending_skip: i64,
    /// False until the first partial interval has been trimmed away; a
    /// partial window is never emitted.
    primed: bool,
}

impl<C: Clock> StreamBucketer<C> {
    pub fn new(cfg: BucketerConfig, clock: C) -> Self {
        Self {
            cfg,
            clock,
            drift: DriftState::default(),
            pending: Vec::new(),
            pending_start: None,
            next_boundary: None,
            pending_skip: 0,
            primed: false,
        }
    }

    pub fn drift_state(&self) -> &DriftState {
        &self.drift
    }

    /// Consume one chunk, returning every window it completed (usually
    /// none or one).
    pub fn push_chunk(&mut self, chunk: AudioChunk) -> Vec<WindowReady> {
        let channels = self.cfg.channels;
        let rate = self.cfg.sampling_rate as f64;
        let interval = self.cfg.interval_s as f64;
        let frames = chunk.frames(channels) as i64;
        if frames == 0 {
            return Vec::new();
        }

        // A hole in the device's frame counter means samples were lost
        // (overrun) or the counter restarted. Pending audio on the far
        // side of the hole can no longer form an aligned window.
        if let Some(start) = self.pending_start {
            let expected = start + (self.pending.len() / channels) as i64;
            if expected != chunk.sample_index {
                tracing::warn!(
                    expected,
                    got = chunk.sample_index,
                    "audio frame counter discontinuity, resynchronizing"
                );
                self.resync();
            }
        }
        if self.pending_start.is_none() {
            self.pending_start = Some(chunk.sample_index);
        }
        self.pending.extend_from_slice(&chunk.samples);

        // Drift between wall clock and corrected audio time, measured at
        // the chunk's first frame.
        let mut audio_time = chunk.sample_index + self.drift.correction_samples;
        let now = self.clock.now();
        let mut drift = now - audio_time as f64 / rate;

        // A jump of one interval or more (device stall, overrun recovery,
        // process suspension, or the very first chunk of a session) is
        // snapped away in whole intervals instead of being fed through the
        // control loop.
        if drift.abs() >= interval {
            let jump = (drift / interval).floor();
            let jump_samples = jump as i64 * self.cfg.window_frames();
            self.drift.correction_samples += jump_samples;
            self.drift.error_ema = 0.0;
            self.drift.integral_error = 0.0;
            audio_time += jump_samples;
            drift = now - audio_time as f64 / rate;
            tracing::info!(
                jump_intervals = jump,
                residual_drift = drift,
                "audio clock jump absorbed"
            );
            self.resync();
            self.pending_start = Some(chunk.sample_index);
            self.pending.extend_from_slice(&chunk.samples);
        }

        // Proportional-integral control loop, run once per chunk.
        let dt = frames as f64 / rate;
        let decay = defaults::DRIFT_EMA_DECAY.powf(dt);
        let blended = self.drift.error_ema * decay + drift * (1.0 - decay);
        self.drift.error_ema = drift.min(blended);
        self.drift.integral_error += self.drift.error_ema * dt;
        self.pending_skip = ((self.drift.error_ema * defaults::DRIFT_PROPORTIONAL_GAIN
            + self.drift.integral_error * defaults::DRIFT_INTEGRAL_GAIN)
            * rate
            * interval
            / defaults::DRIFT_REFERENCE_INTERVAL_S)
            .round() as i64;

        if self.next_boundary.is_none() {
            // Corrected audio time tracks epoch seconds, and the interval
            // divides 86400, so grid edges are plain multiples of the
            // window length.
            let edge = (audio_time as f64 / rate / interval).floor() as i64 + 1;
            self.next_boundary = Some(edge * self.cfg.window_frames());
        }

        self.cut_windows()
    }

    /// Drop all pending audio and re-derive alignment from the next chunk.
    fn resync(&mut self) {
        self.pending.clear();
        self.pending_start = None;
        self.next_boundary = None;
        self.pending_skip = 0;
        self.primed = false;
    }

    /// Emit every window whose corrected boundary falls inside the pending
    /// buffer.
    fn cut_windows(&mut self) -> Vec<WindowReady> {
        let channels = self.cfg.channels;
        let window_frames = self.cfg.window_frames();
        let mut out = Vec::new();

        loop {
            let Some(boundary) = self.next_boundary else {
                break;
            };
            let Some(pending_start) = self.pending_start else {
                break;
            };
            let start_corrected = pending_start + self.drift.correction_samples;
            let boundary_off = boundary - start_corrected - self.pending_skip;

            // Boundary already behind the buffer start (possible right
            // after a large skip): move on to the next edge.
            if boundary_off <= 0 {
                self.next_boundary = Some(boundary + window_frames);
                continue;
            }

            let avail = (self.pending.len() / channels) as i64;

            if !self.primed {
                // First (partial) interval of the session: trim up to the
                // boundary without emitting.
                if avail < boundary_off {
                    break;
                }
                self.consume(boundary_off);
                self.apply_skip();
                self.primed = true;
                self.next_boundary = Some(boundary + window_frames);
                continue;
            }

            // Never hand a window shorter than the FFT size to spectral
            // analysis; defer the cut to the following edge instead.
            if boundary_off < self.cfg.nfft as i64 {
                self.next_boundary = Some(boundary + window_frames);
                continue;
            }

            if avail < boundary_off.max(window_frames) {
                break;
            }

            // The window is the last `window_frames` frames before the
            // corrected boundary. Frames before that (negative skip, i.e.
            // the audio clock running fast) are dropped; with positive
            // skip the window start holds back frames already emitted.
            let lead = (boundary_off - window_frames).max(0);
            if lead > 0 {
                self.consume(lead);
            }
            let samples = self.pending[..window_frames as usize * channels].to_vec();
            let window = SampleWindow::new(samples, channels);

            let start_epoch = (boundary - window_frames) as f64 / self.cfg.sampling_rate as f64;
            let utc = clock::utc_from_epoch(start_epoch);
            let data_index = clock::data_index(&utc, self.cfg.interval_s);
            out.push(WindowReady {
                window,
                utc,
                data_index,
            });

            self.consume(boundary_off - lead);
            self.apply_skip();
            self.next_boundary = Some(boundary + window_frames);
        }
        out
    }

    /// Drop `frames` frames from the front of the pending buffer.
    fn consume(&mut self, frames: i64) {
        let samples = frames as usize * self.cfg.channels;
        self.pending.drain(..samples.min(self.pending.len()));
        if let Some(start) = self.pending_start.as_mut() {
            *start += frames;
        }
    }

    /// Fold the realized correction into the cumulative counter offset.
    fn apply_skip(&mut self) {
        self.drift.correction_samples += self.pending_skip;
        self.pending_skip = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::clock::ManualClock;

    // 2024-03-01 00:00:00 UTC
    const MIDNIGHT: f64 = 1_709_251_200.0;

    const RATE: u32 = 1000;
    const INTERVAL: u32 = 5;
    const CHUNK_FRAMES: usize = 100;

    fn test_bucketer(clock: ManualClock) -> StreamBucketer<ManualClock> {
        StreamBucketer::new(
            BucketerConfig {
                interval_s: INTERVAL,
                sampling_rate: RATE,
                channels: 1,
                nfft: 64,
            },
            clock,
        )
    }

    /// Feed `seconds` of contiguous chunks, the wall clock advancing in
    /// lockstep with the audio clock (optionally skewed), starting from
    /// audio frame `start_frame` with the wall clock already set to the
    /// delivery time of the first chunk.
    fn feed(
        bucketer: &mut StreamBucketer<ManualClock>,
        clock: &ManualClock,
        start_frame: i64,
        seconds: f64,
        wall_seconds_per_chunk: f64,
    ) -> Vec<WindowReady> {
        let chunks = (seconds * RATE as f64 / CHUNK_FRAMES as f64) as i64;
        let mut windows = Vec::new();
        for i in 0..chunks {
            let index = start_frame + i * CHUNK_FRAMES as i64;
            windows.extend(bucketer.push_chunk(AudioChunk::new(index, vec![7i16; CHUNK_FRAMES])));
            clock.advance(wall_seconds_per_chunk);
        }
        windows
    }

    const CHUNK_S: f64 = CHUNK_FRAMES as f64 / RATE as f64;

    #[test]
    fn test_windows_are_exactly_one_interval() {
        let clock = ManualClock::new(MIDNIGHT + 2.4);
        let mut bucketer = test_bucketer(clock.clone());
        let windows = feed(&mut bucketer, &clock, 0, 30.0, CHUNK_S);
        assert!(!windows.is_empty());
        for ready in &windows {
            assert_eq!(ready.window.frames(), (INTERVAL * RATE) as usize);
        }
    }

    #[test]
    fn test_data_index_is_consecutive() {
        let clock = ManualClock::new(MIDNIGHT + 2.4);
        let mut bucketer = test_bucketer(clock.clone());
        let windows = feed(&mut bucketer, &clock, 0, 40.0, CHUNK_S);
        assert!(windows.len() >= 5);
        for pair in windows.windows(2) {
            assert_eq!(pair[1].data_index, pair[0].data_index + 1);
        }
    }

    #[test]
    fn test_first_partial_interval_is_discarded() {
        // Stream starts 2.4 s into a slot; the first emitted window must
        // cover a whole slot, not the 2.6 s remainder.
        let clock = ManualClock::new(MIDNIGHT + 2.4);
        let mut bucketer = test_bucketer(clock.clone());
        let windows = feed(&mut bucketer, &clock, 0, 12.0, CHUNK_S);
        assert!(!windows.is_empty());
        assert_eq!(windows[0].window.frames(), (INTERVAL * RATE) as usize);
        assert_eq!(windows[0].utc.timestamp() % INTERVAL as i64, 0);
    }

    #[test]
    fn test_windows_cross_midnight_cleanly() {
        let clock = ManualClock::new(MIDNIGHT + 86_400.0 - 12.0);
        let mut bucketer = test_bucketer(clock.clone());
        let windows = feed(&mut bucketer, &clock, 0, 24.0, CHUNK_S);
        let slots_per_day = (86_400 / INTERVAL) as usize;
        let indices: Vec<usize> = windows.iter().map(|w| w.data_index).collect();
        assert!(indices.contains(&(slots_per_day - 1)));
        assert!(indices.contains(&0));
        let wrap = indices
            .iter()
            .position(|&i| i == slots_per_day - 1)
            .expect("last slot present");
        assert_eq!(indices[wrap + 1], 0);
    }

    #[test]
    fn test_initial_snap_calibrates_counter_epoch() {
        let clock = ManualClock::new(MIDNIGHT + 2.4);
        let mut bucketer = test_bucketer(clock.clone());
        bucketer.push_chunk(AudioChunk::new(0, vec![0i16; CHUNK_FRAMES]));
        let drift = bucketer.drift_state();
        // The first chunk snapped the counter to the epoch in whole
        // intervals; the residual is below one interval.
        let corrected_s = drift.correction_samples as f64 / RATE as f64;
        let residual = clock.now() - corrected_s;
        assert!(residual >= 0.0 && residual < INTERVAL as f64, "{residual}");
    }

    #[test]
    fn test_stream_gap_resets_drift_state_and_realigns() {
        let clock = ManualClock::new(MIDNIGHT + 2.4);
        let mut bucketer = test_bucketer(clock.clone());
        feed(&mut bucketer, &clock, 0, 20.0, CHUNK_S);
        let correction_before = bucketer.drift_state().correction_samples;

        // Device stalls for 30 s: wall clock runs, no samples, counter
        // continues where it stopped.
        clock.advance(30.0);
        let resume_frame = (20.0 * RATE as f64) as i64;
        let windows = feed(&mut bucketer, &clock, resume_frame, 12.0, CHUNK_S);

        // The stall was absorbed as whole intervals of correction, roughly
        // 30 s worth; later boundaries add only frame-scale skips on top.
        let jump = bucketer.drift_state().correction_samples - correction_before;
        assert!(jump >= (25 * RATE) as i64, "{jump}");
        assert!(jump <= (35 * RATE) as i64, "{jump}");

        // Output resumes interval-aligned, full-length, within one
        // interval of the gap ending.
        assert!(!windows.is_empty());
        assert_eq!(windows[0].window.frames(), (INTERVAL * RATE) as usize);
        assert_eq!(windows[0].utc.timestamp() % INTERVAL as i64, 0);
    }

    #[test]
    fn test_counter_discontinuity_resyncs() {
        let clock = ManualClock::new(MIDNIGHT + 2.4);
        let mut bucketer = test_bucketer(clock.clone());
        feed(&mut bucketer, &clock, 0, 8.0, CHUNK_S);

        // Counter hole: 500 frames vanish (overrun drop).
        let resume_frame = (8.0 * RATE as f64) as i64 + 500;
        let windows = feed(&mut bucketer, &clock, resume_frame, 12.0, CHUNK_S);
        assert!(!windows.is_empty());
        for ready in &windows {
            assert_eq!(ready.window.frames(), (INTERVAL * RATE) as usize);
            assert_eq!(ready.utc.timestamp() % INTERVAL as i64, 0);
        }
    }

    #[test]
    fn test_full_day_fills_every_slot_once() {
        // A full simulated day in perfect lockstep: every slot of the day
        // is emitted exactly once, in order, all windows full length. The
        // sampling rate is scaled down to keep the test quick; the slot
        // arithmetic does not depend on it.
        let clock = ManualClock::new(MIDNIGHT - 10.0);
        let mut bucketer = test_bucketer(clock.clone());
        let target_date = crate::acquisition::clock::utc_from_epoch(MIDNIGHT).date_naive();

        let chunks = (86_420.0 * RATE as f64 / CHUNK_FRAMES as f64) as i64;
        let mut count = 0usize;
        let mut last_index: Option<usize> = None;
        for i in 0..chunks {
            let index = i * CHUNK_FRAMES as i64;
            for ready in bucketer.push_chunk(AudioChunk::new(index, vec![3i16; CHUNK_FRAMES])) {
                assert_eq!(ready.window.frames(), (INTERVAL * RATE) as usize);
                if ready.utc.date_naive() == target_date {
                    if let Some(prev) = last_index {
                        assert_eq!(ready.data_index, prev + 1);
                    }
                    last_index = Some(ready.data_index);
                    count += 1;
                }
            }
            clock.advance(CHUNK_S);
        }
        assert_eq!(count, (86_400 / INTERVAL) as usize);
        assert_eq!(last_index, Some((86_400 / INTERVAL) as usize - 1));
    }

    #[test]
    fn test_skewed_audio_clock_pushes_correction_forward() {
        // The card runs slow: each 100-frame chunk takes slightly more
        // than 0.1 s of wall time, so drift accumulates positive and the
        // controller must hold back samples (positive skip).
        let reference_clock = ManualClock::new(MIDNIGHT + 2.4);
        let mut reference = test_bucketer(reference_clock.clone());
        feed(&mut reference, &reference_clock, 0, 120.0, CHUNK_S);

        let clock = ManualClock::new(MIDNIGHT + 2.4);
        let mut skewed = test_bucketer(clock.clone());
        let windows = feed(&mut skewed, &clock, 0, 120.0, CHUNK_S * (1.0 + 500e-6));

        assert!(
            skewed.drift_state().integral_error > reference.drift_state().integral_error
        );
        assert!(skewed.pending_skip >= reference.pending_skip);

        // Boundaries stay on the grid while the loop fights the skew.
        for pair in windows.windows(2) {
            assert_eq!(pair[0].window.frames(), (INTERVAL * RATE) as usize);
            assert_eq!(pair[1].data_index, pair[0].data_index + 1);
        }
    }

    #[test]
    fn test_constant_skew_settles_below_one_sample() {
        // One simulated hour against a card running 50 ppm slow. The loop
        // must absorb both the initial in-slot latency and the steady rate
        // mismatch: by the end of the hour the corrected audio clock sits
        // within one sample period of the wall clock, and every window
        // along the way stayed full length and consecutive.
        let clock = ManualClock::new(MIDNIGHT + 2.4);
        let mut bucketer = test_bucketer(clock.clone());
        let hours_frames = (3_600.0 * RATE as f64) as i64;
        let windows = feed(&mut bucketer, &clock, 0, 3_600.0, CHUNK_S * (1.0 + 50e-6));

        assert_eq!(windows.len() as i64, hours_frames / (INTERVAL * RATE) as i64 - 1);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].window.frames(), (INTERVAL * RATE) as usize);
            assert_eq!(pair[1].data_index, pair[0].data_index + 1);
        }

        let corrected = hours_frames + bucketer.drift_state().correction_samples;
        let residual = clock.now() - corrected as f64 / RATE as f64;
        assert!(
            residual.abs() <= 1.0 / RATE as f64,
            "residual drift after one hour: {residual} s"
        );
    }

    #[test]
    fn test_ema_tracks_minimum_drift() {
        // Delivery latency varies; the EMA must sit near the smallest
        // observed drift, not the average.
        let clock = ManualClock::new(MIDNIGHT + 2.4);
        let mut bucketer = test_bucketer(clock.clone());
        bucketer.push_chunk(AudioChunk::new(0, vec![0i16; CHUNK_FRAMES]));
        let after_first = bucketer.drift_state().error_ema;

        // A late delivery (large transient drift) must not drag the EMA
        // upward past the minimum-biased update.
        clock.advance(1.5);
        bucketer.push_chunk(AudioChunk::new(
            CHUNK_FRAMES as i64,
            vec![0i16; CHUNK_FRAMES],
        ));
        let after_spike = bucketer.drift_state().error_ema;
        assert!(after_spike < after_first + 0.01);
    }

    #[test]
    fn test_empty_chunk_is_ignored() {
        let clock = ManualClock::new(MIDNIGHT);
        let mut bucketer = test_bucketer(clock);
        assert!(bucketer.push_chunk(AudioChunk::new(0, Vec::new())).is_empty());
    }
}
