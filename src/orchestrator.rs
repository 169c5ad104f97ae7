//! Session wiring: device, timing, spectral analysis and buffers.
//!
//! One orchestrator runs one monitoring session in either trigger mode.
//! Blocking mode pairs an interval timer with synchronous window capture;
//! streaming mode feeds device callbacks through a bounded channel into the
//! drift-correcting bucketer. Both modes funnel completed windows through
//! [`Orchestrator::process_window`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError};

use crate::acquisition::bucketer::{BucketerConfig, StreamBucketer};
use crate::acquisition::clock::Clock;
use crate::acquisition::frame::WindowReady;
use crate::acquisition::timer::{IntervalTimer, Tick};
use crate::audio::AudioDevice;
use crate::buffer::{BufferEvent, BufferStore, Snapshot};
use crate::config::{Config, TriggerMode};
use crate::defaults;
use crate::error::{Result, SidError};
use crate::spectral::{SpectralExtractor, StationBinding};

const STATE_RUNNING: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Session lifecycle, readable from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Closing,
    Stopped,
}

/// Shared handle for requesting and observing shutdown. Clone it into
/// signal handlers and UI threads.
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<AtomicU8>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(STATE_RUNNING)),
        }
    }

    /// Ask the session to finish the current interval and stop.
    pub fn request_close(&self) {
        // Stopped stays stopped.
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_CLOSING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn state(&self) -> RunState {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => RunState::Running,
            STATE_CLOSING => RunState::Closing,
            _ => RunState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    fn mark_stopped(&self) {
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives the per-interval status line and display spectrum. The console
/// viewer just logs the line; a curses or GUI front end would redraw.
pub trait Viewer: Send {
    fn status_display(&mut self, message: &str);

    /// Fresh PSD of the display channel, one value per frequency bin.
    fn update_psd(&mut self, _frequencies: &[f64], _psd: &[f64]) {}
}

/// Logs every status line at info level.
pub struct LogViewer;

impl Viewer for LogViewer {
    fn status_display(&mut self, message: &str) {
        tracing::info!("{message}");
    }
}

/// Receives buffer snapshots on hour and day boundaries and at shutdown.
/// File writers implement this; the default discards everything.
pub trait SnapshotSink: Send {
    fn hourly_snapshot(&mut self, _snapshot: &Snapshot) {}
    fn day_rollover(&mut self, _snapshot: &Snapshot) {}
    fn session_end(&mut self, _snapshot: &Snapshot) {}
}

/// Sink that keeps nothing.
pub struct NullSink;

impl SnapshotSink for NullSink {}

pub struct Orchestrator<V: Viewer, S: SnapshotSink> {
    interval_s: u32,
    trigger: TriggerMode,
    hourly_save: bool,
    scaling_factor: f64,
    extractor: SpectralExtractor,
    bindings: Vec<StationBinding>,
    /// One entry per PSD bin; computed once, reused for every display
    /// update.
    frequencies: Vec<f64>,
    buffer: BufferStore,
    viewer: V,
    sink: S,
    bucketer_cfg: BucketerConfig,
    /// Device fault that ended the session, surfaced to the caller after
    /// the shutdown sequence has run.
    failure: Option<SidError>,
}

impl<V: Viewer, S: SnapshotSink> Orchestrator<V, S> {
    /// `start` fixes the day and hour the buffers initially track.
    pub fn new(config: &Config, start: &DateTime<Utc>, viewer: V, sink: S) -> Result<Self> {
        let extractor = SpectralExtractor::new(config.audio.sampling_rate);
        let frequencies = extractor.frequencies();
        let bindings = extractor.bind_stations(&config.stations)?;
        let call_signs = bindings.iter().map(|b| b.call_sign.clone()).collect();
        let buffer = BufferStore::new(config.monitor.log_interval, call_signs, start);
        Ok(Self {
            interval_s: config.monitor.log_interval,
            trigger: config.monitor.trigger,
            hourly_save: config.monitor.hourly_save,
            scaling_factor: config.monitor.scaling_factor,
            extractor,
            bindings,
            frequencies,
            buffer,
            viewer,
            sink,
            bucketer_cfg: BucketerConfig::from_config(config),
            failure: None,
        })
    }

    pub fn buffer(&self) -> &BufferStore {
        &self.buffer
    }

    /// Run until the handle requests close, picking the configured trigger
    /// mode.
    pub fn run<C>(
        &mut self,
        device: &mut dyn AudioDevice,
        clock: C,
        handle: &ShutdownHandle,
    ) -> Result<()>
    where
        C: Clock + 'static,
    {
        tracing::info!(
            device = device.name(),
            interval_s = self.interval_s,
            trigger = ?self.trigger,
            "session starting"
        );
        match self.trigger {
            TriggerMode::Blocking => self.run_blocking(device, clock, handle),
            TriggerMode::Streaming => self.run_streaming(device, clock, handle),
        }
    }

    /// Blocking trigger: an interval timer fires on the wall-clock grid
    /// and each tick captures one window synchronously.
    pub fn run_blocking<C>(
        &mut self,
        device: &mut dyn AudioDevice,
        clock: C,
        handle: &ShutdownHandle,
    ) -> Result<()>
    where
        C: Clock + 'static,
    {
        let (tick_tx, tick_rx) = bounded::<Tick>(4);
        let timer = IntervalTimer::start(self.interval_s, clock, move |tick| {
            if tick_tx.try_send(tick).is_err() {
                tracing::warn!("tick dropped, window processing is falling behind");
            }
        });

        while handle.is_running() {
            match tick_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(tick) => self.handle_tick(device, &tick, handle),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        drop(timer);
        self.shutdown(device, handle)
    }

    /// One blocking-mode tick: capture a full window and process it. A
    /// device read failure ends the session cleanly instead of leaving a
    /// half-dead process recording zeros forever.
    fn handle_tick(
        &mut self,
        device: &mut dyn AudioDevice,
        tick: &Tick,
        handle: &ShutdownHandle,
    ) {
        match device.capture_window(self.interval_s) {
            Ok(window) => {
                let ready = WindowReady {
                    window,
                    utc: tick.utc_now,
                    data_index: tick.data_index,
                };
                self.process_window(&ready);
            }
            Err(err) => {
                tracing::error!(%err, "device read failed, closing session");
                self.failure = Some(err);
                handle.request_close();
            }
        }
    }

    /// Streaming trigger: device callbacks cross a bounded channel into
    /// the bucketer, which decides where windows start and end.
    pub fn run_streaming<C>(
        &mut self,
        device: &mut dyn AudioDevice,
        clock: C,
        handle: &ShutdownHandle,
    ) -> Result<()>
    where
        C: Clock + 'static,
    {
        let (chunk_tx, chunk_rx) = bounded(defaults::CHUNK_CHANNEL_CAPACITY);
        device.start(Box::new(move |chunk| {
            // Never block the audio callback; a full channel means the
            // consumer stalled and the bucketer will resynchronize.
            if chunk_tx.try_send(chunk).is_err() {
                tracing::warn!("chunk channel full, dropping audio");
            }
        }))?;

        let mut bucketer = StreamBucketer::new(self.bucketer_cfg.clone(), clock);
        while handle.is_running() {
            match chunk_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(chunk) => {
                    for ready in bucketer.push_chunk(chunk) {
                        self.process_window(&ready);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // A dead stream delivers nothing, so a quiet channel is
                    // the moment to check whether the device is still alive.
                    if let Some(err) = device.take_error() {
                        tracing::error!(%err, "device stream failed, closing session");
                        self.failure = Some(err);
                        handle.request_close();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.shutdown(device, handle)
    }

    /// Reduce one completed window to per-station strengths and record
    /// them. Boundary events fire before the write so a finished day's
    /// snapshot never contains the new day's slot 0.
    pub fn process_window(&mut self, ready: &WindowReady) {
        for event in self.buffer.on_interval_boundary(&ready.utc) {
            self.dispatch(event);
        }

        let strengths = match self.extractor.measure(&ready.window, &self.bindings) {
            Ok(mut measurement) => {
                for value in &mut measurement.strengths {
                    *value *= self.scaling_factor;
                }
                self.viewer.update_psd(&self.frequencies, &measurement.psd);
                measurement.strengths
            }
            Err(err) => {
                tracing::warn!(%err, data_index = ready.data_index,
                    "spectral computation failed, recording zeros");
                vec![0.0; self.bindings.len()]
            }
        };
        self.buffer.write(ready.data_index, &strengths);

        let mut line = format!(
            "{} [{:>5}]",
            ready.utc.format("%Y-%m-%d %H:%M:%S"),
            ready.data_index
        );
        for (binding, strength) in self.bindings.iter().zip(&strengths) {
            line.push_str(&format!(" {}={:.3e}", binding.call_sign, strength));
        }
        self.viewer.status_display(&line);
    }

    fn dispatch(&mut self, event: BufferEvent) {
        match event {
            BufferEvent::HourlySnapshot(snapshot) => {
                if self.hourly_save {
                    self.sink.hourly_snapshot(&snapshot);
                }
            }
            BufferEvent::DayRollover(snapshot) => self.sink.day_rollover(&snapshot),
        }
    }

    fn shutdown(&mut self, device: &mut dyn AudioDevice, handle: &ShutdownHandle) -> Result<()> {
        device.close()?;
        self.sink.session_end(&self.buffer.snapshot());
        handle.mark_stopped();
        tracing::info!("session stopped");
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
