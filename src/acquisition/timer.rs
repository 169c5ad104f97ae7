//! Self-correcting wall-clock interval timer.
//!
//! Drives the blocking acquisition strategy: one firing per log interval,
//! locked to multiples of the interval rather than drifting forward by the
//! scheduling slack of each tick. The per-fire arithmetic lives in
//! [`TickSchedule`] so it can be tested without threads or real time.

use crate::acquisition::clock::{self, Clock};
use crate::defaults;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest single sleep while waiting for the next firing; keeps `stop()`
/// responsive.
const SLEEP_SLICE_MS: u64 = 100;

/// Within this margin of the deadline the wait switches from sleeping to
/// spinning.
const SPIN_MARGIN_S: f64 = 0.005;

/// One timer firing.
#[derive(Debug, Clone)]
pub struct Tick {
    /// Wall clock at the firing, epoch seconds.
    pub now: f64,
    pub utc_now: chrono::DateTime<chrono::Utc>,
    /// Day-buffer slot derived from UTC time of day.
    pub data_index: usize,
    /// The firing landed outside `[expected, expected + interval)`. The
    /// measurement for this slot may be degraded; processing continues.
    pub violation: bool,
}

/// Pure firing arithmetic: expected-time bookkeeping, slot computation and
/// schedule-violation detection.
#[derive(Debug)]
pub struct TickSchedule {
    interval_s: u32,
    expected_time: f64,
}

impl TickSchedule {
    /// `start_time` must be a multiple of the interval (the synchronization
    /// phase guarantees this); the first firing is expected one interval
    /// later.
    pub fn new(interval_s: u32, start_time: f64) -> Self {
        Self {
            interval_s,
            expected_time: start_time + interval_s as f64,
        }
    }

    /// Epoch seconds of the next expected firing.
    pub fn expected_time(&self) -> f64 {
        self.expected_time
    }

    /// Account for one firing at wall time `now` and advance the schedule.
    ///
    /// The expected time advances by exactly one interval regardless of how
    /// late the firing was: a missed slot degrades its own data but the
    /// schedule re-locks to interval multiples on its own.
    pub fn on_fire(&mut self, now: f64) -> Tick {
        let interval = self.interval_s as f64;
        let violation = now < self.expected_time || now >= self.expected_time + interval;
        let utc_now = clock::utc_from_epoch(now);
        let data_index = clock::data_index(&utc_now, self.interval_s);
        self.expected_time += interval;
        Tick {
            now,
            utc_now,
            data_index,
            violation,
        }
    }
}

/// Interval timer running on a dedicated thread.
///
/// Construction blocks until the wall clock reaches a multiple of the
/// interval, then fires the callback once per interval. Only one firing
/// executes at a time by construction: all firings happen on the single
/// timer thread.
pub struct IntervalTimer {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl IntervalTimer {
    /// Synchronize to the interval grid and start firing `callback`.
    pub fn start<C, F>(interval_s: u32, clock: C, mut callback: F) -> Self
    where
        C: Clock + 'static,
        F: FnMut(Tick) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let worker = thread::spawn(move || {
            // Wait for synchro on the next whole interval. Epoch seconds
            // are UTC-midnight aligned, so `floor(now) % interval == 0`
            // lands on the same grid as the day-slot computation.
            let mut now = clock.now();
            while thread_running.load(Ordering::SeqCst)
                && (now.floor() as u64) % interval_s as u64 != 0
            {
                thread::sleep(Duration::from_millis(defaults::SYNC_POLL_MS));
                now = clock.now();
            }
            if !thread_running.load(Ordering::SeqCst) {
                return;
            }

            let start_time = (now / interval_s as f64).floor() * interval_s as f64;
            let mut schedule = TickSchedule::new(interval_s, start_time);
            tracing::debug!(start_time, interval_s, "timer synchronized");

            while thread_running.load(Ordering::SeqCst) {
                // Coarse sleep toward the deadline, then spin across the
                // last few milliseconds.
                loop {
                    let remaining = schedule.expected_time() - clock.now();
                    if remaining <= SPIN_MARGIN_S {
                        break;
                    }
                    let slice = remaining
                        .min(SLEEP_SLICE_MS as f64 / 1000.0)
                        .max(0.001);
                    thread::sleep(Duration::from_secs_f64(slice));
                    if !thread_running.load(Ordering::SeqCst) {
                        return;
                    }
                }

                let mut now = clock.now();
                if now < schedule.expected_time() {
                    let busy_wait = schedule.expected_time() - now;
                    tracing::warn!(
                        busy_wait_us = (busy_wait * 1e6) as u64,
                        "timer fired early, busy waiting"
                    );
                    while now < schedule.expected_time() {
                        if !thread_running.load(Ordering::SeqCst) {
                            return;
                        }
                        std::hint::spin_loop();
                        now = clock.now();
                    }
                }

                let tick = schedule.on_fire(now);
                if tick.violation {
                    tracing::warn!(
                        now = tick.now,
                        expected = schedule.expected_time() - interval_s as f64,
                        interval_s,
                        "hard realtime violation: timer fired outside its slot"
                    );
                }
                callback(tick);
            }
        });

        Self {
            running,
            worker: Some(worker),
        }
    }

    /// Cancel the pending firing and join the timer thread. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
