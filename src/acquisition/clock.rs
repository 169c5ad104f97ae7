//! Wall-clock abstraction.
//!
//! The timer and the stream bucketer both reason about "seconds since the
//! Unix epoch" as a plain `f64`. Putting the clock behind a trait keeps the
//! drift arithmetic deterministic under test: the manual clock replays
//! midnight crossings, stalls and skewed audio clocks without waiting for
//! them.

use chrono::{DateTime, TimeZone, Timelike, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> f64;
}

/// The real system clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Manually advanced clock for tests.
///
/// Stores microseconds in an atomic so clones share one timeline across
/// threads.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(epoch_seconds: f64) -> Self {
        let clock = Self::default();
        clock.set(epoch_seconds);
        clock
    }

    pub fn set(&self, epoch_seconds: f64) {
        self.micros
            .store((epoch_seconds * 1e6) as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.micros
            .fetch_add((seconds * 1e6) as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1e6
    }
}

/// Convert epoch seconds to a UTC timestamp.
pub fn utc_from_epoch(epoch_seconds: f64) -> DateTime<Utc> {
    let secs = epoch_seconds.floor() as i64;
    let nanos = ((epoch_seconds - secs as f64) * 1e9) as u32;
    match Utc.timestamp_opt(secs, nanos) {
        chrono::LocalResult::Single(dt) => dt,
        // Out-of-range input only happens with a corrupt clock; clamp to
        // the epoch rather than panicking in the hot path.
        _ => Utc.timestamp_opt(0, 0).single().unwrap_or_default(),
    }
}

/// Seconds elapsed since UTC midnight for a timestamp.
pub fn seconds_since_midnight(utc: &DateTime<Utc>) -> u32 {
    utc.hour() * 3600 + utc.minute() * 60 + utc.second()
}

/// Day-buffer slot for a timestamp at a given log interval.
pub fn data_index(utc: &DateTime<Utc>, interval_s: u32) -> usize {
    (seconds_since_midnight(utc) / interval_s) as usize
}
