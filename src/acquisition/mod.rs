//! Interval-aligned acquisition: wall-clock timing, drift-corrected
//! bucketing, and the frame types shared by both trigger modes.

pub mod bucketer;
pub mod clock;
pub mod frame;
pub mod timer;

pub use bucketer::{BucketerConfig, DriftState, StreamBucketer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use frame::{AudioChunk, SampleWindow, WindowReady};
pub use timer::{IntervalTimer, Tick, TickSchedule};
