//! In-memory day buffers for station signal strengths.
//!
//! One slot per log interval per station, 86400/interval slots covering a
//! UTC day. The store also watches interval boundaries for hour and day
//! transitions; rollover events carry a snapshot of the buffers as they
//! stood *before* the boundary, so slot 0 of the new day is never mixed
//! into the finished day's data.

use chrono::{DateTime, NaiveDate, Timelike, Utc};

use crate::defaults::SECONDS_PER_DAY;

/// A frozen copy of the day's buffers, handed out on hour and day
/// boundaries.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub interval_s: u32,
    /// Per-station `(call_sign, strengths)`, one strength per slot.
    pub stations: Vec<(String, Vec<f64>)>,
    /// Which slots have been written this day.
    pub filled: Vec<bool>,
}

/// Emitted by [`BufferStore::on_interval_boundary`].
#[derive(Debug, Clone)]
pub enum BufferEvent {
    /// The UTC hour changed within the same day.
    HourlySnapshot(Snapshot),
    /// The UTC date changed; the snapshot is the completed day. The store
    /// has already been cleared for the new day when this is returned.
    DayRollover(Snapshot),
}

pub struct BufferStore {
    interval_s: u32,
    slots: usize,
    current_date: NaiveDate,
    last_hour: u32,
    call_signs: Vec<String>,
    /// One strength vector per station, indexed like `call_signs`.
    data: Vec<Vec<f64>>,
    filled: Vec<bool>,
}

impl BufferStore {
    /// `start` fixes the initial UTC date and hour the store tracks.
    pub fn new(
        interval_s: u32,
        call_signs: Vec<String>,
        start: &DateTime<Utc>,
    ) -> Self {
        let slots = (SECONDS_PER_DAY / interval_s) as usize;
        let data = vec![vec![0.0; slots]; call_signs.len()];
        Self {
            interval_s,
            slots,
            current_date: start.date_naive(),
            last_hour: start.hour(),
            call_signs,
            data,
            filled: vec![false; slots],
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn current_date(&self) -> NaiveDate {
        self.current_date
    }

    /// Strengths recorded for one station this day.
    pub fn station_data(&self, station: usize) -> &[f64] {
        &self.data[station]
    }

    /// Record one interval's strengths, one value per station in
    /// declaration order. Out-of-range indices are dropped with a warning
    /// rather than corrupting a neighbor slot.
    pub fn write(&mut self, data_index: usize, strengths: &[f64]) {
        if data_index >= self.slots {
            tracing::warn!(data_index, slots = self.slots, "slot index out of range, dropped");
            return;
        }
        debug_assert_eq!(strengths.len(), self.data.len());
        for (buffer, &value) in self.data.iter_mut().zip(strengths) {
            buffer[data_index] = value;
        }
        self.filled[data_index] = true;
    }

    /// Process an interval boundary at `utc`, which must be the *start*
    /// time of the interval about to be written. Returns the snapshot
    /// events the boundary produced; call this before [`write`] so a day's
    /// final snapshot never contains the next day's slot 0.
    ///
    /// [`write`]: BufferStore::write
    pub fn on_interval_boundary(&mut self, utc: &DateTime<Utc>) -> Vec<BufferEvent> {
        let mut events = Vec::new();
        let date = utc.date_naive();
        let hour = utc.hour();

        if date != self.current_date {
            tracing::info!(
                finished = %self.current_date,
                next = %date,
                "day rollover"
            );
            events.push(BufferEvent::DayRollover(self.snapshot()));
            self.clear_for(date);
        } else if hour != self.last_hour {
            events.push(BufferEvent::HourlySnapshot(self.snapshot()));
        }
        self.last_hour = hour;
        events
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            date: self.current_date,
            interval_s: self.interval_s,
            stations: self
                .call_signs
                .iter()
                .cloned()
                .zip(self.data.iter().cloned())
                .collect(),
            filled: self.filled.clone(),
        }
    }

    fn clear_for(&mut self, date: NaiveDate) {
        for buffer in &mut self.data {
            buffer.iter_mut().for_each(|v| *v = 0.0);
        }
        self.filled.iter_mut().for_each(|f| *f = false);
        self.current_date = date;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn store_at(start: &DateTime<Utc>) -> BufferStore {
        BufferStore::new(5, vec!["HWU".into(), "NAA".into()], start)
    }

    #[test]
    fn test_slot_count_and_write() {
        let start = utc(2024, 3, 1, 10, 0, 0);
        let mut store = store_at(&start);
        assert_eq!(store.slots(), 17_280);
        store.write(7_200, &[1.5, 2.5]);
        assert_eq!(store.station_data(0)[7_200], 1.5);
        assert_eq!(store.station_data(1)[7_200], 2.5);
    }

    #[test]
    fn test_same_hour_boundary_is_quiet() {
        let mut store = store_at(&utc(2024, 3, 1, 10, 0, 0));
        assert!(store.on_interval_boundary(&utc(2024, 3, 1, 10, 0, 5)).is_empty());
    }

    #[test]
    fn test_hour_change_snapshots() {
        let mut store = store_at(&utc(2024, 3, 1, 10, 59, 55));
        store.write(7_919, &[3.0, 4.0]);
        let events = store.on_interval_boundary(&utc(2024, 3, 1, 11, 0, 0));
        assert_eq!(events.len(), 1);
        match &events[0] {
            BufferEvent::HourlySnapshot(snap) => {
                assert_eq!(snap.date, utc(2024, 3, 1, 0, 0, 0).date_naive());
                assert_eq!(snap.stations[0].1[7_919], 3.0);
                assert!(snap.filled[7_919]);
            }
            other => panic!("expected hourly snapshot, got {other:?}"),
        }
        // Data survives an hourly snapshot.
        assert_eq!(store.station_data(1)[7_919], 4.0);
    }

    #[test]
    fn test_day_rollover_saves_then_clears() {
        // Last interval of the day goes to slot 17279; the next boundary
        // is 00:00:00 of the following day.
        let mut store = store_at(&utc(2024, 3, 1, 23, 59, 50));
        store.write(17_279, &[9.0, 8.0]);

        let events = store.on_interval_boundary(&utc(2024, 3, 2, 0, 0, 0));
        assert_eq!(events.len(), 1);
        match &events[0] {
            BufferEvent::DayRollover(snap) => {
                assert_eq!(snap.date, utc(2024, 3, 1, 0, 0, 0).date_naive());
                assert_eq!(snap.stations[0].1[17_279], 9.0);
                assert_eq!(snap.stations[1].1[17_279], 8.0);
            }
            other => panic!("expected day rollover, got {other:?}"),
        }

        // The store now belongs to the new day, empty.
        assert_eq!(store.current_date(), utc(2024, 3, 2, 0, 0, 0).date_naive());
        assert!(store.station_data(0).iter().all(|&v| v == 0.0));

        // Slot 0 of the new day lands after the rollover snapshot.
        store.write(0, &[1.0, 2.0]);
        assert_eq!(store.station_data(0)[0], 1.0);
    }

    #[test]
    fn test_midnight_emits_rollover_not_hourly() {
        let mut store = store_at(&utc(2024, 3, 1, 23, 59, 55));
        let events = store.on_interval_boundary(&utc(2024, 3, 2, 0, 0, 0));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], BufferEvent::DayRollover(_)));
    }

    #[test]
    fn test_first_hour_snapshot_carries_all_its_slots() {
        // Interval 10: slots 0..360 cover the first hour. The boundary at
        // 01:00:00 produces exactly one snapshot with those 360 filled.
        let start = utc(2024, 3, 1, 0, 0, 0);
        let mut store = BufferStore::new(10, vec!["HWU".into()], &start);
        for slot in 0..360 {
            store.write(slot, &[1.0]);
        }
        let events = store.on_interval_boundary(&utc(2024, 3, 1, 1, 0, 0));
        assert_eq!(events.len(), 1);
        match &events[0] {
            BufferEvent::HourlySnapshot(snap) => {
                assert_eq!(snap.filled.iter().filter(|&&f| f).count(), 360);
            }
            other => panic!("expected hourly snapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_index_is_dropped() {
        let mut store = store_at(&utc(2024, 3, 1, 0, 0, 0));
        store.write(20_000, &[1.0, 1.0]);
        assert!(store.station_data(0).iter().all(|&v| v == 0.0));
    }
}
