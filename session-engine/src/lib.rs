//! Streaming session statistics over a live speed feed.
//!
//! [`SessionEngine`] consumes timestamped speed samples, maintains current,
//! rolling-average, and peak speed plus session distance, and reconciles
//! calendar-day boundaries lazily: every public operation first checks
//! whether the wall-clock date moved past the cached one and, if so, closes
//! out the old day into the ledger exactly once. The process can therefore
//! idle across midnight, or restart mid-day, without double-counting or
//! attributing post-midnight distance to the prior day.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate};

use core_types::{Clock, TelemetrySnapshot, MIN_SIGNIFICANT_DISTANCE, SECONDS_PER_HOUR};
use ledger::DistanceLedger;

/// In-memory aggregation state for one entity's run.
///
/// All mutation happens through one owner (the orchestrator task); the
/// engine itself is single-threaded by design.
pub struct SessionEngine {
    entity_id: u32,
    ledger: Arc<DistanceLedger>,
    clock: Arc<dyn Clock>,
    window_secs: f64,

    current_date: NaiveDate,
    session_distance: f64,
    today_distance: f64,
    yesterday_distance: f64,

    current_speed: f64,
    max_speed: f64,
    speed_history: VecDeque<(f64, f64)>,
    last_sample_ts: Option<f64>,
    started_at: DateTime<Local>,
}

impl SessionEngine {
    /// Build a session seeded from the ledger's totals for today and
    /// yesterday (0.0 where absent, including when storage is down).
    pub fn new(
        entity_id: u32,
        ledger: Arc<DistanceLedger>,
        clock: Arc<dyn Clock>,
        window_secs: f64,
    ) -> Self {
        let current_date = clock.today();
        let today_distance = ledger.distance_for(entity_id, current_date);
        let yesterday_distance = current_date
            .pred_opt()
            .map(|date| ledger.distance_for(entity_id, date))
            .unwrap_or(0.0);
        let started_at = clock.now();
        Self {
            entity_id,
            ledger,
            clock,
            window_secs,
            current_date,
            session_distance: 0.0,
            today_distance,
            yesterday_distance,
            current_speed: 0.0,
            max_speed: 0.0,
            speed_history: VecDeque::new(),
            last_sample_ts: None,
            started_at,
        }
    }

    /// Consumption contract for the transport queue: update speed stats,
    /// then integrate distance against the gap to the previous sample.
    pub fn record_sample(&mut self, speed: f64, ts_secs: f64) {
        self.record_speed(speed, ts_secs);
        if let Some(prev) = self.last_sample_ts {
            self.integrate_distance(speed, ts_secs - prev);
        }
        self.last_sample_ts = Some(ts_secs);
    }

    /// Update current speed, raise the session peak, and append to the
    /// rolling window, pruning entries older than `window_secs` relative to
    /// `ts_secs`. The window boundary is inclusive: a sample exactly
    /// `window_secs` old still participates in the average.
    pub fn record_speed(&mut self, speed: f64, ts_secs: f64) {
        self.roll_day_if_needed();
        self.current_speed = speed;
        if speed > self.max_speed {
            self.max_speed = speed;
        }
        self.speed_history.push_back((ts_secs, speed));
        let horizon = ts_secs - self.window_secs;
        while let Some((ts, _)) = self.speed_history.front() {
            if *ts < horizon {
                self.speed_history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Accumulate `speed * elapsed / 3600` into the session distance.
    ///
    /// Linear integration with the newest speed over the whole gap,
    /// inherited from the original device loop; changing the numeric method
    /// would silently change all persisted totals.
    pub fn integrate_distance(&mut self, speed: f64, elapsed_secs: f64) {
        self.roll_day_if_needed();
        if !(elapsed_secs > 0.0) {
            return;
        }
        self.session_distance += speed * elapsed_secs / SECONDS_PER_HOUR;
    }

    /// Persist the unflushed session distance into today's ledger record.
    /// Returns whether a write occurred; below the noise floor (or on a
    /// merge failure, retried naturally next flush) this is a no-op and the
    /// session distance is retained. Safe to call at arbitrary times.
    pub fn flush(&mut self) -> bool {
        self.roll_day_if_needed();
        self.flush_session_into(self.current_date)
    }

    fn flush_session_into(&mut self, date: NaiveDate) -> bool {
        if self.session_distance <= MIN_SIGNIFICANT_DISTANCE {
            return false;
        }
        if self
            .ledger
            .merge_distance(self.entity_id, date, self.session_distance)
        {
            self.today_distance += self.session_distance;
            self.session_distance = 0.0;
            true
        } else {
            false
        }
    }

    fn roll_day_if_needed(&mut self) {
        let today = self.clock.today();
        if today == self.current_date {
            return;
        }
        log::info!(
            "calendar day rolled over: {} -> {today}",
            self.current_date
        );
        // Close the old day first so post-midnight distance never lands in
        // the prior bucket. Best effort: a failed merge is logged by the
        // ledger and must not block the live path.
        if !self.flush_session_into(self.current_date)
            && self.session_distance > MIN_SIGNIFICANT_DISTANCE
        {
            log::warn!(
                "could not persist {:.3} units for {} at rollover",
                self.session_distance,
                self.current_date
            );
        }
        self.yesterday_distance = self.today_distance;
        self.current_date = today;
        // Reload rather than reset: a second run on the same new day must
        // pick up what earlier runs already persisted.
        self.today_distance = self.ledger.distance_for(self.entity_id, today);
        self.session_distance = 0.0;
    }

    /// Mean speed over the retained trailing window, 0.0 when empty. This
    /// is not a cumulative session average.
    pub fn average_speed(&mut self) -> f64 {
        self.roll_day_if_needed();
        if self.speed_history.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.speed_history.iter().map(|(_, v)| v).sum();
        sum / self.speed_history.len() as f64
    }

    /// Authoritative distance so far today: persisted total plus the
    /// unflushed session remainder.
    pub fn total_today(&mut self) -> f64 {
        self.roll_day_if_needed();
        self.today_distance + self.session_distance
    }

    pub fn current_speed(&self) -> f64 {
        self.current_speed
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn yesterday_distance(&self) -> f64 {
        self.yesterday_distance
    }

    pub fn session_distance(&self) -> f64 {
        self.session_distance
    }

    pub fn last_sample_ts(&self) -> Option<f64> {
        self.last_sample_ts
    }

    /// Accessor set for the telemetry and render sinks.
    pub fn snapshot(&mut self) -> TelemetrySnapshot {
        let total_today = self.total_today();
        TelemetrySnapshot {
            current_speed: self.current_speed,
            average_speed: self.average_speed(),
            max_speed: self.max_speed,
            total_today,
            yesterday_distance: self.yesterday_distance,
            session_distance: self.session_distance,
            session_duration_secs: (self.clock.now() - self.started_at).num_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    struct ManualClock {
        today: Mutex<NaiveDate>,
    }

    impl ManualClock {
        fn starting(date: NaiveDate) -> Arc<Self> {
            Arc::new(Self {
                today: Mutex::new(date),
            })
        }

        fn set_today(&self, date: NaiveDate) {
            *self.today.lock() = date;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Local> {
            let date = *self.today.lock();
            Local
                .from_local_datetime(&date.and_hms_opt(12, 0, 0).unwrap())
                .unwrap()
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn engine_with(
        dir: &tempfile::TempDir,
        clock: Arc<ManualClock>,
    ) -> (SessionEngine, Arc<DistanceLedger>) {
        let ledger = Arc::new(
            DistanceLedger::open(&dir.path().join("distance.db"), clock.clone()).unwrap(),
        );
        let engine = SessionEngine::new(7, Arc::clone(&ledger), clock, 300.0);
        (engine, ledger)
    }

    #[test]
    fn linear_integration_scenario() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::starting(d(2024, 6, 10));
        let (mut engine, ledger) = engine_with(&dir, clock);

        engine.record_speed(10.0, 0.0);
        engine.integrate_distance(10.0, 360.0);
        assert!((engine.session_distance() - 1.0).abs() < 1e-9);

        assert!(engine.flush());
        assert!((ledger.distance_for(7, d(2024, 6, 10)) - 1.0).abs() < 1e-9);
        assert!((engine.total_today() - 1.0).abs() < 1e-9);
        assert_eq!(engine.session_distance(), 0.0);
    }

    #[test]
    fn flush_without_new_distance_is_a_nop() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::starting(d(2024, 6, 10));
        let (mut engine, _ledger) = engine_with(&dir, clock);

        assert!(!engine.flush());
        engine.record_speed(12.0, 0.0);
        engine.integrate_distance(12.0, 3.0); // 0.01 units, under the floor
        assert!(!engine.flush());
        assert!(!engine.flush());
        // The sub-floor remainder stays in the session for later flushes.
        assert!(engine.session_distance() > 0.0);
    }

    #[test]
    fn record_sample_integrates_only_after_first_sample() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::starting(d(2024, 6, 10));
        let (mut engine, _ledger) = engine_with(&dir, clock);

        engine.record_sample(10.0, 100.0);
        assert_eq!(engine.session_distance(), 0.0);

        engine.record_sample(20.0, 460.0);
        // 360s at the newest speed (20/h) = 2.0 units.
        assert!((engine.session_distance() - 2.0).abs() < 1e-9);
        assert_eq!(engine.last_sample_ts(), Some(460.0));
    }

    #[test]
    fn rolling_average_window_boundary_is_inclusive() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::starting(d(2024, 6, 10));
        let (mut engine, _ledger) = engine_with(&dir, clock);

        engine.record_speed(10.0, 0.0);
        engine.record_speed(20.0, 300.0);
        // t=0 is exactly window_secs old relative to t=300: still included.
        assert!((engine.average_speed() - 15.0).abs() < 1e-9);

        engine.record_speed(30.0, 301.0);
        // Now t=0 is strictly older than the window and falls out.
        assert!((engine.average_speed() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn average_speed_is_zero_when_empty() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::starting(d(2024, 6, 10));
        let (mut engine, _ledger) = engine_with(&dir, clock);
        assert_eq!(engine.average_speed(), 0.0);
    }

    #[test]
    fn max_speed_tracks_session_peak() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::starting(d(2024, 6, 10));
        let (mut engine, _ledger) = engine_with(&dir, clock);

        engine.record_speed(10.0, 0.0);
        engine.record_speed(18.0, 1.0);
        engine.record_speed(12.0, 2.0);
        assert_eq!(engine.max_speed(), 18.0);
        assert_eq!(engine.current_speed(), 12.0);
    }

    #[test]
    fn day_rollover_moves_totals_and_persists_old_day() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::starting(d(2024, 6, 10));
        let (mut engine, ledger) = engine_with(&dir, Arc::clone(&clock));

        engine.record_speed(10.0, 0.0);
        engine.integrate_distance(10.0, 360.0);

        clock.set_today(d(2024, 6, 11));
        assert_eq!(engine.total_today(), 0.0);
        assert!((engine.yesterday_distance() - 1.0).abs() < 1e-9);
        assert!((ledger.distance_for(7, d(2024, 6, 10)) - 1.0).abs() < 1e-9);
        assert_eq!(engine.session_distance(), 0.0);
    }

    #[test]
    fn day_rollover_is_idempotent_across_back_to_back_calls() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::starting(d(2024, 6, 10));
        let (mut engine, ledger) = engine_with(&dir, Arc::clone(&clock));

        engine.record_speed(10.0, 0.0);
        engine.integrate_distance(10.0, 360.0);

        clock.set_today(d(2024, 6, 11));
        let first = engine.total_today();
        let second = engine.total_today();
        assert_eq!(first, second);
        assert!((engine.yesterday_distance() - 1.0).abs() < 1e-9);
        // Exactly one merge happened for the old day.
        assert!((ledger.distance_for(7, d(2024, 6, 10)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rollover_reloads_today_written_by_an_earlier_run() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::starting(d(2024, 6, 10));
        let (mut engine, ledger) = engine_with(&dir, Arc::clone(&clock));

        // Another process already banked distance for the new day.
        clock.set_today(d(2024, 6, 11));
        assert!(ledger.merge_distance(7, d(2024, 6, 11), 2.5));

        assert!((engine.total_today() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn snapshot_reports_the_accessor_set() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::starting(d(2024, 6, 10));
        let (mut engine, _ledger) = engine_with(&dir, clock);

        engine.record_sample(10.0, 0.0);
        engine.record_sample(14.0, 300.0);

        let snap = engine.snapshot();
        assert_eq!(snap.current_speed, 14.0);
        assert_eq!(snap.max_speed, 14.0);
        assert!((snap.average_speed - 12.0).abs() < 1e-9);
        assert!((snap.total_today - snap.session_distance).abs() < 1e-9);
        assert_eq!(snap.yesterday_distance, 0.0);
    }
}
