use chrono::{DateTime, Local, NaiveDate};

/// Wall-clock access used for day-rollover and ledger retention.
///
/// Everything that needs "today" goes through this trait so calendar
/// transitions can be driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn unix_secs(&self) -> f64 {
        self.now().timestamp_millis() as f64 / 1_000.0
    }
}

/// Production clock backed by the system's local time, matching how daily
/// totals are bucketed (local midnight, not UTC).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}
