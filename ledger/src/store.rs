use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use core_types::{Clock, MIN_SIGNIFICANT_DISTANCE};

use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS daily_distance (
    date         TEXT    NOT NULL,
    entity_id    INTEGER NOT NULL,
    distance     REAL    NOT NULL DEFAULT 0.0,
    last_updated TEXT    NOT NULL,
    PRIMARY KEY (date, entity_id)
);
"#;

const DATE_FMT: &str = "%Y-%m-%d";

/// One entity's accumulated distance for one calendar date.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceRecord {
    pub entity_id: u32,
    pub date: NaiveDate,
    pub distance: f64,
    pub last_updated: DateTime<Local>,
}

/// Keyed merge store of daily distance totals.
///
/// Holds records for at most the two most recent distinct dates per entity;
/// everything older is evicted on every successful write. Falls back to an
/// in-memory connection when the database file cannot be opened, so a
/// storage outage degrades to session-only totals instead of failing the
/// caller.
pub struct DistanceLedger {
    conn: Mutex<Connection>,
    connected: bool,
    clock: Arc<dyn Clock>,
}

impl DistanceLedger {
    /// Open (creating if needed) the ledger at `path`. Never fails on a bad
    /// file: the error is logged and the ledger runs in-memory for this run,
    /// reported through [`DistanceLedger::connected`].
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        match Self::open_file(path) {
            Ok(conn) => Ok(Self {
                conn: Mutex::new(conn),
                connected: true,
                clock,
            }),
            Err(err) => {
                log::error!(
                    "cannot open distance db {}: {err}; totals for this run are in-memory only",
                    path.display()
                );
                let conn = Connection::open_in_memory()?;
                conn.execute_batch(SCHEMA)?;
                Ok(Self {
                    conn: Mutex::new(conn),
                    connected: false,
                    clock,
                })
            }
        }
    }

    fn open_file(path: &Path) -> Result<Connection> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    crate::LedgerError::CreateDir {
                        path: parent.to_path_buf(),
                        source,
                    }
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Whether totals are backed by the on-disk database. Checked once by
    /// the owner at startup; not consulted per call.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Accumulated distance for `(entity_id, date)`, 0.0 when absent.
    /// Read errors are logged and treated as 0.0; a stale total beats
    /// crashing a live display.
    pub fn distance_for(&self, entity_id: u32, date: NaiveDate) -> f64 {
        let conn = self.conn.lock();
        let lookup = conn
            .query_row(
                "SELECT distance FROM daily_distance WHERE date = ?1 AND entity_id = ?2",
                params![fmt_date(date), entity_id],
                |row| row.get::<_, f64>(0),
            )
            .optional();
        match lookup {
            Ok(value) => value.unwrap_or(0.0),
            Err(err) => {
                log::error!("distance read failed for entity {entity_id} on {date}: {err}");
                0.0
            }
        }
    }

    /// Merge `delta` distance units into `(entity_id, date)`, creating the
    /// record if absent, then evict every record for the entity whose date
    /// is neither wall-clock today nor yesterday. Deltas at or below the
    /// noise floor are rejected without touching storage. Returns whether a
    /// write committed; failures are logged, never propagated.
    pub fn merge_distance(&self, entity_id: u32, date: NaiveDate, delta: f64) -> bool {
        if delta <= MIN_SIGNIFICANT_DISTANCE {
            log::debug!(
                "skipping insignificant distance {delta:.4} for entity {entity_id} on {date}"
            );
            return false;
        }
        match self.merge_inner(entity_id, date, delta) {
            Ok(()) => true,
            Err(err) => {
                log::error!(
                    "distance merge failed for entity {entity_id} on {date} (+{delta:.4}): {err}"
                );
                false
            }
        }
    }

    fn merge_inner(&self, entity_id: u32, date: NaiveDate, delta: f64) -> Result<()> {
        let now = self.clock.now().to_rfc3339();
        let today = self.clock.today();
        let yesterday = today.pred_opt().unwrap_or(today);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO daily_distance (date, entity_id, distance, last_updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(date, entity_id) DO UPDATE SET
                distance = distance + ?3,
                last_updated = ?4",
            params![fmt_date(date), entity_id, delta, now],
        )?;
        // Retention keys off wall-clock today, not the date being written.
        tx.execute(
            "DELETE FROM daily_distance WHERE entity_id = ?1 AND date NOT IN (?2, ?3)",
            params![entity_id, fmt_date(today), fmt_date(yesterday)],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// All records dated today or yesterday, most recent date first, then
    /// entity id ascending.
    pub fn recent_records(&self) -> Vec<DistanceRecord> {
        match self.recent_inner() {
            Ok(records) => records,
            Err(err) => {
                log::error!("recent record listing failed: {err}");
                Vec::new()
            }
        }
    }

    fn recent_inner(&self) -> Result<Vec<DistanceRecord>> {
        let today = self.clock.today();
        let yesterday = today.pred_opt().unwrap_or(today);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date, entity_id, distance, last_updated FROM daily_distance
             WHERE date IN (?1, ?2)
             ORDER BY date DESC, entity_id ASC",
        )?;
        let rows = stmt.query_map(params![fmt_date(today), fmt_date(yesterday)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (date_raw, entity_id, distance, updated_raw) = row?;
            let Ok(date) = NaiveDate::parse_from_str(&date_raw, DATE_FMT) else {
                log::warn!("dropping daily_distance row with bad date {date_raw:?}");
                continue;
            };
            let last_updated = DateTime::parse_from_rfc3339(&updated_raw)
                .map(|ts| ts.with_timezone(&Local))
                .unwrap_or_else(|_| self.clock.now());
            records.push(DistanceRecord {
                entity_id,
                date,
                distance,
                last_updated,
            });
        }
        Ok(records)
    }
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}
