//! Durable keyed store of per-day distance totals.
//!
//! The crate exposes:
//! - [`DistanceLedger`]: merge/read API over a single SQLite table keyed by
//!   `(date, entity_id)`, with automatic eviction of anything older than
//!   yesterday.
//! - [`DistanceRecord`]: one entity's accumulated distance for one date.
//!
//! Every per-call storage failure is caught here and converted into a safe
//! default; the live display path must never halt on a storage hiccup.

pub mod error;
pub mod store;

pub use error::{LedgerError, Result};
pub use store::{DistanceLedger, DistanceRecord};
