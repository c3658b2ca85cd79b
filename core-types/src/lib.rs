//! Shared types, units, clock abstraction, and configuration for the
//! paceline speed/distance aggregation pipeline.

pub mod config;
pub mod time;
pub mod types;

pub use config::AppConfig;
pub use time::{Clock, SystemClock};
pub use types::{SpeedSample, TelemetrySnapshot};

/// Minimum distance delta (in distance units) considered real movement.
/// Anything at or below this is sensor jitter and is never persisted.
pub const MIN_SIGNIFICANT_DISTANCE: f64 = 0.02;

/// Divisor turning `speed (units/hour) * elapsed (seconds)` into distance units.
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Trailing window over which the rolling average speed is computed.
pub const SPEED_WINDOW_SECS: f64 = 300.0;

/// Device speeds arrive in m/s; displayed units are miles, so speed becomes
/// mph via km/h (x3.6) then the km->mile factor.
pub const MPS_TO_UNITS_PER_HOUR: f64 = 3.6 * 0.621371;
