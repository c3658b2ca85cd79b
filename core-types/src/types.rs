use serde::{Deserialize, Serialize};

/// One timestamped speed reading delivered by the transport.
///
/// `speed` is already converted to display units per hour at the transport
/// boundary; `ts_secs` is Unix time in fractional seconds at arrival.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    pub speed: f64,
    pub ts_secs: f64,
}

/// Read-only view of the session handed to telemetry/render sinks and
/// reported once more on shutdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub current_speed: f64,
    pub average_speed: f64,
    pub max_speed: f64,
    pub total_today: f64,
    pub yesterday_distance: f64,
    pub session_distance: f64,
    pub session_duration_secs: i64,
}
