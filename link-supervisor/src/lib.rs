//! Liveness tracking and bounded-reconnect state machine for the upstream
//! sample link.
//!
//! The supervisor owns no I/O: the orchestrator feeds it sample arrivals and
//! attempt outcomes, and it answers with state transitions. [`Failed`] is
//! terminal for a run; the supervisor does not self-heal past the attempt
//! bound.
//!
//! [`Failed`]: ConnectionState::Failed

/// Link state as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Tracks upstream liveness and drives bounded reconnection.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    attempt_count: u32,
    max_attempts: u32,
    last_sample_ts: Option<f64>,
}

impl ConnectionSupervisor {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            last_sample_ts: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Mark the start of the initial connection attempt.
    pub fn begin_connect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }
    }

    /// A sample arrived: the link is alive. Resets the attempt counter and
    /// settles into `Connected` from any non-terminal state.
    pub fn on_sample_received(&mut self, now_secs: f64) {
        if self.state == ConnectionState::Failed {
            return;
        }
        self.last_sample_ts = Some(now_secs);
        self.attempt_count = 0;
        if self.state != ConnectionState::Connected {
            log::info!("upstream link established");
            self.state = ConnectionState::Connected;
        }
    }

    /// Poll-driven liveness check. Returns true exactly when the link just
    /// went stale (no sample within `liveness_window` seconds); the caller
    /// should then run the external reconnect procedure.
    pub fn check_liveness(&mut self, now_secs: f64, liveness_window: f64) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        let stale = self
            .last_sample_ts
            .is_some_and(|last| now_secs - last > liveness_window);
        if stale {
            log::warn!(
                "no samples for more than {liveness_window:.0}s; link considered lost"
            );
            self.state = ConnectionState::Reconnecting;
        }
        stale
    }

    /// Record the outcome of one reconnection attempt. Returns false exactly
    /// when the terminal `Failed` state holds, signaling the orchestrator to
    /// abort the run. The counter clamps at the bound; further failures
    /// cannot move it.
    pub fn record_attempt(&mut self, success: bool) -> bool {
        if self.state == ConnectionState::Failed {
            return false;
        }
        if success {
            self.state = ConnectionState::Connected;
            self.attempt_count = 0;
            return true;
        }
        self.attempt_count = (self.attempt_count + 1).min(self.max_attempts);
        if self.attempt_count >= self.max_attempts {
            log::error!(
                "reconnection failed after {} attempts; giving up",
                self.max_attempts
            );
            self.state = ConnectionState::Failed;
            false
        } else {
            self.state = ConnectionState::Reconnecting;
            true
        }
    }
}
