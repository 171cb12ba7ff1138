//! Coordinator configuration.

use std::time::Duration;

/// Default WebSocket/HTTP port.
const DEFAULT_PORT: u16 = 8080;

/// Default time a call may ring before the sweeper times it out (5 minutes).
const DEFAULT_RING_TIMEOUT_SECS: i64 = 300;

/// Default sweep interval (2 minutes).
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 120;

/// Default tolerance around an appointment's scheduled time.
const DEFAULT_APPOINTMENT_WINDOW_MINS: i64 = 15;

/// Default upper bound on any single directory/authorizer/auditor call.
const DEFAULT_COLLABORATOR_TIMEOUT_MS: u64 = 5000;

/// Longest accepted ring timeout (one day).
pub const MAX_RING_TIMEOUT_SECS: i64 = 86_400;

/// Widest accepted appointment window (one day).
pub const MAX_APPOINTMENT_WINDOW_MINS: i64 = 1_440;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub port: u16,
    /// Seconds a session may stay `ringing` before it is timed out.
    pub ring_timeout_secs: i64,
    pub sweep_interval_secs: u64,
    /// Minutes either side of an appointment's scheduled time during which
    /// a call under that appointment is allowed.
    pub appointment_window_mins: i64,
    pub collaborator_timeout_ms: u64,
    /// Base URL of the identity directory. `None` uses the in-memory directory.
    pub directory_url: Option<String>,
    /// Base URL of the appointment backend. `None` uses the in-memory book.
    pub appointments_url: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            ring_timeout_secs: DEFAULT_RING_TIMEOUT_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            appointment_window_mins: DEFAULT_APPOINTMENT_WINDOW_MINS,
            collaborator_timeout_ms: DEFAULT_COLLABORATOR_TIMEOUT_MS,
            directory_url: None,
            appointments_url: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Clamped to `0..=MAX_RING_TIMEOUT_SECS`.
    pub fn ring_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ring_timeout_secs.clamp(0, MAX_RING_TIMEOUT_SECS))
    }

    /// Clamped to `0..=MAX_APPOINTMENT_WINDOW_MINS`.
    pub fn appointment_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(
            self.appointment_window_mins
                .clamp(0, MAX_APPOINTMENT_WINDOW_MINS),
        )
    }
}
