//! Cleanup sweeper background task.
//!
//! Periodically times out calls that have been ringing longer than the ring
//! timeout. Connected calls are never touched; they end through hang-up or
//! disconnect.
//!
//! The task exits when its cancellation token is cancelled, finishing the
//! sweep in progress first.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::CallSessionManager;

/// Spawn the sweeper on the current runtime.
pub fn spawn_sweeper(
    sessions: CallSessionManager,
    interval: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(start_sweeper(sessions, interval, cancel_token))
}

/// Run the sweep loop until `cancel_token` is cancelled.
pub async fn start_sweeper(
    sessions: CallSessionManager,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "Starting cleanup sweeper"
    );

    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; nothing can have expired yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_sweep(&sessions).await;
            }
            _ = cancel_token.cancelled() => {
                tracing::info!("Cleanup sweeper received shutdown signal, exiting");
                break;
            }
        }
    }

    tracing::info!("Cleanup sweeper stopped");
}

/// One sweep pass. Returns the number of sessions timed out.
pub(crate) async fn run_sweep(sessions: &CallSessionManager) -> usize {
    let expired = sessions.sweep_expired(Utc::now()).await;
    if !expired.is_empty() {
        tracing::info!(
            timed_out = expired.len(),
            remaining = sessions.active_count(),
            "Swept ringing calls"
        );
    }
    expired.len()
}
