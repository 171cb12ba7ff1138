//! Consult Relay server binary.
//!
//! Parses configuration, wires collaborators, starts the cleanup sweeper and
//! serves the router until Ctrl-C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use consult_relay::collaborators::{
    AppointmentAuthorizer, HttpAppointmentAuthorizer, HttpDirectory, IdentityDirectory,
    MemoryAppointmentBook, MemoryDirectory, TracingAuditor,
};
use consult_relay::config::{MAX_APPOINTMENT_WINDOW_MINS, MAX_RING_TIMEOUT_SECS};
use consult_relay::{router, sweeper, CoordinatorConfig, CoordinatorState};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "consult-relay", version, about = "Telehealth call coordinator")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "RELAY_PORT")]
    port: u16,

    /// Seconds a call may ring before it is timed out
    #[arg(
        long,
        default_value_t = 300,
        env = "RING_TIMEOUT_SECS",
        value_parser = clap::value_parser!(i64).range(1..=MAX_RING_TIMEOUT_SECS)
    )]
    ring_timeout_secs: i64,

    /// Cleanup sweep interval in seconds
    #[arg(
        long,
        default_value_t = 120,
        env = "SWEEP_INTERVAL_SECS",
        value_parser = clap::value_parser!(u64).range(1..=86_400)
    )]
    sweep_interval_secs: u64,

    /// Minutes either side of an appointment's scheduled time in which a
    /// call under it is allowed
    #[arg(
        long,
        default_value_t = 15,
        env = "APPOINTMENT_WINDOW_MINS",
        value_parser = clap::value_parser!(i64).range(0..=MAX_APPOINTMENT_WINDOW_MINS)
    )]
    appointment_window_mins: i64,

    /// Upper bound on any single directory or appointment backend call
    #[arg(
        long,
        default_value_t = 5000,
        env = "COLLABORATOR_TIMEOUT_MS",
        value_parser = clap::value_parser!(u64).range(1..=600_000)
    )]
    collaborator_timeout_ms: u64,

    /// Identity directory base URL. In-memory directory if unset.
    #[arg(long, env = "DIRECTORY_URL")]
    directory_url: Option<String>,

    /// Appointment backend base URL (the platform's REST API). In-memory
    /// book if unset.
    #[arg(long, env = "APPOINTMENTS_URL")]
    appointments_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> CoordinatorConfig {
        CoordinatorConfig {
            port: self.port,
            ring_timeout_secs: self.ring_timeout_secs,
            sweep_interval_secs: self.sweep_interval_secs,
            appointment_window_mins: self.appointment_window_mins,
            collaborator_timeout_ms: self.collaborator_timeout_ms,
            directory_url: self.directory_url,
            appointments_url: self.appointments_url,
        }
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = args.into_config();

    // ── Collaborators ─────────────────────────────────────────────────────

    let client = reqwest::Client::builder()
        .timeout(config.collaborator_timeout())
        .build()?;

    let directory: Arc<dyn IdentityDirectory> = match config.directory_url.as_deref() {
        Some(url) => {
            tracing::info!(url = url, "Using HTTP identity directory");
            Arc::new(HttpDirectory::new(client.clone(), url))
        }
        None => {
            tracing::info!("Using in-memory identity directory");
            Arc::new(MemoryDirectory::new())
        }
    };

    let authorizer: Arc<dyn AppointmentAuthorizer> = match config.appointments_url.as_deref() {
        Some(url) => {
            tracing::info!(url = url, "Using HTTP appointment backend");
            Arc::new(HttpAppointmentAuthorizer::new(
                client,
                url,
                config.appointment_window(),
            ))
        }
        None => {
            tracing::info!("Using in-memory appointment book");
            Arc::new(MemoryAppointmentBook::new(config.appointment_window()))
        }
    };

    let port = config.port;
    let sweep_interval = config.sweep_interval();
    let state = CoordinatorState::new(config, directory, authorizer, Arc::new(TracingAuditor));

    // ── Background Tasks ──────────────────────────────────────────────────

    let shutdown = CancellationToken::new();
    let sweeper_task = sweeper::spawn_sweeper(state.sessions.clone(), sweep_interval, shutdown.clone());

    // ── Serve ─────────────────────────────────────────────────────────────

    let app = router(state);
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Consult relay starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, draining connections");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    if tokio::time::timeout(Duration::from_secs(5), sweeper_task)
        .await
        .is_err()
    {
        tracing::warn!("Cleanup sweeper did not stop in time");
    }

    tracing::info!("Consult relay stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "consult_relay=info,tower_http=info".into());

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
