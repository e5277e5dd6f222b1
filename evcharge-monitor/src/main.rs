//! Follows one EV charging session and logs its state transitions.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p evcharge-monitor --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p evcharge-monitor
//!
//! # Configure logging level
//! RUST_LOG=debug cargo run -p evcharge-monitor
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `config.toml`)
//! - `EVCHARGE_URL` - Override the backend base URL
//! - `EVCHARGE_TOKEN` - Override the access token
//! - `RUST_LOG` - Log level filter (default: `info`)

use std::sync::Arc;

use evcharge::{
    ChargeProvider, InMemorySessionContextStore, ProviderConfig, SessionContextStore,
    SessionMonitor, SessionState,
};
use evcharge_http::HttpChargeClient;
use tracing_subscriber::EnvFilter;

use evcharge_monitor::config::MonitorConfig;
use evcharge_monitor::util::SigDown;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Monitor failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = MonitorConfig::load()?;
    tracing::info!(
        base_url = %config.base_url,
        poll_interval_secs = config.poll_interval_secs,
        retry_delay_secs = config.retry_delay_secs,
        "Loaded configuration"
    );

    let client = HttpChargeClient::try_from(config.base_url.as_str())?
        .with_timeout(config.request_timeout());
    let store: Arc<dyn SessionContextStore> = Arc::new(InMemorySessionContextStore::default());
    let provider = Arc::new(
        ChargeProvider::with_config(
            client,
            ProviderConfig::default().with_poll_interval(config.poll_interval()),
        )
        .with_context_store(store),
    );
    let authentication = config.authentication();

    let sig_down = SigDown::try_new()?;
    let shutdown = sig_down.cancellation_token();

    if config.start_session {
        provider.start_session(&authentication).await?;
        tracing::info!("Charging session started");
    }

    let mut monitor = SessionMonitor::spawn(Arc::clone(&provider), authentication);
    log_state(&monitor.state());

    loop {
        let state = tokio::select! {
            () = sig_down.recv() => break,
            state = monitor.changed() => state,
        };
        let Some(state) = state else {
            tracing::info!("Session stream ended");
            break;
        };
        log_state(&state);

        if let SessionState::Error(err) = &state {
            if err.requires_reauthorization() {
                return Err(format!("access token rejected: {err}").into());
            }
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(config.retry_delay()) => {
                    tracing::info!("Retrying session subscription");
                    monitor.retry();
                }
            }
        }
    }

    monitor.shutdown();
    tracing::info!("Monitor shut down gracefully");
    Ok(())
}

fn log_state(state: &SessionState) {
    match state.session() {
        Some(session) => tracing::info!(
            evse = %session.evse_id,
            status = %session.status,
            consumption_kwh = session.consumption,
            duration_secs = session.duration,
            "Session update"
        ),
        None => match state {
            SessionState::Error(err) => tracing::warn!(
                error = %err,
                transient = err.is_transient(),
                "Session unavailable"
            ),
            other => tracing::info!(state = ?other, "Session update"),
        },
    }
}
