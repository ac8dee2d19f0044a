use std::net::SocketAddr;

use accounts::{app, initialize_state, telemetry};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tracer = telemetry::init_tracing().map_err(|err| err as Box<dyn std::error::Error>)?;

    let mut state = initialize_state().await?;
    match telemetry::setup_metrics_recorder() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(err) => tracing::warn!(error = %err, "prometheus recorder not installed"),
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port()));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, version = state.config.version(), "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(provider) = tracer {
        if let Err(err) = provider.shutdown() {
            tracing::warn!(error = %err, "tracer provider not flushed");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
