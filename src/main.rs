use anyhow::Result;
use meter_twin::{api, config::Config, telemetry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to read .env: {e}");
        }
    }

    let cfg = Config::load()?;
    telemetry::init_tracing(&cfg.logging);

    let app_state = api::AppState::new(&cfg).await?;
    let app = api::router(app_state, &cfg);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("Server binding to 0.0.0.0 - service will be accessible from the network");
    }
    info!(%addr, timezone = %cfg.simulation.timezone, "starting meter twin");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
