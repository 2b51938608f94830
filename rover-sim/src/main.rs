mod rover;
mod session;

use rover::SimRover;
use rover_shared::timing;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let bind = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:8080".into());
    let listener = TcpListener::bind(&bind).await?;
    info!("Rover simulator listening on {}", bind);

    let rover = Arc::new(SimRover::new());
    let period = Duration::from_millis(timing::TELEMETRY_INTERVAL_MS);

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("Connection from: {}", addr);
        if let Err(e) = socket.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let rover = rover.clone();
        tokio::spawn(async move {
            if let Err(e) = session::run(socket, addr.to_string(), rover, period).await {
                warn!("Session {} ended: {:#}", addr, e);
            }
        });
    }
}
