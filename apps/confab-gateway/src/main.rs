#![forbid(unsafe_code)]

use std::net::SocketAddr;

use confab_gateway::{build_router, init_tracing, GatewayConfig};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = GatewayConfig::default();
    let app = build_router(&config)?;
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "confab-gateway listening");

    axum::serve(listener, app).await?;
    Ok(())
}
