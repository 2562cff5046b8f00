use anyhow::{Context, Result};
use clap::Parser;
use callmesh_relay::{RelayHub, router};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "callmesh-relay")]
#[command(about = "Broadcast relay for callmesh signaling")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let app = router(RelayHub::new());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Relay listening on ws://{}/ws", addr);

    axum::serve(listener, app).await.context("Relay server failed")?;
    Ok(())
}
