
use std::net::SocketAddr;

use callmesh_relay::{RelayHub, router};
use tracing::Level;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Serves a fresh relay on an ephemeral port and returns its websocket URL.
pub async fn spawn_relay() -> (String, RelayHub) {
    let hub = RelayHub::new();
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("Failed to bind relay");
    let addr = listener.local_addr().expect("No local address");
    let app = router(hub.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Relay server failed");
    });

    (format!("ws://{addr}/ws"), hub)
}
