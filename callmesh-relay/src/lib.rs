//! Development broadcast relay: topic pub/sub over websockets, speaking
//! [`callmesh_core::RelayFrame`]s. Delivery is best effort and nothing is
//! persisted.

pub mod hub;
pub mod ws_handler;

pub use hub::{ConnectionId, RelayHub};
pub use ws_handler::ws_handler;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

/// The relay's HTTP surface: websocket upgrades on `/ws`.
pub fn router(hub: RelayHub) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(hub)
}
