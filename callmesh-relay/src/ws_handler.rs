use crate::hub::{ConnectionId, RelayHub};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use callmesh_core::RelayFrame;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<RelayHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: RelayHub) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let id = hub.connect(tx);
    info!("New relay connection {}", id);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let hub = hub.clone();

        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => handle_text(&hub, id, text.as_str()),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    hub.disconnect(id);
    info!("Relay connection {} closed", id);
}

fn handle_text(hub: &RelayHub, id: ConnectionId, text: &str) {
    match serde_json::from_str::<RelayFrame>(text) {
        Ok(frame) => hub.handle_frame(id, frame),
        Err(e) => warn!("Invalid relay frame from {}: {:?}", id, e),
    }
}
