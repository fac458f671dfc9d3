use super::AppState;
use crate::adapters::local::events::NotificationBus;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::debug;

pub async fn observe(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_observer(socket, state.bus))
}

/// Pump queued notifications out and record inbound activity until either side goes away.
async fn serve_observer(socket: WebSocket, bus: Arc<NotificationBus>) {
    let connection = bus.register();
    let (mut sink, mut stream) = socket.split();

    let outbound = connection.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.next_outbound().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => connection.touch(),
                Some(Err(e)) => {
                    debug!(connection = %connection.id, "socket error: {}", e);
                    break;
                }
            }
        }
    }

    bus.unregister(connection.id);
}
