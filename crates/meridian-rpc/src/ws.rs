use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use meridian_sync::Topic;
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;

/// `WS /stream/{topic}` (spec §4.6 "subscribers ... over a websocket").
/// `{topic}` is `block` or `tx`; anything else is rejected before the
/// upgrade. Each connection gets its own `Subscription` from the broker —
/// a slow client only ever loses its own events (`dropped` counter), never
/// another subscriber's.
pub async fn stream(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let topic = parse_topic(&topic)?;
    Ok(ws.on_upgrade(move |socket| forward_events(socket, state, topic)))
}

fn parse_topic(raw: &str) -> Result<Topic, AppError> {
    match raw {
        "block" => Ok(Topic::Block),
        "tx" => Ok(Topic::Tx),
        other => Err(AppError::validation(format!("unknown stream topic '{other}', expected 'block' or 'tx'"))),
    }
}

async fn forward_events(mut socket: WebSocket, state: AppState, topic: Topic) {
    let mut sub = state.broker.subscribe(topic);
    loop {
        tokio::select! {
            event = sub.rx.recv() => {
                let Some(event) = event else { break };
                let Ok(payload) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
    debug!(dropped = sub.dropped.load(std::sync::atomic::Ordering::Relaxed), "stream subscriber disconnected");
}
