use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use orka_core::config::BackpressurePolicy;
use orka_core::event_bus::SubscribeOptions;
use orka_types::Event;
use serde::Deserialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/events/replay", get(replay)).route("/events/stream", get(stream))
}

#[derive(Debug, Deserialize)]
struct ReplayQuery {
    #[serde(default)]
    from_sequence: u64,
    filter: Option<String>,
}

async fn replay(State(state): State<AppState>, Query(query): Query<ReplayQuery>) -> Json<Vec<Event>> {
    Json(state.events.replay(query.from_sequence, query.filter.as_deref()).await)
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    #[serde(default = "default_pattern")]
    pattern: String,
}

fn default_pattern() -> String {
    "**".to_string()
}

async fn stream(State(state): State<AppState>, Query(query): Query<StreamQuery>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state, query.pattern))
}

async fn handle_stream(mut socket: WebSocket, state: AppState, pattern: String) {
    let subscription = match state
        .events
        .subscribe(
            vec![pattern],
            SubscribeOptions {
                backpressure: Some(BackpressurePolicy::DropOldest),
                ..Default::default()
            },
        )
        .await
    {
        Ok(sub) => sub,
        Err(err) => {
            let _ = socket
                .send(WsMessage::Text(format!("{{\"error\":\"{err}\"}}").into()))
                .await;
            return;
        }
    };

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let Ok(payload) = serde_json::to_string(&event) else { continue };
                if socket.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
