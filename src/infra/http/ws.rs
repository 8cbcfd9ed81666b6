//! Websocket endpoint bridging a client socket to its gateway room.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::application::error::AppError;

use super::HttpState;

const SUBSCRIBE_EVENT: &str = "subscribe_notifications";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    user_id: Option<Uuid>,
}

/// Connections without a user id are rejected before the upgrade; there is
/// no room to place them in.
pub async fn notifications_ws(
    State(state): State<HttpState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) = query.user_id else {
        return AppError::Unauthorized.into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(state, user_id, socket))
}

async fn handle_socket(state: HttpState, user_id: Uuid, socket: WebSocket) {
    let client_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.gateway.register_client(user_id, client_id, tx);
    debug!(%user_id, %client_id, "websocket client joined room");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(payload) => {
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        // Subscription is implicit in the room registration;
                        // the event is acknowledged and otherwise ignored.
                        if text.as_str() == SUBSCRIBE_EVENT {
                            let ack = Message::Text("{\"event\":\"subscribed\"}".into());
                            if sink.send(ack).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.gateway.unregister_client(user_id, client_id);
    debug!(%user_id, %client_id, "websocket client left room");
}
