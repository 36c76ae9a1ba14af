//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::r#match::{MatchCmd, MatchHandle};
use crate::game::PlayerInput;
use crate::http::middleware::verify_jwt;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
    /// Match to join
    pub match_id: Uuid,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match verify_jwt(&query.token, &state.config.supabase_jwt_secret) {
        Ok(claims) => {
            info!(user_id = %claims.sub, match_id = %query.match_id, "WebSocket upgrade");
            ws.on_upgrade(move |socket| handle_socket(socket, claims.sub, query.match_id, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            Response::builder()
                .status(401)
                .body("Unauthorized".into())
                .unwrap()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, match_id: Uuid, state: AppState) {
    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        user_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        debug!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    let Some(handle) = state.registry.lookup(&match_id) else {
        let _ = send_msg(
            &mut ws_sink,
            &ServerMsg::Error {
                user_id: Some(user_id),
                code: "match_not_found".to_string(),
                message: "Match not found".to_string(),
            },
        )
        .await;
        return;
    };

    // Resolve profile for the player record shown to other clients
    let (display_name, avatar_url) = match state.profile_store.ensure_profile(user_id).await {
        Ok(profile) => (profile.display_name, profile.avatar_url),
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to fetch profile");
            (format!("Player_{}", &user_id.to_string()[..8]), None)
        }
    };

    // Subscribe before joining so the join's own full-state broadcast is
    // the first thing this client receives after the welcome
    let event_rx = handle.event_tx.subscribe();

    let join = MatchCmd::Join {
        user_id,
        display_name,
        avatar_url,
    };
    if handle.cmd_tx.send(join).await.is_err() {
        debug!(user_id = %user_id, "Match mailbox closed before join");
        return;
    }

    run_session(user_id, ws_sink, ws_stream, &handle, event_rx).await;

    // Signal disconnect to the match
    let _ = handle
        .cmd_tx
        .send(MatchCmd::Client(PlayerInput {
            user_id,
            msg: ClientMsg::Leave,
            received_at: unix_millis(),
        }))
        .await;

    info!(user_id = %user_id, match_id = %match_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    user_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    handle: &MatchHandle,
    mut event_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = PlayerRateLimiter::new();

    // Writer task: match events -> WebSocket
    let writer_user_id = user_id;
    let writer_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(msg) => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(user_id = %writer_user_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Slow consumer; the next delta resynchronizes it
                    warn!(user_id = %writer_user_id, lagged = n, "Client lagged, skipping events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(user_id = %writer_user_id, "Event channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> match mailbox
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(user_id = %user_id, "Rate limited client message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        let input = PlayerInput {
                            user_id,
                            msg: client_msg,
                            received_at: unix_millis(),
                        };
                        if handle.cmd_tx.send(MatchCmd::Client(input)).await.is_err() {
                            debug!(user_id = %user_id, "Match mailbox closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(user_id = %user_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
