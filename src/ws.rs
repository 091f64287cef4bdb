//! WebSocket endpoint for the external collaborators: the chat bot feeding
//! votes, the operator console, and the on-stream overlay.
//!
//! Authorization is by connection role: operator commands are rejected for
//! bot/overlay connections. Everything administrative goes through the admin
//! queue and is applied by the scheduler at its defined tick point, never
//! here.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::scheduler::AdminRequest;
use crate::state::RotationState;
use crate::types::Role;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub role: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<RotationState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Handle one collaborator connection
async fn handle_socket(socket: WebSocket, params: WsQuery, state: RotationState) {
    let (mut sender, mut receiver) = socket.split();

    let role = match params.role.as_deref() {
        Some("operator") => Role::Operator,
        Some("overlay") => Role::Overlay,
        _ => Role::Bot,
    };
    // Fallback voter identity for vote events that arrive without one
    let session_id = ulid::Ulid::new().to_string();
    tracing::info!(?role, %session_id, "collaborator connected");

    // First snapshot immediately so the client does not wait a broadcast period
    let snapshot = state.snapshot(0).await;
    if let Ok(json) = serde_json::to_string(&snapshot) {
        if sender.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    let mut broadcast_rx = state.subscribe();
    let mut shutdown = state.shutdown_rx();

    loop {
        tokio::select! {
            broadcast_msg = broadcast_rx.recv() => {
                if let Ok(msg) = broadcast_msg {
                    if let Ok(json) = serde_json::to_string(&msg) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) =
                                    handle_message(client_msg, &role, &session_id, &state).await
                                {
                                    if let Ok(json) = serde_json::to_string(&response) {
                                        if sender.send(Message::Text(json.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "unparseable client message");
                                let error = ServerMessage::Error {
                                    message: format!("invalid message format: {}", e),
                                };
                                if let Ok(json) = serde_json::to_string(&error) {
                                    let _ = sender.send(Message::Text(json.into())).await;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "websocket error");
                        break;
                    }
                }
            }

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(?role, "collaborator disconnected");
}

/// Require the operator role for administrative messages.
macro_rules! check_operator {
    ($role:expr, $action:expr) => {
        if *$role != Role::Operator {
            return Some(ServerMessage::Error {
                message: format!("only the operator can {}", $action),
            });
        }
    };
}

/// Handle a collaborator message and return an optional direct response.
pub async fn handle_message(
    msg: ClientMessage,
    role: &Role,
    session_id: &str,
    state: &RotationState,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Vote { index, voter_id } => {
            let voter = if voter_id.is_empty() {
                session_id
            } else {
                voter_id.as_str()
            };
            state.record_vote(index, voter).await;
            // Double votes and out-of-range indices are silently ignored
            None
        }

        ClientMessage::StartVote { duration_secs } => {
            check_operator!(role, "start a vote");
            state.admin(AdminRequest::StartVote { duration_secs });
            Some(ServerMessage::Ack)
        }

        ClientMessage::EndVote => {
            check_operator!(role, "end a vote");
            state.admin(AdminRequest::EndVote);
            Some(ServerMessage::Ack)
        }

        ClientMessage::InsertModifier { key, refresh_pool } => {
            check_operator!(role, "insert a modifier");
            state.admin(AdminRequest::InsertModifier { key, refresh_pool });
            Some(ServerMessage::Ack)
        }

        ClientMessage::RemoveModifier { name } => {
            check_operator!(role, "remove a modifier");
            state.admin(AdminRequest::RemoveModifier { name });
            Some(ServerMessage::Ack)
        }

        ClientMessage::ResetSlots => {
            check_operator!(role, "reset the active slots");
            state.admin(AdminRequest::ResetSlots);
            Some(ServerMessage::Ack)
        }

        ClientMessage::SetModifierEnabled { key, enabled } => {
            check_operator!(role, "toggle a modifier");
            let known = state.rotation.write().await.catalog.set_enabled(&key, enabled);
            if known {
                Some(ServerMessage::Ack)
            } else {
                Some(ServerMessage::Error {
                    message: format!("unknown modifier: {}", key),
                })
            }
        }

        ClientMessage::DescribeModifier { key } => {
            let description = state.rotation.read().await.catalog.describe(&key);
            Some(ServerMessage::ModifierDescription { key, description })
        }

        ClientMessage::SetCycleMode { mode } => {
            check_operator!(role, "change the cycle mode");
            state.config.write().await.cycle_mode = mode;
            Some(ServerMessage::Ack)
        }

        ClientMessage::SetVotingType { voting_type } => {
            check_operator!(role, "change the voting type");
            state.config.write().await.voting_type = voting_type;
            Some(ServerMessage::Ack)
        }

        ClientMessage::SetOptionCount { count } => {
            check_operator!(role, "change the option count");
            state.config.write().await.set_vote_options(count);
            Some(ServerMessage::Ack)
        }

        ClientMessage::SetActiveSlotCount { count } => {
            check_operator!(role, "change the slot count");
            let mut config = state.config.write().await;
            config.set_active_slots(count);
            let slots = config.active_slots;
            drop(config);
            state.rotation.write().await.slots.resize(slots);
            Some(ServerMessage::Ack)
        }

        ClientMessage::SetTiming {
            lifetime_secs,
            vote_duration_secs,
            vote_delay_secs,
            softmax_factor,
        } => {
            check_operator!(role, "change timing");
            let mut config = state.config.write().await;
            if let Some(secs) = lifetime_secs {
                config.set_modifier_lifetime_secs(secs);
            }
            if let Some(secs) = vote_duration_secs {
                config.set_vote_duration_secs(secs);
            }
            if let Some(secs) = vote_delay_secs {
                config.set_vote_delay_secs(secs);
            }
            if let Some(factor) = softmax_factor {
                config.set_softmax_factor(factor);
            }
            Some(ServerMessage::Ack)
        }

        ClientMessage::SelectGame { name } => {
            check_operator!(role, "select a game");
            state.admin(AdminRequest::Engine(
                crate::protocol::EngineRequest::SelectGame { select_game: name },
            ));
            Some(ServerMessage::Ack)
        }

        ClientMessage::QueryAvailableGames => {
            check_operator!(role, "query games");
            state.admin(AdminRequest::Engine(
                crate::protocol::EngineRequest::AvailableGames {
                    available_games: true,
                },
            ));
            Some(ServerMessage::Ack)
        }

        ClientMessage::QueryGameInfo => {
            check_operator!(role, "query game info");
            state.admin(AdminRequest::Engine(
                crate::protocol::EngineRequest::GameInfo { game: true },
            ));
            Some(ServerMessage::Ack)
        }

        ClientMessage::SetEngineEndpoints {
            peer_host,
            peer_port,
            listen_port,
        } => {
            check_operator!(role, "reconfigure the engine link");
            let Some(link) = state.engine_link().await else {
                return Some(ServerMessage::Error {
                    message: "engine link is not attached".to_string(),
                });
            };
            match (peer_host, peer_port) {
                (Some(host), Some(port)) => link.set_peer(&host, port).await,
                (None, None) => {}
                _ => {
                    return Some(ServerMessage::Error {
                        message: "peer_host and peer_port must be set together".to_string(),
                    });
                }
            }
            if let Some(port) = listen_port {
                link.set_listen_port(port);
            }
            Some(ServerMessage::Ack)
        }
    }
}
