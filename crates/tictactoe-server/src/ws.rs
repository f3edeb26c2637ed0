use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tictactoe_core::{ClientMessage, ServerMessage};

use crate::db;
use crate::identity::{Identity, PlayerId};
use crate::session::{GameSession, Outcome};
use crate::state::AppState;

/// Top-level WebSocket handler, spawned per connection.
pub async fn handle_socket(
    state: Arc<AppState>,
    mut socket: WebSocket,
    identity: Identity,
    game_id: String,
) {
    let _slot = ConnectionSlot::acquire(&state);
    let player_id = identity.id;

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let session = match state.registry.join(&game_id, identity, tx) {
        Ok((session, _mark)) => session,
        Err(err) => {
            warn!(game_id = %game_id, player_id, error = %err, "join rejected");
            let msg = ServerMessage::Error {
                error: err.to_string(),
            };
            let _ = send_json(&mut socket, &msg).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let _seat = SeatGuard {
        state: Arc::clone(&state),
        session: Arc::clone(&session),
        player: player_id,
    };

    let mut limiter = RateLimiter::new(state.config.max_messages_per_second);

    loop {
        tokio::select! {
            // Outbound: forward queued ServerMessage to the WebSocket.
            outbound = rx.recv() => {
                let Some(msg) = outbound else {
                    // Session closed underneath us.
                    break;
                };
                if send_json(&mut socket, &msg).await.is_err() {
                    break;
                }
            }
            // Inbound: read from the WebSocket.
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if !limiter.allow(Instant::now()) {
                            let msg = ServerMessage::Error {
                                error: "Rate limited".into(),
                            };
                            if send_json(&mut socket, &msg).await.is_err() {
                                break;
                            }
                            continue;
                        }

                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                warn!(game_id = %game_id, player_id, error = %e, "undecodable frame");
                                break;
                            }
                        };

                        handle_message(&state, &session, player_id, client_msg);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(game_id = %game_id, player_id, error = %e, "socket error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                }
            }
        }
    }

    debug!(game_id = %game_id, player_id, "connection closed");
}

/// Dispatch a single client message.
fn handle_message(state: &AppState, session: &GameSession, player: PlayerId, msg: ClientMessage) {
    match msg {
        ClientMessage::Move { position } => {
            let result = session.apply_move(player, position);
            record_outcomes(state, result.outcomes());
        }
        ClientMessage::NewGame => {
            session.reset();
        }
        ClientMessage::Unknown => {
            debug!(game_id = %session.id(), player_id = player, "unknown message ignored");
        }
    }
}

/// Persist results off the game path. A failed write is logged and dropped.
fn record_outcomes(state: &AppState, outcomes: Vec<(PlayerId, Outcome)>) {
    if outcomes.is_empty() {
        return;
    }
    let pool = state.db.clone();
    tokio::spawn(async move {
        for (player, outcome) in outcomes {
            if let Err(e) = db::record_outcome(&pool, player, outcome).await {
                warn!(player_id = player, ?outcome, error = %e, "failed to record outcome");
            }
        }
    });
}

async fn send_json(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to encode server message");
            Ok(())
        }
    }
}

/// Counts this socket against `max_connections` for as long as it lives.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Self {
        state.connection_count.fetch_add(1, Ordering::Relaxed);
        Self {
            state: Arc::clone(state),
        }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.connection_count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Gives up the player's seat however the handler exits.
struct SeatGuard {
    state: Arc<AppState>,
    session: Arc<GameSession>,
    player: PlayerId,
}

impl Drop for SeatGuard {
    fn drop(&mut self) {
        self.state.registry.leave(&self.session, self.player);
    }
}

/// Fixed one-second window.
struct RateLimiter {
    limit: u32,
    count: u32,
    window_start: Instant,
}

impl RateLimiter {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            count: 0,
            window_start: Instant::now(),
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) > Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
        self.count <= self.limit
    }
}
