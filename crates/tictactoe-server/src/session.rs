use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use tictactoe_core::board::{self, Board, EMPTY_BOARD, Mark, board_to_wire};
use tictactoe_core::{GameState, PlayerInfo, ServerMessage};

use crate::connections::{ConnectionManager, Outbound};
use crate::identity::{Identity, PlayerId};

/// Result recorded against a player once a game finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Loss,
    Draw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Game is full")]
    Full,
    #[error("Game is over")]
    Finished,
    #[error("Already joined this game")]
    AlreadyJoined,
    /// The session was torn down after it was looked up.
    #[error("Game is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveResult {
    /// Rule violation; nothing changed and nothing was sent.
    Ignored,
    Continued,
    Won {
        winner: PlayerId,
        loser: Option<PlayerId>,
        cells: [usize; 3],
    },
    Drawn {
        players: Vec<PlayerId>,
    },
}

impl MoveResult {
    #[cfg(test)]
    pub fn is_applied(&self) -> bool {
        !matches!(self, MoveResult::Ignored)
    }

    /// Stats updates owed for this move.
    pub fn outcomes(&self) -> Vec<(PlayerId, Outcome)> {
        match self {
            MoveResult::Won { winner, loser, .. } => std::iter::once((*winner, Outcome::Win))
                .chain(loser.map(|id| (id, Outcome::Loss)))
                .collect(),
            MoveResult::Drawn { players } => {
                players.iter().map(|id| (*id, Outcome::Draw)).collect()
            }
            MoveResult::Ignored | MoveResult::Continued => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub identity: Identity,
    pub mark: Mark,
}

/// Point-in-time copy of a session's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub board: Board,
    pub turn: Mark,
    pub state: GameState,
    pub winner: Option<Mark>,
    pub winning_cells: Option<[usize; 3]>,
    pub players: Vec<PlayerInfo>,
}

struct Inner {
    board: Board,
    players: HashMap<PlayerId, Player>,
    turn: Mark,
    state: GameState,
    winner: Option<Mark>,
    winning_cells: Option<[usize; 3]>,
    last_activity: Instant,
    connections: ConnectionManager,
    closed: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            board: EMPTY_BOARD,
            players: HashMap::new(),
            turn: Mark::FIRST,
            state: GameState::Waiting,
            winner: None,
            winning_cells: None,
            last_activity: Instant::now(),
            connections: ConnectionManager::default(),
            closed: false,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn clear_board(&mut self) {
        self.board = EMPTY_BOARD;
        self.turn = Mark::FIRST;
        self.state = GameState::Waiting;
        self.winner = None;
        self.winning_cells = None;
    }

    fn close(&mut self, reason: &str) {
        self.closed = true;
        self.connections.broadcast(&ServerMessage::Error {
            error: reason.to_string(),
        });
        self.connections.clear();
    }

    fn free_mark(&self) -> Mark {
        if self.players.values().any(|p| p.mark == Mark::FIRST) {
            board::next_turn(Mark::FIRST)
        } else {
            Mark::FIRST
        }
    }

    fn player_infos(&self) -> Vec<PlayerInfo> {
        let mut infos: Vec<PlayerInfo> = self
            .players
            .values()
            .map(|p| PlayerInfo {
                id: p.identity.id,
                name: p.identity.name.clone(),
                avatar_url: p.identity.avatar_url.clone(),
                mark: p.mark,
            })
            .collect();
        infos.sort_by_key(|p| p.mark);
        infos
    }

    fn init_message(&self, mark: Mark) -> ServerMessage {
        ServerMessage::Init {
            player: mark,
            board: board_to_wire(&self.board),
            turn: self.turn,
            state: self.state,
            players: self.player_infos(),
        }
    }

    fn update_message(&self) -> ServerMessage {
        ServerMessage::Update {
            board: board_to_wire(&self.board),
            turn: self.turn,
            state: self.state,
            players: self.player_infos(),
        }
    }

    fn game_over_message(&self) -> ServerMessage {
        ServerMessage::GameOver {
            board: board_to_wire(&self.board),
            state: self.state,
            winner: self.winner,
            winning_cells: self.winning_cells,
        }
    }
}

/// One game. Every mutation goes through the session mutex, which is never
/// held across an `.await`.
pub struct GameSession {
    id: String,
    inner: Mutex<Inner>,
}

impl GameSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // A panic elsewhere must not lock the other player out of the game.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seat a player and register its channel. The joiner gets `init` first,
    /// everyone else an `update`.
    pub fn join(&self, identity: Identity, tx: Outbound) -> Result<Mark, JoinError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(JoinError::Closed);
        }
        if inner.players.contains_key(&identity.id) {
            return Err(JoinError::AlreadyJoined);
        }
        if inner.players.len() >= 2 {
            return Err(JoinError::Full);
        }
        if inner.state == GameState::Finished {
            return Err(JoinError::Finished);
        }

        let mark = inner.free_mark();
        let player_id = identity.id;
        inner.players.insert(player_id, Player { identity, mark });
        if inner.players.len() == 2 {
            inner.state = GameState::Playing;
        }
        inner.touch();

        inner.connections.register(player_id, tx);
        let init = inner.init_message(mark);
        inner.connections.send(player_id, init);
        let update = inner.update_message();
        inner.connections.broadcast_except(Some(player_id), &update);

        info!(game_id = %self.id, player_id, ?mark, state = ?inner.state, "player joined");
        Ok(mark)
    }

    pub fn apply_move(&self, player: PlayerId, position: i64) -> MoveResult {
        let mut inner = self.lock();
        let Some(mark) = inner.players.get(&player).map(|p| p.mark) else {
            debug!(game_id = %self.id, player_id = player, "move from unseated player ignored");
            return MoveResult::Ignored;
        };
        let cell = usize::try_from(position).ok().filter(|&p| p < 9);
        let Some(pos) = cell.filter(|&p| {
            inner.state == GameState::Playing && inner.turn == mark && inner.board[p].is_none()
        }) else {
            debug!(
                game_id = %self.id,
                player_id = player,
                position,
                state = ?inner.state,
                turn = ?inner.turn,
                "move ignored"
            );
            return MoveResult::Ignored;
        };

        inner.board[pos] = Some(mark);
        inner.touch();

        if let Some((winner, cells)) = board::winning_line(&inner.board) {
            inner.state = GameState::Finished;
            inner.winner = Some(winner);
            inner.winning_cells = Some(cells);
            let msg = inner.game_over_message();
            inner.connections.broadcast(&msg);

            let loser = inner.players.keys().copied().find(|&id| id != player);
            info!(game_id = %self.id, player_id = player, ?winner, ?cells, "game won");
            MoveResult::Won {
                winner: player,
                loser,
                cells,
            }
        } else if board::is_full(&inner.board) {
            inner.state = GameState::Finished;
            let msg = inner.game_over_message();
            inner.connections.broadcast(&msg);

            let mut players: Vec<PlayerId> = inner.players.keys().copied().collect();
            players.sort_unstable();
            info!(game_id = %self.id, "game drawn");
            MoveResult::Drawn { players }
        } else {
            inner.turn = board::next_turn(inner.turn);
            let msg = inner.update_message();
            inner.connections.broadcast(&msg);
            MoveResult::Continued
        }
    }

    /// Start over after a finished game. Returns false (and does nothing)
    /// unless the game is finished. With both seats still taken the new
    /// game starts straight away.
    pub fn reset(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != GameState::Finished {
            debug!(game_id = %self.id, state = ?inner.state, "reset ignored");
            return false;
        }

        inner.clear_board();
        if inner.players.len() == 2 {
            inner.state = GameState::Playing;
        }
        inner.touch();
        let msg = inner.update_message();
        inner.connections.broadcast(&msg);

        info!(game_id = %self.id, state = ?inner.state, "game reset");
        true
    }

    /// Unseat a player. Returns true when nobody is left.
    pub fn leave(&self, player: PlayerId) -> bool {
        let mut inner = self.lock();
        inner.connections.unregister(player);
        if inner.players.remove(&player).is_none() {
            return inner.players.is_empty();
        }

        // A game in progress cannot continue with one player.
        if inner.state == GameState::Playing {
            inner.clear_board();
        }
        inner.touch();
        if !inner.players.is_empty() {
            let msg = inner.update_message();
            inner.connections.broadcast(&msg);
        }

        info!(game_id = %self.id, player_id = player, remaining = inner.players.len(), "player left");
        inner.players.is_empty()
    }

    /// Mark the session closed if nobody is seated. Called by the registry
    /// while it holds the map entry, so no join can slip in between.
    pub(crate) fn close_if_empty(&self) -> bool {
        let mut inner = self.lock();
        if inner.players.is_empty() {
            inner.closed = true;
        }
        inner.closed
    }

    /// Close the session if it has been idle for longer than `timeout`,
    /// telling connected players and dropping their channels.
    pub(crate) fn expire_if_idle(&self, now: Instant, timeout: Duration) -> bool {
        let mut inner = self.lock();
        if inner.closed || now.saturating_duration_since(inner.last_activity) <= timeout {
            return false;
        }
        inner.close("Game expired due to inactivity");
        true
    }

    /// Close unconditionally. Connected players get `reason` as an error.
    pub(crate) fn close(&self, reason: &str) {
        let mut inner = self.lock();
        if !inner.closed {
            inner.close(reason);
        }
    }

    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.lock().last_activity) > timeout
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[cfg(test)]
    pub fn player_count(&self) -> usize {
        self.lock().players.len()
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            board: inner.board,
            turn: inner.turn,
            state: inner.state,
            winner: inner.winner,
            winning_cells: inner.winning_cells,
            players: inner.player_infos(),
        }
    }
}
