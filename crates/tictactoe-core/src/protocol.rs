use serde::{Deserialize, Serialize};

use crate::board::Mark;

/// Lifecycle of a game session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Waiting,
    Playing,
    Finished,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Position is signed on the wire so out-of-range values decode and get
    /// ignored instead of dropping the connection.
    Move {
        position: i64,
    },
    NewGame,
    #[serde(other)]
    Unknown,
}

/// A seated player as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: i64,
    pub name: String,
    pub avatar_url: Option<String>,
    pub mark: Mark,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Init {
        /// The mark assigned to the receiving connection.
        player: Mark,
        board: Vec<String>,
        turn: Mark,
        state: GameState,
        players: Vec<PlayerInfo>,
    },
    Update {
        board: Vec<String>,
        turn: Mark,
        state: GameState,
        players: Vec<PlayerInfo>,
    },
    #[serde(rename = "gameover")]
    GameOver {
        board: Vec<String>,
        state: GameState,
        /// `None` on a draw.
        winner: Option<Mark>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        winning_cells: Option<[usize; 3]>,
    },
    Error {
        error: String,
    },
}

/// Account returned by `/api/user`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub avatar_url: String,
}

/// Win/loss/draw counters returned by `/api/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStats {
    pub player_id: i64,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

/// Device auth flow response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthResponse {
    pub user_code: String,
    pub verification_uri: String,
    pub interval: u64,
}

/// Auth poll response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum AuthPollResponse {
    Pending,
    Complete { token: String, username: String },
    Expired,
}
