pub mod board;
pub mod protocol;

pub use board::{Board, EMPTY_BOARD, Mark};
pub use protocol::{ClientMessage, GameState, PlayerInfo, ServerMessage};
