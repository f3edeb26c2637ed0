use std::collections::HashMap;

use tokio::sync::mpsc;

use tictactoe_core::ServerMessage;

use crate::identity::PlayerId;

/// Handle to push messages to a connected WebSocket client.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// Outbound channels of the players seated in one session.
///
/// Purely a routing table: losing an entry never changes game state. Sends
/// are non-blocking, so callers may broadcast while holding the session lock.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    channels: HashMap<PlayerId, Outbound>,
}

impl ConnectionManager {
    pub fn register(&mut self, player: PlayerId, tx: Outbound) {
        self.channels.insert(player, tx);
    }

    pub fn unregister(&mut self, player: PlayerId) -> Option<Outbound> {
        self.channels.remove(&player)
    }

    /// Best effort: unknown players and closed channels are skipped.
    pub fn send(&self, player: PlayerId, msg: ServerMessage) -> bool {
        self.channels
            .get(&player)
            .is_some_and(|tx| tx.send(msg).is_ok())
    }

    /// Send to every registered player. Returns how many deliveries succeeded.
    pub fn broadcast(&self, msg: &ServerMessage) -> usize {
        self.broadcast_except(None, msg)
    }

    pub fn broadcast_except(&self, skip: Option<PlayerId>, msg: &ServerMessage) -> usize {
        self.channels
            .iter()
            .filter(|(id, _)| Some(**id) != skip)
            .filter(|(_, tx)| tx.send(msg.clone()).is_ok())
            .count()
    }

    /// Drop every channel so the owning connection loops see their receivers close.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
