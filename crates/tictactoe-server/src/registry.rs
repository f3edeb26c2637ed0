use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};

use tictactoe_core::Mark;

use crate::connections::Outbound;
use crate::identity::{Identity, PlayerId};
use crate::session::{GameSession, JoinError};

/// All live games, keyed by game id.
///
/// Lock order is always map shard first, then session. Sessions are removed
/// only while their shard is held and after they have been marked closed, so
/// a join racing with a removal either lands before it or sees `Closed` and
/// retries against a fresh session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<GameSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `game_id`, creating it on first use.
    pub fn get_or_create(&self, game_id: &str) -> Arc<GameSession> {
        self.sessions
            .entry(game_id.to_string())
            .or_insert_with(|| {
                debug!(game_id, "session created");
                Arc::new(GameSession::new(game_id))
            })
            .clone()
    }

    #[cfg(test)]
    pub fn get(&self, game_id: &str) -> Option<Arc<GameSession>> {
        self.sessions.get(game_id).map(|s| Arc::clone(s.value()))
    }

    /// Look up or create the session and seat the player in it.
    pub fn join(
        &self,
        game_id: &str,
        identity: Identity,
        tx: Outbound,
    ) -> Result<(Arc<GameSession>, Mark), JoinError> {
        loop {
            let session = self.get_or_create(game_id);
            match session.join(identity.clone(), tx.clone()) {
                Ok(mark) => return Ok((session, mark)),
                Err(JoinError::Closed) => {
                    // Removed between lookup and join; drop the stale entry
                    // if it is still there and try again.
                    self.sessions
                        .remove_if(game_id, |_, current| Arc::ptr_eq(current, &session));
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Unseat a player and drop the session once nobody is left.
    pub fn leave(&self, session: &Arc<GameSession>, player: PlayerId) {
        if !session.leave(player) {
            return;
        }
        let removed = self.sessions.remove_if(session.id(), |_, current| {
            Arc::ptr_eq(current, session) && current.close_if_empty()
        });
        if removed.is_some() {
            info!(game_id = %session.id(), "session removed");
        }
    }

    /// Drop a session regardless of who is seated.
    pub fn remove(&self, game_id: &str) -> Option<Arc<GameSession>> {
        self.remove_with(game_id, "Game closed")
    }

    /// Close and drop every session, telling connected players why.
    pub fn close_all(&self, reason: &str) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter_map(|id| self.remove_with(id, reason))
            .count()
    }

    // Closed under the shard lock so a concurrent join either lands first or
    // sees `Closed`.
    fn remove_with(&self, game_id: &str, reason: &str) -> Option<Arc<GameSession>> {
        let (_, session) = self.sessions.remove_if(game_id, |_, session| {
            session.close(reason);
            true
        })?;
        info!(game_id, "session removed");
        Some(session)
    }

    /// Close and drop every session idle for longer than `timeout`.
    /// Returns how many were removed.
    pub fn expire_idle(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_idle(now, timeout))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for game_id in candidates {
            let gone = self
                .sessions
                .remove_if(&game_id, |_, session| session.expire_if_idle(now, timeout));
            if gone.is_some() {
                info!(game_id = %game_id, "session expired");
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use tictactoe_core::{GameState, ServerMessage};
    use tokio::sync::mpsc;

    fn identity(id: PlayerId) -> Identity {
        Identity {
            id,
            name: format!("p{}", id),
            avatar_url: None,
        }
    }

    #[test]
    fn concurrent_lookups_share_one_session() {
        let registry = Arc::new(SessionRegistry::new());
        let sessions: Vec<Arc<GameSession>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    scope.spawn(move || registry.get_or_create("shared"))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), 1);
        assert!(sessions.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn distinct_ids_are_isolated() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (a, _) = registry.join("a", identity(1), tx.clone()).unwrap();
        let (b, _) = registry.join("b", identity(2), tx).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.player_count(), 1);
        assert_eq!(b.player_count(), 1);
        assert_eq!(b.snapshot().state, GameState::Waiting);
    }

    #[test]
    fn last_leave_removes_the_session() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let (session, _) = registry.join("g", identity(1), tx1).unwrap();
        registry.join("g", identity(2), tx2).unwrap();

        registry.leave(&session, 1);
        assert_eq!(registry.len(), 1);
        registry.leave(&session, 2);
        assert!(registry.is_empty());
        assert!(session.is_closed());

        // Same id, brand new game.
        let (tx3, _rx3) = mpsc::unbounded_channel();
        let (fresh, mark) = registry.join("g", identity(3), tx3).unwrap();
        assert!(!Arc::ptr_eq(&fresh, &session));
        assert_eq!(mark, Mark::X);
    }

    #[test]
    fn join_retries_past_a_closed_session() {
        let registry = SessionRegistry::new();
        let stale = registry.get_or_create("g");
        assert!(stale.close_if_empty());

        let (tx, _rx) = mpsc::unbounded_channel();
        let (session, mark) = registry.join("g", identity(1), tx).unwrap();
        assert!(!Arc::ptr_eq(&session, &stale));
        assert_eq!(mark, Mark::X);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn full_game_rejects_third_player() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.join("g", identity(1), tx.clone()).unwrap();
        registry.join("g", identity(2), tx.clone()).unwrap();
        assert_eq!(
            registry.join("g", identity(3), tx).map(|(_, mark)| mark),
            Err(JoinError::Full)
        );
    }

    #[test]
    fn idle_sessions_expire() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (session, _) = registry.join("g", identity(1), tx).unwrap();
        let _ = rx.try_recv();

        assert_eq!(registry.expire_idle(Duration::from_secs(600)), 0);
        assert_eq!(registry.len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(registry.expire_idle(Duration::from_millis(1)), 1);
        assert!(registry.is_empty());
        assert!(session.is_closed());
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::Error {
                error: "Game expired due to inactivity".to_string()
            }
        );
    }

    #[test]
    fn removed_session_turns_late_joiners_to_a_fresh_one() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (session, _) = registry.join("g", identity(1), tx).unwrap();
        let _ = rx.try_recv();

        let removed = registry.remove("g").unwrap();
        assert!(Arc::ptr_eq(&removed, &session));
        assert!(session.is_closed());
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Error { .. })));
        assert!(registry.remove("g").is_none());

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let (fresh, mark) = registry.join("g", identity(2), tx2).unwrap();
        assert!(!Arc::ptr_eq(&fresh, &session));
        assert_eq!(mark, Mark::X);
    }

    #[test]
    fn close_all_empties_the_registry() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (a, _) = registry.join("a", identity(1), tx.clone()).unwrap();
        let (b, _) = registry.join("b", identity(2), tx).unwrap();
        while rx.try_recv().is_ok() {}

        assert_eq!(registry.close_all("Server shutting down"), 2);
        assert!(registry.is_empty());
        assert!(registry.get("a").is_none());
        assert!(a.is_closed() && b.is_closed());
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::Error {
                error: "Server shutting down".to_string()
            }
        );
        assert_eq!(registry.close_all("again"), 0);
    }

    #[test]
    fn simultaneous_joins_fill_exactly_two_seats() {
        let registry = SessionRegistry::new();
        let barrier = Barrier::new(8);

        let results: Vec<Result<Mark, JoinError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (1..=8)
                .map(|id| {
                    let (registry, barrier) = (&registry, &barrier);
                    scope.spawn(move || {
                        let (tx, _rx) = mpsc::unbounded_channel();
                        barrier.wait();
                        registry.join("g", identity(id), tx).map(|(_, mark)| mark)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut marks: Vec<Mark> = results.iter().filter_map(|r| r.ok()).collect();
        marks.sort();
        assert_eq!(marks, vec![Mark::X, Mark::O]);
        assert_eq!(
            results.iter().filter(|r| **r == Err(JoinError::Full)).count(),
            6
        );

        let session = registry.get("g").unwrap();
        assert_eq!(session.player_count(), 2);
        assert_eq!(session.snapshot().state, GameState::Playing);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn join_racing_last_leave_never_lands_in_a_dropped_session() {
        for _ in 0..200 {
            let registry = SessionRegistry::new();
            let (tx1, _rx1) = mpsc::unbounded_channel();
            let (leaving, _) = registry.join("g", identity(1), tx1).unwrap();
            let barrier = Barrier::new(2);

            let joined = std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    registry.leave(&leaving, 1);
                });
                let joiner = scope.spawn(|| {
                    let (tx2, _rx2) = mpsc::unbounded_channel();
                    barrier.wait();
                    registry.join("g", identity(2), tx2).map(|(session, _)| session)
                });
                joiner.join().unwrap()
            })
            .unwrap();

            let live = registry.get("g").expect("joined game must stay registered");
            assert!(Arc::ptr_eq(&live, &joined));
            assert!(!joined.is_closed());
            assert_eq!(joined.player_count(), 1);
            assert_eq!(registry.len(), 1);
        }
    }
}
