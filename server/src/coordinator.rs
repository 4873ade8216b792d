//! The round coordinator: sole mutator of session membership and guesses.
//!
//! Every operation runs on the single coordination task, so mutations
//! against one session are strictly ordered relative to each other. Each
//! operation validates fully before mutating and queues any resulting
//! broadcasts through the [`Broadcaster`] after the state change is applied.

use crate::broadcast::Broadcaster;
use crate::registry::ConnectionRegistry;
use crate::session::Session;
use crate::store::{LocationProvider, SessionStore};
use log::{debug, info};
use shared::{now_millis, Coordinate, GameError, Guess, Packet, Player, SessionState};
use std::time::Duration;

/// Read-only view of a session, handed to result consumers.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub state: SessionState,
    pub players: Vec<Player>,
    pub guesses: Vec<Guess>,
    pub deadline: Option<u64>,
}

pub struct Coordinator {
    store: SessionStore,
    registry: ConnectionRegistry,
    broadcaster: Broadcaster,
    provider: Box<dyn LocationProvider>,
    round_duration: Duration,
}

impl Coordinator {
    pub fn new(
        broadcaster: Broadcaster,
        provider: Box<dyn LocationProvider>,
        round_duration: Duration,
    ) -> Self {
        Self {
            store: SessionStore::new(),
            registry: ConnectionRegistry::new(),
            broadcaster,
            provider,
            round_duration,
        }
    }

    /// Creates a session with the caller as its first member. The creator
    /// always fits in an empty player list, so this only fails if the store
    /// handed back a corrupt session, which the caller reports like any
    /// other rejection.
    pub fn create_session(
        &mut self,
        conn_id: u32,
        display_name: String,
    ) -> Result<(String, Coordinate), GameError> {
        let session = self.store.create(self.provider.as_mut());
        session.add_player(Player::new(conn_id, display_name.clone()))?;
        let session_id = session.id.clone();
        let location = session.location;

        self.registry.associate(conn_id, &session_id);
        info!(
            "Session {} created by {} (connection {})",
            session_id, display_name, conn_id
        );
        Ok((session_id, location))
    }

    /// Admits a member, notifies the existing members, and returns what the
    /// joiner needs to render the round: the hidden target's panorama
    /// location and the deadline, if the round already started.
    pub fn join_session(
        &mut self,
        conn_id: u32,
        session_id: &str,
        display_name: String,
    ) -> Result<(Coordinate, Option<u64>), GameError> {
        let session = self.store.get_mut(session_id).ok_or(GameError::NotFound)?;
        session.add_player(Player::new(conn_id, display_name.clone()))?;

        let location = session.location;
        let deadline = session.deadline;
        let targets = session.player_ids();
        let players = session.players.clone();

        self.registry.associate(conn_id, session_id);
        info!("{} joined session {}", display_name, session_id);

        self.broadcaster.fanout(
            targets,
            Some(conn_id),
            Packet::PlayerJoined {
                session_id: session_id.to_string(),
                players,
            },
        );
        Ok((location, deadline))
    }

    /// Explicit Lobby -> Active trigger. Any current member may start the
    /// round; a second start is idempotent and returns the original
    /// deadline. The bool reports whether this call performed the
    /// transition, so the gateway knows when to arm the deadline watchdog.
    pub fn start_round(
        &mut self,
        conn_id: u32,
        session_id: &str,
    ) -> Result<(u64, bool), GameError> {
        let session = self.store.get_mut(session_id).ok_or(GameError::NotFound)?;
        if !session.contains_player(conn_id) {
            return Err(GameError::NotAMember);
        }

        let candidate = now_millis() + self.round_duration.as_millis() as u64;
        let (deadline, started) = session.start(candidate)?;

        if started {
            let targets = session.player_ids();
            info!(
                "Session {} round started, deadline {}",
                session_id, deadline
            );
            self.broadcaster.fanout(
                targets,
                Some(conn_id),
                Packet::RoundStarted {
                    session_id: session_id.to_string(),
                    deadline,
                },
            );
        }
        Ok((deadline, started))
    }

    /// Records a guess and evaluates the end-of-round condition afterwards,
    /// whether or not the guess was accepted: a rejected late guess still
    /// lets an expired round close promptly.
    pub fn submit_guess(
        &mut self,
        conn_id: u32,
        session_id: &str,
        coordinate: Coordinate,
    ) -> Result<(), GameError> {
        let now = now_millis();
        let result = match self.store.get_mut(session_id) {
            Some(session) => session.record_guess(conn_id, coordinate, now),
            None => return Err(GameError::NotFound),
        };

        if result.is_ok() {
            debug!("Connection {} guessed in session {}", conn_id, session_id);
        }
        self.close_if_due(session_id, now);
        result
    }

    /// Single close-evaluation path, shared by guess submission, disconnect
    /// cleanup, and the deadline watchdog. A call for a session that is
    /// already closed or gone is a safe no-op, so a late-firing watchdog can
    /// never double-close or double-broadcast.
    pub fn close_if_due(&mut self, session_id: &str, now: u64) {
        let session = match self.store.get_mut(session_id) {
            Some(session) => session,
            None => return,
        };
        if !session.should_close(now) {
            return;
        }

        session.state = SessionState::Closed;
        let targets = session.player_ids();
        info!("Session {} round closed", session_id);
        self.broadcaster.fanout(
            targets,
            None,
            Packet::RoundClosed {
                session_id: session_id.to_string(),
            },
        );
    }

    /// Disconnect cleanup: removes the connection from every session it
    /// joined, notifying the remaining members and deleting sessions that
    /// empty out. Unconditional; runs for closed sessions too, and treats an
    /// already-deleted session as already satisfied.
    pub fn handle_disconnect(&mut self, conn_id: u32) {
        let now = now_millis();
        for session_id in self.registry.forget(conn_id) {
            let (removed, remaining, players) = match self.store.get_mut(&session_id) {
                Some(session) => {
                    let removed = session.remove_player(conn_id);
                    (removed, session.players.len(), session.players.clone())
                }
                None => continue,
            };
            if !removed {
                continue;
            }

            info!(
                "Connection {} removed from session {}",
                conn_id, session_id
            );
            if remaining == 0 {
                self.store.delete(&session_id);
                continue;
            }

            self.broadcaster.fanout(
                players.iter().map(|p| p.id).collect(),
                None,
                Packet::PlayerLeft {
                    session_id: session_id.clone(),
                    players,
                },
            );
            // Departure can satisfy the everyone-guessed condition for the
            // members who stayed.
            self.close_if_due(&session_id, now);
        }
    }

    pub fn view(&self, session_id: &str) -> Result<SessionView, GameError> {
        let session = self.store.get(session_id).ok_or(GameError::NotFound)?;
        let mut guesses: Vec<Guess> = session.guesses.values().cloned().collect();
        guesses.sort_by_key(|g| g.submitted_at);
        Ok(SessionView {
            state: session.state,
            players: session.players.clone(),
            guesses,
            deadline: session.deadline,
        })
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.store.get(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }
}
