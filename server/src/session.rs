//! The session entity and its invariants: membership, the hidden location,
//! the round deadline, and the per-player guess ledger. Pure data and
//! validation; every mutation is checked fully before it is applied so a
//! failed operation never leaves the session partially updated.

use shared::{Coordinate, GameError, Guess, Player, SessionState, MAX_PLAYERS};
use std::collections::HashMap;

/// One instance of the guessing game: a hidden location, at most
/// [`MAX_PLAYERS`] members in join order, and at most one guess per member.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// The round's target. Fixed for the session's lifetime.
    pub location: Coordinate,
    pub state: SessionState,
    /// Epoch millis after which guesses are rejected. `None` until the
    /// session goes active; set exactly once.
    pub deadline: Option<u64>,
    /// Members in join order.
    pub players: Vec<Player>,
    /// Keyed by player id. Entries outlive membership: a guess from a player
    /// who has since left stays as a historical record.
    pub guesses: HashMap<u32, Guess>,
}

impl Session {
    pub fn new(id: String, location: Coordinate) -> Self {
        Self {
            id,
            location,
            state: SessionState::Lobby,
            deadline: None,
            players: Vec::new(),
            guesses: HashMap::new(),
        }
    }

    pub fn contains_player(&self, player_id: u32) -> bool {
        self.players.iter().any(|p| p.id == player_id)
    }

    pub fn player_ids(&self) -> Vec<u32> {
        self.players.iter().map(|p| p.id).collect()
    }

    /// Appends a member, preserving join order.
    pub fn add_player(&mut self, player: Player) -> Result<(), GameError> {
        if self.state == SessionState::Closed {
            return Err(GameError::SessionClosed);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(GameError::Full);
        }
        self.players.push(player);
        Ok(())
    }

    /// Removes a member. Their guess, if any, is kept. Returns false if the
    /// player was not a member. Valid in every state; disconnect cleanup is
    /// unconditional.
    pub fn remove_player(&mut self, player_id: u32) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p.id != player_id);
        self.players.len() < before
    }

    /// Lobby -> Active transition. Returns the effective deadline and
    /// whether this call performed the transition; starting an already
    /// active session is idempotent and keeps the original deadline.
    pub fn start(&mut self, deadline: u64) -> Result<(u64, bool), GameError> {
        match self.state {
            SessionState::Closed => Err(GameError::SessionClosed),
            SessionState::Active => match self.deadline {
                Some(existing) => Ok((existing, false)),
                None => Err(GameError::RoundNotStarted),
            },
            SessionState::Lobby => {
                self.state = SessionState::Active;
                self.deadline = Some(deadline);
                Ok((deadline, true))
            }
        }
    }

    /// Records a guess for `player_id`, validating state, deadline,
    /// membership, and uniqueness before touching the ledger.
    pub fn record_guess(
        &mut self,
        player_id: u32,
        coordinate: Coordinate,
        now: u64,
    ) -> Result<(), GameError> {
        if !coordinate.is_valid() {
            return Err(GameError::InvalidCoordinate);
        }
        match self.state {
            SessionState::Closed => return Err(GameError::SessionClosed),
            SessionState::Lobby => return Err(GameError::RoundNotStarted),
            SessionState::Active => {}
        }
        if self.past_deadline(now) {
            return Err(GameError::RoundClosed);
        }
        if !self.contains_player(player_id) {
            return Err(GameError::NotAMember);
        }
        if self.guesses.contains_key(&player_id) {
            return Err(GameError::AlreadySubmitted);
        }

        self.guesses.insert(
            player_id,
            Guess {
                player_id,
                coordinate,
                submitted_at: now,
            },
        );
        Ok(())
    }

    pub fn past_deadline(&self, now: u64) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// True when every current member has a guess on record.
    pub fn all_guessed(&self) -> bool {
        !self.players.is_empty()
            && self.players.iter().all(|p| self.guesses.contains_key(&p.id))
    }

    /// End-of-round condition, evaluated on every guess and by the deadline
    /// watchdog: everyone guessed, or the deadline has passed.
    pub fn should_close(&self, now: u64) -> bool {
        self.state == SessionState::Active && (self.all_guessed() || self.past_deadline(now))
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
