//! Wire protocol and domain types shared between the session server and its
//! clients: coordinates, players, guesses, the session state machine labels,
//! the error taxonomy, and the bincode-serialized packet set.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Protocol version clients must present in `Packet::Connect`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Hard cap on session membership.
pub const MAX_PLAYERS: usize = 8;

/// Mean earth radius used for great-circle distance, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are within valid geographic range.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance to `other` in kilometres (haversine).
    ///
    /// The coordinator never ranks guesses itself; this is here so result
    /// consumers can score a round from a session snapshot.
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_KM * c
    }
}

/// A session member. The id is the opaque connection identifier assigned by
/// the server at connect time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    pub id: u32,
    pub name: String,
}

impl Player {
    pub fn new(id: u32, name: String) -> Self {
        Self { id, name }
    }
}

/// One player's guess for a round. Recorded at most once per player.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Guess {
    pub player_id: u32,
    pub coordinate: Coordinate,
    /// Epoch milliseconds at acceptance; audit and tie-break only.
    pub submitted_at: u64,
}

/// Session lifecycle. Only ever advances forward.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Lobby,
    Active,
    Closed,
}

/// Failure kinds reported to the originating connection. Never broadcast.
#[derive(Debug, Error, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum GameError {
    #[error("session not found")]
    NotFound,
    #[error("session is full")]
    Full,
    #[error("session is closed")]
    SessionClosed,
    #[error("round deadline has passed")]
    RoundClosed,
    #[error("round has not started")]
    RoundNotStarted,
    #[error("not a member of this session")]
    NotAMember,
    #[error("guess already submitted")]
    AlreadySubmitted,
    #[error("coordinate out of range")]
    InvalidCoordinate,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Client -> server requests
    Connect {
        client_version: u32,
    },
    Heartbeat {
        timestamp: u64,
    },
    CreateSession {
        display_name: String,
    },
    JoinSession {
        session_id: String,
        display_name: String,
    },
    StartRound {
        session_id: String,
    },
    SubmitGuess {
        session_id: String,
        coordinate: Coordinate,
    },
    GetSession {
        session_id: String,
    },
    Disconnect,

    // Server -> client acknowledgements
    Connected {
        client_id: u32,
    },
    Disconnected {
        reason: String,
    },
    SessionCreated {
        session_id: String,
        location: Coordinate,
    },
    SessionJoined {
        session_id: String,
        location: Coordinate,
        deadline: Option<u64>,
    },
    RoundStarted {
        session_id: String,
        deadline: u64,
    },
    GuessAccepted {
        session_id: String,
    },
    SessionSnapshot {
        session_id: String,
        state: SessionState,
        players: Vec<Player>,
        guesses: Vec<Guess>,
        deadline: Option<u64>,
    },
    RequestFailed {
        session_id: String,
        error: GameError,
    },

    // Server -> session members, best-effort fan-out
    PlayerJoined {
        session_id: String,
        players: Vec<Player>,
    },
    PlayerLeft {
        session_id: String,
        players: Vec<Player>,
    },
    RoundClosed {
        session_id: String,
    },
}
