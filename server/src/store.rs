//! In-memory registry of active sessions plus the location provider seam.
//!
//! The store owns every `Session` for its whole lifetime and is only ever
//! touched from the coordination task, so plain `HashMap` access is enough.

use crate::session::Session;
use log::info;
use rand::Rng;
use shared::Coordinate;
use std::collections::HashMap;

/// Length of generated session codes, matching the shareable game codes the
/// clients display.
pub const SESSION_ID_LEN: usize = 6;

const ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of hidden round targets. How a location gets chosen (street-view
/// coverage, curated lists, ...) is the provider's business, not the
/// coordinator's.
pub trait LocationProvider: Send + Sync {
    fn next_location(&mut self) -> Coordinate;
}

/// Default provider: uniform over the valid coordinate ranges.
pub struct RandomLocationProvider;

impl LocationProvider for RandomLocationProvider {
    fn next_location(&mut self) -> Coordinate {
        let mut rng = rand::thread_rng();
        Coordinate::new(rng.gen_range(-90.0..=90.0), rng.gen_range(-180.0..180.0))
    }
}

/// Fixed provider for tests and demos.
pub struct FixedLocationProvider(pub Coordinate);

impl LocationProvider for FixedLocationProvider {
    fn next_location(&mut self) -> Coordinate {
        self.0
    }
}

/// Registry of active sessions keyed by session id.
#[derive(Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Creates a fresh `Lobby` session with a collision-checked id and a
    /// hidden location from the provider.
    pub fn create(&mut self, provider: &mut dyn LocationProvider) -> &mut Session {
        let id = loop {
            let candidate = generate_session_id(&mut rand::thread_rng());
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Session::new(id.clone(), provider.next_location());
        info!("Session {} created", id);
        self.sessions.entry(id).or_insert(session)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Idempotent removal; no-op if absent.
    pub fn delete(&mut self, id: &str) -> bool {
        if self.sessions.remove(id).is_some() {
            info!("Session {} deleted", id);
            true
        } else {
            false
        }
    }

    pub fn all(&self) -> impl Iterator<Item = (&String, &Session)> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn generate_session_id<R: Rng>(rng: &mut R) -> String {
    (0..SESSION_ID_LEN)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}
