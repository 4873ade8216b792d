//! Connection-to-session membership index, used for disconnect cleanup and
//! fan-out only. Authorization never goes further than "is this connection a
//! member".

use std::collections::{HashMap, HashSet};

/// Many-to-many relation between connection ids and the sessions they have
/// joined.
#[derive(Default)]
pub struct ConnectionRegistry {
    memberships: HashMap<u32, HashSet<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            memberships: HashMap::new(),
        }
    }

    /// Records membership. Idempotent.
    pub fn associate(&mut self, conn_id: u32, session_id: &str) {
        self.memberships
            .entry(conn_id)
            .or_default()
            .insert(session_id.to_string());
    }

    pub fn sessions_for(&self, conn_id: u32) -> HashSet<String> {
        self.memberships.get(&conn_id).cloned().unwrap_or_default()
    }

    /// Removes and returns every association for a connection. Called once
    /// on disconnect, before the caller iterates the sessions for removal.
    pub fn forget(&mut self, conn_id: u32) -> HashSet<String> {
        self.memberships.remove(&conn_id).unwrap_or_default()
    }
}
