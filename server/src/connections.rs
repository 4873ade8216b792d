//! Live connection tracking for the UDP gateway: id assignment, address
//! lookup for response routing, and liveness monitoring so silent
//! connections get the same cleanup as an explicit disconnect.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One live client connection.
#[derive(Debug)]
pub struct Connection {
    pub id: u32,
    pub addr: SocketAddr,
    /// Last time any packet arrived from this address.
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// All live connections, indexed by assigned id. Ids start at 1 and are
/// never reused within a process lifetime, which keeps them stable as
/// opaque player identifiers.
pub struct ConnectionTable {
    connections: HashMap<u32, Connection>,
    next_id: u32,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 1,
            max_connections,
        }
    }

    /// Admits a new connection, returning its id, or `None` at capacity.
    pub fn add(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;

        info!("Connection {} established from {}", id, addr);
        self.connections.insert(id, Connection::new(id, addr));
        Some(id)
    }

    /// Returns true if the connection existed.
    pub fn remove(&mut self, id: u32) -> bool {
        if self.connections.remove(&id).is_some() {
            info!("Connection {} closed", id);
            true
        } else {
            false
        }
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.connections
            .iter()
            .find(|(_, conn)| conn.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn addr_of(&self, id: u32) -> Option<SocketAddr> {
        self.connections.get(&id).map(|conn| conn.addr)
    }

    pub fn touch(&mut self, id: u32) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.touch();
        }
    }

    /// Removes connections silent for longer than `timeout` and returns
    /// their ids so session cleanup can run for each.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for id in &timed_out {
            self.remove(*id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
