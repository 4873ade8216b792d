//! Best-effort event delivery, decoupled from the coordinator's success
//! path: events are pushed onto an unbounded outbound queue that the network
//! sender task drains. A slow or dead receiver can never block a state
//! mutation, and the coordinator never retries delivery.

use log::error;
use shared::Packet;
use tokio::sync::mpsc;

/// Messages queued for the network sender task.
#[derive(Debug)]
pub enum Outbound {
    /// A direct acknowledgement to one connection.
    Direct { conn_id: u32, packet: Packet },
    /// A session event fanned out to every target connection, optionally
    /// excluding the originator (used for `PlayerJoined`).
    Fanout {
        targets: Vec<u32>,
        exclude: Option<u32>,
        packet: Packet,
    },
}

/// Handle the coordinator and gateway use to queue outbound packets.
#[derive(Clone)]
pub struct Broadcaster {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Broadcaster {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    pub fn send_to(&self, conn_id: u32, packet: Packet) {
        if let Err(e) = self.tx.send(Outbound::Direct { conn_id, packet }) {
            error!("Failed to queue packet for connection {}: {}", conn_id, e);
        }
    }

    pub fn fanout(&self, targets: Vec<u32>, exclude: Option<u32>, packet: Packet) {
        if targets.iter().all(|t| Some(*t) == exclude) {
            return;
        }
        if let Err(e) = self.tx.send(Outbound::Fanout {
            targets,
            exclude,
            packet,
        }) {
            error!("Failed to queue broadcast: {}", e);
        }
    }
}
