//! UDP gateway and coordination loop.
//!
//! All session mutations funnel through one task that drains the inbound
//! queue in arrival order, which gives every session single-writer
//! serialization for free. Receiving, sending, deadline watchdogs, and the
//! liveness sweep run as separate spawned tasks that communicate with the
//! coordination loop over channels.

use crate::broadcast::{Broadcaster, Outbound};
use crate::connections::ConnectionTable;
use crate::coordinator::Coordinator;
use crate::store::RandomLocationProvider;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{now_millis, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages processed by the coordination loop, in arrival order.
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    /// A connection went silent past the liveness timeout; the table entry
    /// is already gone, session cleanup still has to run.
    ConnectionTimeout {
        conn_id: u32,
    },
    /// A round deadline elapsed. Harmless for sessions already closed or
    /// deleted.
    RoundDeadline {
        session_id: String,
    },
    #[allow(dead_code)]
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Length of a round, from `StartRound` to the deadline.
    pub round_duration: Duration,
    /// Connection capacity of the gateway (not of a single session).
    pub max_connections: usize,
    /// How long a connection may stay silent before it is treated as
    /// disconnected.
    pub connection_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(300),
            max_connections: 64,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// The session server: gateway plus coordination loop.
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionTable>>,
    coordinator: Coordinator,
    broadcaster: Broadcaster,
    connection_timeout: Duration,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: ServerConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let broadcaster = Broadcaster::new(outbound_tx);

        Ok(Server {
            socket,
            connections: Arc::new(RwLock::new(ConnectionTable::new(config.max_connections))),
            coordinator: Coordinator::new(
                broadcaster.clone(),
                Box::new(RandomLocationProvider),
                config.round_duration,
            ),
            broadcaster,
            connection_timeout: config.connection_timeout,
            server_tx,
            server_rx,
            outbound_rx,
        })
    }

    /// The bound address; lets tests run against an ephemeral port.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    /// Spawns the task that continuously listens for incoming packets.
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to coordination loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the task that drains the outbound queue. Delivery is
    /// best-effort: failures are logged and never reported back.
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let mut outbound_rx = std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    Outbound::Direct { conn_id, packet } => {
                        let addr = {
                            let connections_guard = connections.read().await;
                            connections_guard.addr_of(conn_id)
                        };

                        match addr {
                            Some(addr) => {
                                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await
                                {
                                    error!("Failed to send to connection {}: {}", conn_id, e);
                                }
                            }
                            None => {
                                debug!("Dropping packet for departed connection {}", conn_id)
                            }
                        }
                    }
                    Outbound::Fanout {
                        targets,
                        exclude,
                        packet,
                    } => {
                        let resolved: Vec<(u32, SocketAddr)> = {
                            let connections_guard = connections.read().await;
                            targets
                                .iter()
                                .filter(|conn_id| Some(**conn_id) != exclude)
                                .filter_map(|conn_id| {
                                    connections_guard.addr_of(*conn_id).map(|a| (*conn_id, a))
                                })
                                .collect()
                        };

                        for (conn_id, addr) in resolved {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to connection {}: {}", conn_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns the liveness sweep: silent connections get the same cleanup
    /// path as an explicit disconnect.
    fn spawn_timeout_checker(&self) {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();
        let timeout = self.connection_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut connections_guard = connections.write().await;
                    connections_guard.check_timeouts(timeout)
                };

                for conn_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ConnectionTimeout { conn_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    /// Arms the per-session deadline watchdog. The watchdog reuses the same
    /// close-evaluation path as guess submission; firing late for a session
    /// that already closed or vanished is a no-op.
    fn spawn_deadline_watchdog(&self, session_id: String, deadline: u64) {
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let wait = deadline.saturating_sub(now_millis());
            tokio::time::sleep(Duration::from_millis(wait)).await;
            if let Err(e) = server_tx.send(ServerMessage::RoundDeadline { session_id }) {
                debug!("Deadline watchdog fired after shutdown: {}", e);
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Replies sent before a connection id exists (connect handshake and
    /// refusals) go straight to the source address.
    async fn send_unconnected(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = Self::send_packet_impl(&self.socket, packet, addr).await {
            error!("Failed to send to {}: {}", addr, e);
        }
    }

    async fn handle_connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            let refusal = Packet::Disconnected {
                reason: "Protocol version mismatch".to_string(),
            };
            self.send_unconnected(&refusal, addr).await;
            return;
        }

        // A reconnect from the same address replaces the old connection.
        let existing = {
            let connections = self.connections.read().await;
            connections.find_by_addr(addr)
        };
        if let Some(existing_id) = existing {
            info!("Replacing existing connection {} from {}", existing_id, addr);
            {
                let mut connections = self.connections.write().await;
                connections.remove(existing_id);
            }
            self.coordinator.handle_disconnect(existing_id);
        }

        let conn_id = {
            let mut connections = self.connections.write().await;
            connections.add(addr)
        };

        match conn_id {
            Some(client_id) => {
                self.send_unconnected(&Packet::Connected { client_id }, addr)
                    .await;
            }
            None => {
                let refusal = Packet::Disconnected {
                    reason: "Server full".to_string(),
                };
                self.send_unconnected(&refusal, addr).await;
            }
        }
    }

    /// Translates one inbound request into a coordinator call and queues the
    /// acknowledgement for the originating connection. Broadcasts to other
    /// members were already queued by the coordinator before the ack.
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect { client_version } = packet {
            self.handle_connect(client_version, addr).await;
            return;
        }

        let conn_id = {
            let connections = self.connections.read().await;
            connections.find_by_addr(addr)
        };
        let conn_id = match conn_id {
            Some(id) => id,
            None => {
                warn!("Ignoring packet from unknown connection at {}", addr);
                return;
            }
        };
        {
            let mut connections = self.connections.write().await;
            connections.touch(conn_id);
        }

        match packet {
            Packet::Heartbeat { .. } => {
                // The touch above is the whole point.
            }

            Packet::CreateSession { display_name } => {
                match self.coordinator.create_session(conn_id, display_name) {
                    Ok((session_id, location)) => self.broadcaster.send_to(
                        conn_id,
                        Packet::SessionCreated {
                            session_id,
                            location,
                        },
                    ),
                    Err(error) => self.broadcaster.send_to(
                        conn_id,
                        Packet::RequestFailed {
                            session_id: String::new(),
                            error,
                        },
                    ),
                }
            }

            Packet::JoinSession {
                session_id,
                display_name,
            } => {
                match self
                    .coordinator
                    .join_session(conn_id, &session_id, display_name)
                {
                    Ok((location, deadline)) => self.broadcaster.send_to(
                        conn_id,
                        Packet::SessionJoined {
                            session_id,
                            location,
                            deadline,
                        },
                    ),
                    Err(error) => self
                        .broadcaster
                        .send_to(conn_id, Packet::RequestFailed { session_id, error }),
                }
            }

            Packet::StartRound { session_id } => {
                match self.coordinator.start_round(conn_id, &session_id) {
                    Ok((deadline, started)) => {
                        self.broadcaster.send_to(
                            conn_id,
                            Packet::RoundStarted {
                                session_id: session_id.clone(),
                                deadline,
                            },
                        );
                        if started {
                            self.spawn_deadline_watchdog(session_id, deadline);
                        }
                    }
                    Err(error) => self
                        .broadcaster
                        .send_to(conn_id, Packet::RequestFailed { session_id, error }),
                }
            }

            Packet::SubmitGuess {
                session_id,
                coordinate,
            } => {
                match self
                    .coordinator
                    .submit_guess(conn_id, &session_id, coordinate)
                {
                    Ok(()) => self
                        .broadcaster
                        .send_to(conn_id, Packet::GuessAccepted { session_id }),
                    Err(error) => self
                        .broadcaster
                        .send_to(conn_id, Packet::RequestFailed { session_id, error }),
                }
            }

            Packet::GetSession { session_id } => match self.coordinator.view(&session_id) {
                Ok(view) => self.broadcaster.send_to(
                    conn_id,
                    Packet::SessionSnapshot {
                        session_id,
                        state: view.state,
                        players: view.players,
                        guesses: view.guesses,
                        deadline: view.deadline,
                    },
                ),
                Err(error) => self
                    .broadcaster
                    .send_to(conn_id, Packet::RequestFailed { session_id, error }),
            },

            Packet::Disconnect => {
                self.coordinator.handle_disconnect(conn_id);
                let mut connections = self.connections.write().await;
                connections.remove(conn_id);
            }

            _ => {
                warn!("Unexpected packet type from connection {}", conn_id);
            }
        }
    }

    /// The coordination loop. Processes messages strictly in arrival order,
    /// which is the whole serialization story for session state.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await;
                }
                ServerMessage::ConnectionTimeout { conn_id } => {
                    info!("Connection {} timed out", conn_id);
                    self.coordinator.handle_disconnect(conn_id);
                }
                ServerMessage::RoundDeadline { session_id } => {
                    self.coordinator.close_if_due(&session_id, now_millis());
                }
                ServerMessage::Shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
