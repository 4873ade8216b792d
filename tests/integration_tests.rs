//! Integration tests for the session coordinator.
//!
//! These tests run a real server on an ephemeral UDP port and drive it with
//! bincode-encoded packets, validating the request/ack surface and the
//! broadcast fan-out end to end.

use bincode::{deserialize, serialize};
use server::network::{Server, ServerConfig};
use shared::{Coordinate, GameError, Packet, SessionState};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Binds a server on an ephemeral port, runs it in the background, and
/// returns its address.
async fn spawn_server(config: ServerConfig) -> SocketAddr {
    let mut server = Server::new("127.0.0.1:0", config)
        .await
        .expect("failed to bind server");
    let addr = server.local_addr().expect("no local addr");
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

struct TestClient {
    socket: UdpSocket,
    server: SocketAddr,
    client_id: u32,
}

impl TestClient {
    /// Performs the connect handshake and returns a ready client.
    async fn connect(server: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("failed to bind client socket");
        let mut client = TestClient {
            socket,
            server,
            client_id: 0,
        };

        client.send(&Packet::Connect { client_version: 1 }).await;
        match client.recv().await {
            Packet::Connected { client_id } => client.client_id = client_id,
            other => panic!("Expected Connected, got {:?}", other),
        }
        client
    }

    async fn send(&self, packet: &Packet) {
        let data = serialize(packet).expect("serialize failed");
        self.socket
            .send_to(&data, self.server)
            .await
            .expect("send failed");
    }

    async fn recv(&self) -> Packet {
        let mut buf = [0u8; 2048];
        let (len, _) = timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for packet")
            .expect("socket error");
        deserialize(&buf[..len]).expect("failed to decode packet")
    }

    /// Receives with a longer deadline, for watchdog-driven events.
    async fn recv_within(&self, limit: Duration) -> Packet {
        let mut buf = [0u8; 2048];
        let (len, _) = timeout(limit, self.socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for packet")
            .expect("socket error");
        deserialize(&buf[..len]).expect("failed to decode packet")
    }

    async fn request(&self, packet: &Packet) -> Packet {
        self.send(packet).await;
        self.recv().await
    }

    /// Asserts nothing arrives for a short window.
    async fn expect_silence(&self) {
        let mut buf = [0u8; 2048];
        let result = timeout(Duration::from_millis(300), self.socket.recv_from(&mut buf)).await;
        assert!(result.is_err(), "expected no packet, but one arrived");
    }

    async fn create_session(&self, name: &str) -> String {
        match self
            .request(&Packet::CreateSession {
                display_name: name.to_string(),
            })
            .await
        {
            Packet::SessionCreated { session_id, .. } => session_id,
            other => panic!("Expected SessionCreated, got {:?}", other),
        }
    }

    async fn join_session(&self, session_id: &str, name: &str) -> Packet {
        self.request(&Packet::JoinSession {
            session_id: session_id.to_string(),
            display_name: name.to_string(),
        })
        .await
    }

    async fn snapshot(&self, session_id: &str) -> Packet {
        self.request(&Packet::GetSession {
            session_id: session_id.to_string(),
        })
        .await
    }
}

/// SESSION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// A fresh session is a lobby containing only its creator.
    #[tokio::test]
    async fn create_then_get_round_trip() {
        let server = spawn_server(ServerConfig::default()).await;
        let alice = TestClient::connect(server).await;

        let session_id = alice.create_session("Alice").await;
        assert_eq!(session_id.len(), 6);

        match alice.snapshot(&session_id).await {
            Packet::SessionSnapshot {
                state,
                players,
                guesses,
                deadline,
                ..
            } => {
                assert_eq!(state, SessionState::Lobby);
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].name, "Alice");
                assert!(guesses.is_empty());
                assert_eq!(deadline, None);
            }
            other => panic!("Expected SessionSnapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn join_unknown_session_fails() {
        let server = spawn_server(ServerConfig::default()).await;
        let bob = TestClient::connect(server).await;

        match bob.join_session("NOSUCH", "Bob").await {
            Packet::RequestFailed { error, .. } => assert_eq!(error, GameError::NotFound),
            other => panic!("Expected RequestFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn join_reveals_location_and_notifies_members() {
        let server = spawn_server(ServerConfig::default()).await;
        let alice = TestClient::connect(server).await;
        let bob = TestClient::connect(server).await;

        let session_id = alice.create_session("Alice").await;

        match bob.join_session(&session_id, "Bob").await {
            Packet::SessionJoined {
                location, deadline, ..
            } => {
                assert!(location.is_valid());
                assert_eq!(deadline, None);
            }
            other => panic!("Expected SessionJoined, got {:?}", other),
        }

        // Only the existing member is notified, not the joiner.
        match alice.recv().await {
            Packet::PlayerJoined { players, .. } => {
                assert_eq!(players.len(), 2);
                assert_eq!(players[1].name, "Bob");
            }
            other => panic!("Expected PlayerJoined, got {:?}", other),
        }
        bob.expect_silence().await;
    }

    #[tokio::test]
    async fn protocol_version_mismatch_is_refused() {
        let server = spawn_server(ServerConfig::default()).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let data = serialize(&Packet::Connect { client_version: 99 }).unwrap();
        socket.send_to(&data, server).await.unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = timeout(RECV_TIMEOUT, socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        match deserialize::<Packet>(&buf[..len]).unwrap() {
            Packet::Disconnected { reason } => assert!(reason.contains("version")),
            other => panic!("Expected Disconnected, got {:?}", other),
        }
    }
}

/// ROUND FLOW TESTS
mod round_tests {
    use super::*;

    /// Scenario A: two members, both guess, exactly one round-closed event
    /// and exactly two recorded guesses.
    #[tokio::test]
    async fn all_guesses_close_the_round() {
        let server = spawn_server(ServerConfig::default()).await;
        let alice = TestClient::connect(server).await;
        let bob = TestClient::connect(server).await;

        let session_id = alice.create_session("Alice").await;
        bob.join_session(&session_id, "Bob").await;
        alice.recv().await; // PlayerJoined

        match alice
            .request(&Packet::StartRound {
                session_id: session_id.clone(),
            })
            .await
        {
            Packet::RoundStarted { deadline, .. } => assert!(deadline > 0),
            other => panic!("Expected RoundStarted, got {:?}", other),
        }
        // Non-starters learn the deadline via broadcast.
        match bob.recv().await {
            Packet::RoundStarted { .. } => {}
            other => panic!("Expected RoundStarted broadcast, got {:?}", other),
        }

        match alice
            .request(&Packet::SubmitGuess {
                session_id: session_id.clone(),
                coordinate: Coordinate::new(10.0, 10.0),
            })
            .await
        {
            Packet::GuessAccepted { .. } => {}
            other => panic!("Expected GuessAccepted, got {:?}", other),
        }

        // Bob's guess completes the round; he receives both the close event
        // and his ack, in either order.
        bob.send(&Packet::SubmitGuess {
            session_id: session_id.clone(),
            coordinate: Coordinate::new(10.0, 10.0),
        })
        .await;
        let first = bob.recv().await;
        let second = bob.recv().await;
        let got_close = [&first, &second]
            .iter()
            .any(|p| matches!(p, Packet::RoundClosed { .. }));
        let got_ack = [&first, &second]
            .iter()
            .any(|p| matches!(p, Packet::GuessAccepted { .. }));
        assert!(got_close && got_ack, "got {:?} and {:?}", first, second);

        // Exactly one close event for Alice.
        match alice.recv().await {
            Packet::RoundClosed { .. } => {}
            other => panic!("Expected RoundClosed, got {:?}", other),
        }
        alice.expect_silence().await;

        match alice.snapshot(&session_id).await {
            Packet::SessionSnapshot {
                state, guesses, ..
            } => {
                assert_eq!(state, SessionState::Closed);
                assert_eq!(guesses.len(), 2);
            }
            other => panic!("Expected SessionSnapshot, got {:?}", other),
        }
    }

    /// Scenario B: a round with zero guesses still closes at the deadline,
    /// driven only by the watchdog.
    #[tokio::test]
    async fn deadline_closes_round_without_guesses() {
        let config = ServerConfig {
            round_duration: Duration::from_millis(500),
            ..ServerConfig::default()
        };
        let server = spawn_server(config).await;
        let alice = TestClient::connect(server).await;

        let session_id = alice.create_session("Alice").await;
        alice
            .request(&Packet::StartRound {
                session_id: session_id.clone(),
            })
            .await;

        match alice.recv_within(Duration::from_secs(3)).await {
            Packet::RoundClosed { .. } => {}
            other => panic!("Expected RoundClosed, got {:?}", other),
        }
        alice.expect_silence().await;

        match alice.snapshot(&session_id).await {
            Packet::SessionSnapshot { state, guesses, .. } => {
                assert_eq!(state, SessionState::Closed);
                assert!(guesses.is_empty());
            }
            other => panic!("Expected SessionSnapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn late_guess_is_rejected() {
        let config = ServerConfig {
            round_duration: Duration::ZERO,
            ..ServerConfig::default()
        };
        let server = spawn_server(config).await;
        let alice = TestClient::connect(server).await;

        let session_id = alice.create_session("Alice").await;
        alice
            .request(&Packet::StartRound {
                session_id: session_id.clone(),
            })
            .await;

        // The zero-length round is already past its deadline. The rejection
        // kind depends on whether the watchdog formally closed the session
        // first; either way the guess is refused and never recorded.
        alice
            .send(&Packet::SubmitGuess {
                session_id: session_id.clone(),
                coordinate: Coordinate::new(10.0, 10.0),
            })
            .await;
        let mut saw_rejection = false;
        for _ in 0..2 {
            match alice.recv_within(Duration::from_secs(3)).await {
                Packet::RequestFailed { error, .. } => {
                    assert!(
                        error == GameError::RoundClosed || error == GameError::SessionClosed,
                        "unexpected rejection kind {:?}",
                        error
                    );
                    saw_rejection = true;
                }
                Packet::RoundClosed { .. } => {}
                other => panic!("Unexpected packet {:?}", other),
            }
        }
        assert!(saw_rejection);

        match alice.snapshot(&session_id).await {
            Packet::SessionSnapshot { guesses, .. } => assert!(guesses.is_empty()),
            other => panic!("Expected SessionSnapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_guess_rejected_first_preserved() {
        let server = spawn_server(ServerConfig::default()).await;
        let alice = TestClient::connect(server).await;
        let bob = TestClient::connect(server).await;

        let session_id = alice.create_session("Alice").await;
        bob.join_session(&session_id, "Bob").await;
        alice.recv().await; // PlayerJoined
        alice
            .request(&Packet::StartRound {
                session_id: session_id.clone(),
            })
            .await;
        bob.recv().await; // RoundStarted

        alice
            .request(&Packet::SubmitGuess {
                session_id: session_id.clone(),
                coordinate: Coordinate::new(10.0, 10.0),
            })
            .await;

        match alice
            .request(&Packet::SubmitGuess {
                session_id: session_id.clone(),
                coordinate: Coordinate::new(-45.0, 60.0),
            })
            .await
        {
            Packet::RequestFailed { error, .. } => {
                assert_eq!(error, GameError::AlreadySubmitted)
            }
            other => panic!("Expected RequestFailed, got {:?}", other),
        }

        match alice.snapshot(&session_id).await {
            Packet::SessionSnapshot { guesses, .. } => {
                assert_eq!(guesses.len(), 1);
                assert_eq!(guesses[0].coordinate, Coordinate::new(10.0, 10.0));
            }
            other => panic!("Expected SessionSnapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn out_of_range_guess_rejected() {
        let server = spawn_server(ServerConfig::default()).await;
        let alice = TestClient::connect(server).await;

        let session_id = alice.create_session("Alice").await;
        alice
            .request(&Packet::StartRound {
                session_id: session_id.clone(),
            })
            .await;

        match alice
            .request(&Packet::SubmitGuess {
                session_id: session_id.clone(),
                coordinate: Coordinate::new(91.0, 200.0),
            })
            .await
        {
            Packet::RequestFailed { error, .. } => {
                assert_eq!(error, GameError::InvalidCoordinate)
            }
            other => panic!("Expected RequestFailed, got {:?}", other),
        }
    }
}

/// MEMBERSHIP TESTS
mod membership_tests {
    use super::*;

    /// Scenario C: a ninth join is refused without side effects.
    #[tokio::test]
    async fn full_session_rejects_join() {
        let server = spawn_server(ServerConfig::default()).await;
        let host = TestClient::connect(server).await;
        let session_id = host.create_session("host").await;

        let mut members = Vec::new();
        for i in 0..7 {
            let member = TestClient::connect(server).await;
            match member.join_session(&session_id, &format!("player-{}", i)).await {
                Packet::SessionJoined { .. } => {}
                other => panic!("Expected SessionJoined, got {:?}", other),
            }
            host.recv().await; // PlayerJoined for each admit
            members.push(member);
        }

        let latecomer = TestClient::connect(server).await;
        match latecomer.join_session(&session_id, "latecomer").await {
            Packet::RequestFailed { error, .. } => assert_eq!(error, GameError::Full),
            other => panic!("Expected RequestFailed, got {:?}", other),
        }

        // No broadcast accompanies the rejection.
        host.expect_silence().await;

        match host.snapshot(&session_id).await {
            Packet::SessionSnapshot { players, .. } => assert_eq!(players.len(), 8),
            other => panic!("Expected SessionSnapshot, got {:?}", other),
        }
    }

    /// Scenario D: a disconnecting player's guess survives; the remainder
    /// get a member list without them.
    #[tokio::test]
    async fn guess_survives_disconnect() {
        let server = spawn_server(ServerConfig::default()).await;
        let alice = TestClient::connect(server).await;
        let bob = TestClient::connect(server).await;

        let session_id = alice.create_session("Alice").await;
        bob.join_session(&session_id, "Bob").await;
        alice.recv().await; // PlayerJoined
        alice
            .request(&Packet::StartRound {
                session_id: session_id.clone(),
            })
            .await;
        bob.recv().await; // RoundStarted

        alice
            .request(&Packet::SubmitGuess {
                session_id: session_id.clone(),
                coordinate: Coordinate::new(10.0, 10.0),
            })
            .await;
        let alice_id = alice.client_id;
        alice.send(&Packet::Disconnect).await;

        match bob.recv().await {
            Packet::PlayerLeft { players, .. } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].name, "Bob");
            }
            other => panic!("Expected PlayerLeft, got {:?}", other),
        }

        match bob.snapshot(&session_id).await {
            Packet::SessionSnapshot {
                players, guesses, ..
            } => {
                assert_eq!(players.len(), 1);
                assert_eq!(guesses.len(), 1);
                assert_eq!(guesses[0].player_id, alice_id);
            }
            other => panic!("Expected SessionSnapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn last_disconnect_deletes_session() {
        let server = spawn_server(ServerConfig::default()).await;
        let alice = TestClient::connect(server).await;
        let session_id = alice.create_session("Alice").await;

        alice.send(&Packet::Disconnect).await;

        // A fresh connection can no longer find the session.
        let bob = TestClient::connect(server).await;
        match bob.join_session(&session_id, "Bob").await {
            Packet::RequestFailed { error, .. } => assert_eq!(error, GameError::NotFound),
            other => panic!("Expected RequestFailed, got {:?}", other),
        }
    }

    /// A silent connection is cleaned up like an explicit disconnect.
    #[tokio::test]
    async fn timed_out_connection_is_cleaned_up() {
        let config = ServerConfig {
            connection_timeout: Duration::from_secs(1),
            ..ServerConfig::default()
        };
        let server = spawn_server(config).await;
        let alice = TestClient::connect(server).await;
        let session_id = alice.create_session("Alice").await;

        // Go silent past the timeout, through at least one sweep.
        tokio::time::sleep(Duration::from_secs(3)).await;

        let bob = TestClient::connect(server).await;
        match bob.join_session(&session_id, "Bob").await {
            Packet::RequestFailed { error, .. } => assert_eq!(error, GameError::NotFound),
            other => panic!("Expected RequestFailed, got {:?}", other),
        }
    }
}
