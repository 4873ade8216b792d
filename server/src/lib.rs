//! # Session Coordinator Library
//!
//! Server-side core of the location-guessing party game: it creates game
//! sessions, admits players, tracks a synchronized round deadline, collects
//! guesses, decides when a round ends, and fans out state-change events to
//! every participant of a session. Rendering, location selection policy, and
//! client navigation all live elsewhere; this crate only deals in session
//! state and the packets that describe it.
//!
//! ## Architecture
//!
//! All mutations of session state run on a single coordination task that
//! drains an inbound message queue in arrival order, so operations against
//! one session are strictly serialized without per-session locks. Network
//! receive and send, per-session deadline watchdogs, and the connection
//! liveness sweep are independent tokio tasks that talk to the coordination
//! loop over channels. Broadcast delivery is best-effort and can never fail
//! or block a state change.
//!
//! ## Module Organization
//!
//! - [`session`] — the session entity and its invariants; pure validation.
//! - [`store`] — in-memory session registry plus the location provider seam.
//! - [`registry`] — connection-to-session membership index for cleanup.
//! - [`coordinator`] — the Lobby/Active/Closed state machine and the only
//!   code that mutates players and guesses.
//! - [`broadcast`] — fire-and-forget event fan-out.
//! - [`connections`] — gateway connection table with liveness tracking.
//! - [`network`] — UDP gateway, coordination loop, and watchdog tasks.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod connections;
pub mod coordinator;
pub mod network;
pub mod registry;
pub mod session;
pub mod store;
