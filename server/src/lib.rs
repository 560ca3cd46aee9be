//! # Session Server Library
//!
//! Authoritative server side of the lockstep session layer. It accepts a
//! fixed number of player clients plus any number of graphics (spectator)
//! clients over TCP, negotiates identity and reconnection, and relays the
//! authoritative game value against per-player input batches.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! The shared map of connection records: negotiated role and identity,
//! liveness flags, per-connection inbound queue and outbound writer
//! queue. All of it lives behind a single lock so handshakes, session
//! loops and the game loop never race each other's bookkeeping.
//!
//! ### Handshake Module (`handshake`)
//! The join/rejoin state machine. Player joins allocate sequential slots
//! up to capacity; rejoins authenticate with the identity token minted at
//! first join and supersede the dropped record; graphics joins are always
//! admitted.
//!
//! ### Session Module (`session`)
//! The per-connection receive loop: a handshake phase bounded by the join
//! timeout, then steady-state decoding onto the record's inbound queue.
//!
//! ### Network Module (`network`)
//! The listener and the `Server` facade: the handshake-gated acceptor,
//! the disconnection barrier that pauses the whole session until a
//! dropped player rejoins, and the `send_game`/`collect_inputs` relay.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::{JOIN_TIMEOUT, UPDATE_INTERVAL};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind("127.0.0.1:5555", 2, JOIN_TIMEOUT).await?;
//!     server.wait_for_players().await;
//!
//!     let mut ticker = tokio::time::interval(UPDATE_INTERVAL);
//!     loop {
//!         ticker.tick().await;
//!         server.handle_disconnections().await;
//!         let inputs = server.collect_inputs().await;
//!         // ...run the game simulation with `inputs`...
//!         server.send_game(&serde_json::json!({ "inputs": inputs })).await;
//!     }
//! }
//! ```

pub mod handshake;
pub mod network;
pub mod registry;
pub mod session;
