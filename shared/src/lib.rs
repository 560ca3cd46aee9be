//! Wire protocol shared between the session server and its clients.
//!
//! Defines the JSON message catalogue, the length-prefixed frame codec,
//! identity token minting/parsing and the tuning constants both sides
//! agree on. Everything that crosses the socket lives here so the server
//! and client crates cannot drift apart.

pub mod codec;

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Socket read chunk size in bytes.
pub const READ_CHUNK_SIZE: usize = 2048;

/// How long a freshly accepted connection gets to complete its handshake.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of random letters appended after the `#` in identity tokens.
pub const ID_SUFFIX_LENGTH: usize = 6;

/// Default number of player clients a session waits for.
pub const N_PLAYER_CLIENTS_NEEDED: usize = 2;

/// Fixed game update tick interval, consumed by the loops driving
/// `send_game`/`get_inputs` on either side.
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(50);

/// Identity prefix marking graphics (spectator) clients.
pub const GRAPHICS_IDENTITY_PREFIX: &str = "x";

/// Application messages, serialized on the wire as
/// `{"type": "...", "value": ...}` with the `value` field omitted for
/// payload-less messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    PlayerJoin,
    PlayerJoinApproved(String),
    PlayerJoinDeclined,
    PlayerRejoin(String),
    PlayerRejoinApproved(String),
    PlayerRejoinDeclined,
    GraphicsJoin,
    GraphicsJoinApproved(String),
    GraphicsJoinDeclined,
    Game(serde_json::Value),
    Inputs(Vec<String>),
    DisconnectionBreak,
}

/// Violations of the framing or message grammar. Fatal to the connection
/// they occur on, never retried.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("oversized frame: {0} bytes")]
    FrameTooLarge(usize),
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
}

const SUFFIX_LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn random_suffix() -> String {
    let mut rng = OsRng;
    (0..ID_SUFFIX_LENGTH)
        .map(|_| SUFFIX_LETTERS[rng.gen_range(0..SUFFIX_LETTERS.len())] as char)
        .collect()
}

/// Mints the identity token for the player occupying `slot`.
///
/// The suffix doubles as the bearer credential for rejoining, so it is
/// drawn from the operating system RNG.
pub fn mint_player_identity(slot: usize) -> String {
    format!("{}#{}", slot, random_suffix())
}

/// Mints an identity token for a graphics client.
pub fn mint_graphics_identity() -> String {
    format!("{}#{}", GRAPHICS_IDENTITY_PREFIX, random_suffix())
}

/// Player slot encoded before the `#`, or `None` for graphics identities
/// and anything else that does not parse.
pub fn identity_slot(identity: &str) -> Option<usize> {
    identity.split_once('#')?.0.parse().ok()
}
