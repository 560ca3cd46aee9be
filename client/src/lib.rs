//! # Session Client Library
//!
//! Client side of the lockstep session layer. A `Client` joins the server
//! as either a player or a graphics (spectator) participant, keeps a
//! background receive task feeding its inbox, and exposes the
//! steady-state API the game loop consumes: `get_game` for the latest
//! authoritative state, `send_inputs` for the local input batch, and
//! `take_disconnection_break`/`is_alive` for session health.
//!
//! Player identities double as rejoin credentials: after a disconnect,
//! calling `Client::connect_player` again with the saved token reclaims
//! the same slot and lets the paused session resume.

pub mod network;
