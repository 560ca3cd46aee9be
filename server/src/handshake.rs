//! Join/rejoin handshake.
//!
//! Turns a freshly accepted socket into an identified, registered
//! participant. Exactly one request type is honored per connection; the
//! first message decides, and everything runs under a single registry
//! write guard so concurrent joins cannot race past the player limit.

use crate::registry::SharedRegistry;
use log::{info, warn};
use shared::Message;

/// Terminal result of a handshake attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Request honored; the session proceeds to steady state.
    Approved,
    /// Request refused. The reply has been queued and the session must
    /// close the connection.
    Declined,
    /// The first message was not a join request. Fatal to the connection,
    /// no reply is owed.
    Violation,
}

/// Applies the first message received on session `index`.
pub async fn process_request(
    registry: &SharedRegistry,
    index: u64,
    request: Message,
) -> HandshakeOutcome {
    match request {
        Message::PlayerJoin => {
            registry
                .mutate(|clients| match clients.allocate_player(index) {
                    Some(identity) => {
                        clients.send_to(index, Message::PlayerJoinApproved(identity));
                        HandshakeOutcome::Approved
                    }
                    None => {
                        info!("declined player join from client {}: slots full", index);
                        clients.send_to(index, Message::PlayerJoinDeclined);
                        HandshakeOutcome::Declined
                    }
                })
                .await
        }

        Message::PlayerRejoin(token) => {
            registry
                .mutate(|clients| {
                    if clients.adopt_rejoin(index, &token) {
                        clients.send_to(index, Message::PlayerRejoinApproved(token));
                        HandshakeOutcome::Approved
                    } else {
                        info!(
                            "declined rejoin from client {}: no eligible slot for the token",
                            index
                        );
                        clients.send_to(index, Message::PlayerRejoinDeclined);
                        HandshakeOutcome::Declined
                    }
                })
                .await
        }

        Message::GraphicsJoin => {
            registry
                .mutate(|clients| match clients.register_graphics(index) {
                    Some(identity) => {
                        clients.send_to(index, Message::GraphicsJoinApproved(identity));
                        HandshakeOutcome::Approved
                    }
                    None => HandshakeOutcome::Violation,
                })
                .await
        }

        other => {
            warn!("client {} sent {:?} before joining", index, other);
            HandshakeOutcome::Violation
        }
    }
}
