//! Client-side session.
//!
//! A background receive task decodes frames onto a shared inbox; the join
//! flow and the steady-state API (`get_game`, `send_inputs`) consume it.
//! Outbound traffic goes through a writer task so callers never block on
//! the socket.

use log::{info, warn};
use shared::codec::{self, FrameDecoder};
use shared::{Message, READ_CHUNK_SIZE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};

/// Why joining a session failed. Declines are ordinary results here, not
/// panics: the caller decides whether to retry, switch roles or give up.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("{request} declined by server")]
    Declined { request: &'static str },
    #[error("connection to server lost")]
    ConnectionLost,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Inbox shared between the receive task and the caller-facing API.
#[derive(Debug, Default)]
struct Inbox {
    messages: Mutex<Vec<Message>>,
    alive: AtomicBool,
    changed: Notify,
}

/// A joined session: player or graphics, decided by the constructor used.
pub struct Client {
    identity: String,
    inbox: Arc<Inbox>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Client {
    /// Connects and joins as a player. Passing the identity token from an
    /// earlier session reclaims that slot instead of requesting a new one.
    pub async fn connect_player(addr: &str, rejoin_token: Option<String>) -> Result<Self, JoinError> {
        let request = match rejoin_token {
            Some(token) => Message::PlayerRejoin(token),
            None => Message::PlayerJoin,
        };
        Self::connect(addr, request).await
    }

    /// Connects and joins as a graphics (spectator) client.
    pub async fn connect_graphics(addr: &str) -> Result<Self, JoinError> {
        Self::connect(addr, Message::GraphicsJoin).await
    }

    async fn connect(addr: &str, request: Message) -> Result<Self, JoinError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();

        let inbox = Arc::new(Inbox::default());
        inbox.alive.store(true, Ordering::SeqCst);

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        spawn_writer(writer, outbound_rx);
        tokio::spawn(receive_loop(reader, Arc::clone(&inbox)));

        outbound
            .send(request.clone())
            .map_err(|_| JoinError::ConnectionLost)?;
        let identity = wait_for_join_reply(&inbox, &request).await?;
        info!("joined as {}", identity);

        Ok(Client {
            identity,
            inbox,
            outbound,
        })
    }

    /// The identity token negotiated at join time. Player tokens are the
    /// credential for a later rejoin, so callers should hold on to them.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// False once the receive loop has observed the connection dying. The
    /// caller is expected to restart the join flow with its saved token.
    pub fn is_alive(&self) -> bool {
        self.inbox.alive.load(Ordering::SeqCst)
    }

    /// Latest authoritative game value, if any arrived since the last
    /// call. Stale intermediate states are discarded.
    pub async fn get_game(&self) -> Option<serde_json::Value> {
        let mut messages = self.inbox.messages.lock().await;
        drain_latest_game(&mut messages)
    }

    /// Queues an input batch for the server. Transport failures are not
    /// reported here; they surface through `is_alive` instead.
    pub fn send_inputs(&self, tokens: Vec<String>) {
        let _ = self.outbound.send(Message::Inputs(tokens));
    }

    /// True when the server announced a pause for a dropped player since
    /// the last call. The session resumes on its own once the player
    /// rejoins; this only lets the caller surface the pause.
    pub async fn take_disconnection_break(&self) -> bool {
        let mut messages = self.inbox.messages.lock().await;
        let before = messages.len();
        messages.retain(|message| !matches!(message, Message::DisconnectionBreak));
        messages.len() != before
    }
}

/// Removes every queued `GAME` message, returning the newest value.
fn drain_latest_game(messages: &mut Vec<Message>) -> Option<serde_json::Value> {
    let mut latest = None;
    messages.retain_mut(|message| match message {
        Message::Game(value) => {
            latest = Some(std::mem::take(value));
            false
        }
        _ => true,
    });
    latest
}

/// Reply that terminates the join wait for the request that was sent.
enum JoinReply {
    Approved(String),
    Declined,
}

fn match_reply(request: &Message, reply: &Message) -> Option<JoinReply> {
    match (request, reply) {
        (Message::PlayerJoin, Message::PlayerJoinApproved(identity))
        | (Message::PlayerRejoin(_), Message::PlayerRejoinApproved(identity))
        | (Message::GraphicsJoin, Message::GraphicsJoinApproved(identity)) => {
            Some(JoinReply::Approved(identity.clone()))
        }
        (Message::PlayerJoin, Message::PlayerJoinDeclined)
        | (Message::PlayerRejoin(_), Message::PlayerRejoinDeclined)
        | (Message::GraphicsJoin, Message::GraphicsJoinDeclined) => Some(JoinReply::Declined),
        _ => None,
    }
}

fn request_label(request: &Message) -> &'static str {
    match request {
        Message::PlayerRejoin(_) => "PLAYER_REJOIN",
        Message::GraphicsJoin => "GRAPHICS_JOIN",
        _ => "PLAYER_JOIN",
    }
}

/// Waits for the server's verdict on `request`, consuming the matching
/// reply from the inbox. There is deliberately no timeout: an unresponsive
/// server blocks the caller until the connection itself dies.
async fn wait_for_join_reply(inbox: &Inbox, request: &Message) -> Result<String, JoinError> {
    loop {
        let notified = inbox.changed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let mut messages = inbox.messages.lock().await;
            let reply = messages
                .iter()
                .enumerate()
                .find_map(|(position, message)| {
                    match_reply(request, message).map(|reply| (position, reply))
                });
            if let Some((position, reply)) = reply {
                messages.remove(position);
                return match reply {
                    JoinReply::Approved(identity) => Ok(identity),
                    JoinReply::Declined => Err(JoinError::Declined {
                        request: request_label(request),
                    }),
                };
            }
        }

        if !inbox.alive.load(Ordering::SeqCst) {
            return Err(JoinError::ConnectionLost);
        }
        notified.await;
    }
}

/// Writer half: encodes queued messages into the socket until the queue
/// closes or a write fails.
fn spawn_writer(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Message>) {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let frame = match codec::encode(&message) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("dropping unencodable frame: {}", err);
                    continue;
                }
            };
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });
}

/// Receive loop: decodes frames onto the inbox until the connection dies,
/// then clears the liveness flag and wakes any waiter.
async fn receive_loop(mut reader: OwnedReadHalf, inbox: Arc<Inbox>) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => match decoder.decode(&chunk[..read]) {
                Ok(messages) => {
                    if !messages.is_empty() {
                        inbox.messages.lock().await.extend(messages);
                        inbox.changed.notify_waiters();
                    }
                }
                Err(err) => {
                    warn!("protocol violation from server: {}", err);
                    break;
                }
            },
            Err(err) => {
                warn!("lost connection to server: {}", err);
                break;
            }
        }
    }

    inbox.alive.store(false, Ordering::SeqCst);
    inbox.changed.notify_waiters();
    info!("connection to server closed");
}
