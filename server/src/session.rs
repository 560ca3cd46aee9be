//! Per-connection session tasks.
//!
//! Each accepted socket gets a writer task draining its outbound queue and
//! a receive loop running here. The receive loop owns its read half and
//! its frame decoder; all shared state flows through the registry.

use crate::handshake::{self, HandshakeOutcome};
use crate::registry::SharedRegistry;
use log::{debug, warn};
use shared::codec::{self, FrameDecoder};
use shared::{Message, READ_CHUNK_SIZE};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// Spawns the writer half of a connection: encodes queued messages into
/// the socket until the queue closes or a write fails. Dropping the last
/// queue sender therefore closes the socket.
pub fn spawn_writer<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<Message>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
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
                // The session's receive loop reports the dead socket.
                break;
            }
        }
    });
}

/// Runs the receive loop for connection `index`.
///
/// Phase one is the handshake, bounded by `join_timeout`: the first
/// decoded message is fed to the handshake machine. A timeout closes the
/// socket without a reply but still marks the record initialized so the
/// acceptor can move on. Phase two pushes every decoded message onto the
/// record's inbound queue until the socket dies. No reconnection logic
/// lives here; a dropped client rejoins on a fresh socket.
pub async fn run<R>(registry: Arc<SharedRegistry>, index: u64, mut reader: R, join_timeout: Duration)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let deadline = Instant::now() + join_timeout;

    let surplus = loop {
        let read = match timeout_at(deadline, reader.read(&mut chunk)).await {
            Err(_) => {
                debug!("closed connection to client {}: join timed out", index);
                conclude_handshake(&registry, index).await;
                return;
            }
            Ok(Err(err)) => {
                warn!("lost connection to client {} during join: {}", index, err);
                conclude_handshake(&registry, index).await;
                return;
            }
            Ok(Ok(0)) => {
                debug!("client {} hung up during join", index);
                conclude_handshake(&registry, index).await;
                return;
            }
            Ok(Ok(read)) => read,
        };

        let mut messages = match decoder.decode(&chunk[..read]) {
            Ok(messages) => messages,
            Err(err) => {
                warn!("protocol violation from client {}: {}", index, err);
                conclude_handshake(&registry, index).await;
                return;
            }
        };
        if messages.is_empty() {
            continue;
        }

        let request = messages.remove(0);
        match handshake::process_request(&registry, index, request).await {
            HandshakeOutcome::Approved => break messages,
            HandshakeOutcome::Declined | HandshakeOutcome::Violation => {
                // For a decline, the reply is already queued; the writer
                // flushes it before the dropped queue closes the socket.
                conclude_handshake(&registry, index).await;
                return;
            }
        }
    };

    registry
        .mutate(|clients| {
            clients.mark_initialized(index);
            if !surplus.is_empty() {
                clients.push_inbound(index, surplus);
            }
        })
        .await;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => match decoder.decode(&chunk[..read]) {
                Ok(messages) => {
                    if !messages.is_empty() {
                        registry
                            .mutate(|clients| clients.push_inbound(index, messages))
                            .await;
                    }
                }
                Err(err) => {
                    warn!("protocol violation from client {}: {}", index, err);
                    break;
                }
            },
            Err(err) => {
                warn!("lost connection to client {}: {}", index, err);
                break;
            }
        }
    }

    registry.mutate(|clients| clients.mark_disconnected(index)).await;
}

/// Marks a handshake that ended without approval: the socket is closed and
/// the acceptor gate is released, but no identity was ever delivered.
async fn conclude_handshake(registry: &SharedRegistry, index: u64) {
    registry
        .mutate(|clients| {
            clients.mark_disconnected(index);
            clients.mark_initialized(index);
        })
        .await;
}
