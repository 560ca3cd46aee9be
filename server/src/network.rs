//! Server network layer: listener, acceptor gate, disconnection barrier
//! and the game/input relay exposed to the game loop.

use crate::registry::SharedRegistry;
use crate::session;
use log::{error, info};
use shared::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// The session server. Owns the acceptor task and fronts the registry for
/// the game loop: gate on `wait_for_players`, then alternate
/// `handle_disconnections`, `collect_inputs` and `send_game` each tick.
pub struct Server {
    registry: Arc<SharedRegistry>,
    player_slots: usize,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the listener and starts accepting connections.
    pub async fn bind(
        addr: &str,
        player_slots: usize,
        join_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("server listening on {}", local_addr);

        let registry = SharedRegistry::new(player_slots);
        tokio::spawn(accept_loop(listener, Arc::clone(&registry), join_timeout));

        Ok(Server {
            registry,
            player_slots,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks until every player slot holds a live connection.
    pub async fn wait_for_players(&self) {
        self.registry
            .wait_until(|clients| clients.n_players_connected() == self.player_slots)
            .await;
    }

    pub async fn n_players_connected(&self) -> usize {
        self.registry.query(|clients| clients.n_players_connected()).await
    }

    /// Broadcasts the authoritative game value to every connected session.
    pub async fn send_game(&self, game: &serde_json::Value) {
        self.registry
            .query(|clients| clients.broadcast(&Message::Game(game.clone())))
            .await;
    }

    /// Drains deduplicated input batches, one list per player slot.
    pub async fn collect_inputs(&self) -> Vec<Vec<String>> {
        self.registry.mutate(|clients| clients.collect_inputs()).await
    }

    /// Pauses the whole session while a player slot is dark.
    ///
    /// If a slot-holding player has lost its socket, every connected
    /// session is told about the break and this call blocks until a
    /// rejoin brings the connected player count back to capacity. The
    /// caller's tick loop must not relay anything while blocked.
    pub async fn handle_disconnections(&self) {
        let dropped = self.registry.query(|clients| clients.has_dropped_player()).await;
        if !dropped {
            return;
        }

        info!("player disconnected, pausing the session");
        self.registry
            .query(|clients| clients.broadcast(&Message::DisconnectionBreak))
            .await;

        self.registry
            .wait_until(|clients| clients.n_players_connected() == self.player_slots)
            .await;
        info!("player rejoined, resuming");
    }
}

/// Accepts sockets for the lifetime of the server. Each connection gets a
/// registry record, a writer task and a session task. The next socket is
/// not accepted until the current one's handshake has concluded.
async fn accept_loop(listener: TcpListener, registry: Arc<SharedRegistry>, join_timeout: Duration) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("accept failed: {}", err);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };
        info!("negotiating with {}", addr);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let index = registry.mutate(|clients| clients.register(outbound_tx)).await;

        let (reader, writer) = stream.into_split();
        session::spawn_writer(writer, outbound_rx);
        tokio::spawn(session::run(
            Arc::clone(&registry),
            index,
            reader,
            join_timeout,
        ));

        registry
            .wait_until(move |clients| {
                clients.get(index).map_or(true, |record| record.initialized)
            })
            .await;
    }
}
