//! Server-side client registry.
//!
//! The registry is the single source of truth for who is connected, as
//! what, and in which phase. Every record mutation, including the player
//! capacity check, happens under one write guard so concurrent handshakes
//! cannot race each other. Records are never removed; superseded and dead
//! connections stay behind with their flags cleared.

use log::info;
use shared::{identity_slot, mint_graphics_identity, mint_player_identity, Message};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};

/// Role negotiated during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Player,
    Graphics,
}

/// State for one accepted connection.
#[derive(Debug)]
pub struct ClientRecord {
    /// Monotonically increasing connection index.
    pub index: u64,
    /// Negotiated role; `None` until the handshake resolves.
    pub role: Option<ClientRole>,
    /// Identity token, write-once during the handshake.
    pub identity: Option<String>,
    /// Decoded post-handshake messages awaiting collection.
    pub inbound: Vec<Message>,
    /// True while the socket is presumed live.
    pub connected: bool,
    /// True while this identity still holds its slot. Cleared only when a
    /// different connection rejoins with the same token.
    pub active: bool,
    /// True once the handshake concluded: approved, declined or timed out.
    pub initialized: bool,
    /// Outbound frame queue. Dropping it closes the socket's write half,
    /// so `connected == false` implies no further writes happen.
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

impl ClientRecord {
    fn new(index: u64, outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            index,
            role: None,
            identity: None,
            inbound: Vec::new(),
            connected: true,
            active: true,
            initialized: false,
            outbound: Some(outbound),
        }
    }

    /// Queues a message for the writer task. A full or closed queue means
    /// the socket is dying; the receive loop will notice shortly, so the
    /// failure is swallowed here.
    pub fn send(&self, message: Message) {
        if let Some(outbound) = &self.outbound {
            let _ = outbound.send(message);
        }
    }

    pub fn is_player(&self) -> bool {
        self.role == Some(ClientRole::Player)
    }
}

/// All connection records, keyed by connection index.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: HashMap<u64, ClientRecord>,
    next_index: u64,
    players_joined: usize,
    player_slots: usize,
}

impl ClientRegistry {
    pub fn new(player_slots: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_index: 0,
            players_joined: 0,
            player_slots,
        }
    }

    /// Registers a freshly accepted connection and returns its index.
    pub fn register(&mut self, outbound: mpsc::UnboundedSender<Message>) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.clients.insert(index, ClientRecord::new(index, outbound));
        index
    }

    pub fn get(&self, index: u64) -> Option<&ClientRecord> {
        self.clients.get(&index)
    }

    pub fn player_slots(&self) -> usize {
        self.player_slots
    }

    /// Player slots allocated so far. Never decremented: a rejoin reuses
    /// its old slot instead of allocating one.
    pub fn players_joined(&self) -> usize {
        self.players_joined
    }

    /// Player records currently holding a live socket.
    pub fn n_players_connected(&self) -> usize {
        self.clients
            .values()
            .filter(|record| record.is_player() && record.connected)
            .count()
    }

    /// True if any slot-holding player has dropped its socket.
    pub fn has_dropped_player(&self) -> bool {
        self.clients
            .values()
            .any(|record| record.is_player() && record.active && !record.connected)
    }

    /// Allocates the next sequential player slot for `index`, minting its
    /// identity. Returns `None` when every slot has been handed out.
    pub fn allocate_player(&mut self, index: u64) -> Option<String> {
        if self.players_joined >= self.player_slots {
            return None;
        }
        let record = self.clients.get_mut(&index)?;

        let slot = self.players_joined;
        let identity = mint_player_identity(slot);
        record.role = Some(ClientRole::Player);
        record.identity = Some(identity.clone());
        self.players_joined += 1;

        info!("client {} joined as player {}", index, slot);
        Some(identity)
    }

    /// Lets `index` reclaim a player slot with a rejoin token.
    ///
    /// Eligible targets are player records that are still active but have
    /// lost their socket. On success the old record is superseded
    /// (`active` cleared) and the new record adopts its identity.
    pub fn adopt_rejoin(&mut self, index: u64, token: &str) -> bool {
        let target = self
            .clients
            .values()
            .find(|record| {
                record.is_player()
                    && record.active
                    && !record.connected
                    && record.identity.as_deref() == Some(token)
            })
            .map(|record| record.index);

        let Some(target) = target else {
            return false;
        };
        if !self.clients.contains_key(&index) {
            return false;
        }

        if let Some(old) = self.clients.get_mut(&target) {
            old.active = false;
        }
        if let Some(record) = self.clients.get_mut(&index) {
            record.role = Some(ClientRole::Player);
            record.identity = Some(token.to_string());
        }

        info!("client {} reclaimed player identity {}", index, token);
        true
    }

    /// Admits `index` as a graphics client. Graphics joins are unlimited.
    pub fn register_graphics(&mut self, index: u64) -> Option<String> {
        let record = self.clients.get_mut(&index)?;

        let identity = mint_graphics_identity();
        record.role = Some(ClientRole::Graphics);
        record.identity = Some(identity.clone());

        info!("client {} joined as graphics {}", index, identity);
        Some(identity)
    }

    /// Marks the handshake for `index` as concluded, unblocking the
    /// acceptor gate.
    pub fn mark_initialized(&mut self, index: u64) {
        if let Some(record) = self.clients.get_mut(&index) {
            record.initialized = true;
        }
    }

    /// Marks the socket for `index` as gone and drops its outbound queue,
    /// which closes the write half.
    pub fn mark_disconnected(&mut self, index: u64) {
        if let Some(record) = self.clients.get_mut(&index) {
            if record.connected {
                info!("client {} disconnected", index);
            }
            record.connected = false;
            record.outbound = None;
        }
    }

    /// Appends decoded steady-state messages to the record's queue.
    pub fn push_inbound(&mut self, index: u64, messages: Vec<Message>) {
        if let Some(record) = self.clients.get_mut(&index) {
            record.inbound.extend(messages);
        }
    }

    /// Queues a message on one connection.
    pub fn send_to(&self, index: u64, message: Message) {
        if let Some(record) = self.clients.get(&index) {
            record.send(message);
        }
    }

    /// Queues a message on every connected session. Per-socket failures
    /// are swallowed; the dying socket's own receive loop reports them.
    pub fn broadcast(&self, message: &Message) {
        for record in self.clients.values().filter(|record| record.connected) {
            record.send(message.clone());
        }
    }

    /// Drains queued `INPUTS` batches into one list per player slot.
    ///
    /// Tokens are deduplicated within a single drain, preserving first
    /// occurrence order. Players with nothing queued yield an empty list.
    /// Other message types stay queued.
    pub fn collect_inputs(&mut self) -> Vec<Vec<String>> {
        let mut inputs = vec![Vec::new(); self.player_slots];

        for record in self.clients.values_mut() {
            if !(record.is_player() && record.connected) {
                continue;
            }
            let Some(slot) = record.identity.as_deref().and_then(identity_slot) else {
                continue;
            };
            if slot >= inputs.len() {
                continue;
            }

            let batch = &mut inputs[slot];
            record.inbound.retain(|message| match message {
                Message::Inputs(tokens) => {
                    for token in tokens {
                        if !batch.contains(token) {
                            batch.push(token.clone());
                        }
                    }
                    false
                }
                _ => true,
            });
        }

        inputs
    }
}

/// The registry behind its synchronization boundary, plus the wakeup used
/// by everything that waits on registry state (acceptor gate, player-count
/// gates, the disconnection barrier).
#[derive(Debug)]
pub struct SharedRegistry {
    clients: RwLock<ClientRegistry>,
    changed: Notify,
}

impl SharedRegistry {
    pub fn new(player_slots: usize) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(ClientRegistry::new(player_slots)),
            changed: Notify::new(),
        })
    }

    /// Runs `f` under the read guard.
    pub async fn query<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ClientRegistry) -> R,
    {
        f(&*self.clients.read().await)
    }

    /// Runs `f` under the write guard, then wakes every waiter.
    pub async fn mutate<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ClientRegistry) -> R,
    {
        let result = f(&mut *self.clients.write().await);
        self.changed.notify_waiters();
        result
    }

    /// Blocks until `condition` holds. The notification is registered
    /// before each check, so a mutation between check and sleep cannot be
    /// missed.
    pub async fn wait_until<F>(&self, condition: F)
    where
        F: Fn(&ClientRegistry) -> bool,
    {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if condition(&*self.clients.read().await) {
                return;
            }
            notified.await;
        }
    }
}
