//! WebSocket fan-out relay.
//!
//! Every frame a peer sends is forwarded untouched to all other connected
//! peers. There is no parsing and no addressing.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::server::AppState;

pub type PeerId = u64;

#[derive(Default)]
pub struct RelayHub {
    next_id: AtomicU64,
    peers: Mutex<HashMap<PeerId, UnboundedSender<Message>>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self) -> (PeerId, UnboundedReceiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_peers().insert(id, tx);
        (id, rx)
    }

    pub fn leave(&self, id: PeerId) {
        self.lock_peers().remove(&id);
    }

    pub fn peer_count(&self) -> usize {
        self.lock_peers().len()
    }

    /// Sends `message` to every peer except `from`. Returns how many peers
    /// it was queued for.
    pub fn broadcast(&self, from: PeerId, message: Message) -> usize {
        let mut peers = self.lock_peers();
        let mut delivered = 0;

        // A closed receiver means the peer task is gone; drop it here.
        peers.retain(|id, tx| {
            if *id == from {
                return true;
            }
            if tx.send(message.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });

        delivered
    }

    fn lock_peers(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, UnboundedSender<Message>>> {
        // The map stays consistent even if a holder panicked.
        self.peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub async fn handle_relay(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_socket(socket, state))
}

async fn relay_socket(socket: WebSocket, state: AppState) {
    let hub = state.relay.clone();
    let (id, mut outbound) = hub.join();
    let (mut sender, mut receiver) = socket.split();

    info!(peer = id, peers = hub.peer_count(), "relay peer connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let inbound_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                    let delivered = inbound_hub.broadcast(id, message);
                    debug!(peer = id, delivered, "relayed frame");
                }
                // Ping/pong are answered by axum.
                Ok(_) => {}
                Err(err) => {
                    warn!(peer = id, "relay receive error: {err}");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.leave(id);
    info!(peer = id, peers = hub.peer_count(), "relay peer disconnected");
}
