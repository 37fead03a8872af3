//! The relay server: accepts peers, applies their events through the server
//! hub, and routes the results.

mod peer;

pub use peer::Peer;

use crate::config::DEFAULT_MAX_CONNS;
use crate::error::SyncError;
use crate::event::{self, Op};
use crate::hub::{Hub, ServerHub};
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Shared relay state: the hub that applies events and the set of connected
/// peers. Broadcasts snapshot the set under the lock and deliver outside it.
pub struct RelayServer {
    hub: ServerHub,
    peers: RwLock<HashMap<String, Arc<Peer>>>,
    max_conns: usize,
}

impl RelayServer {
    pub fn new(hub: ServerHub, max_conns: usize) -> Arc<Self> {
        Arc::new(Self {
            hub,
            peers: RwLock::new(HashMap::new()),
            max_conns: max_conns.max(1),
        })
    }

    pub fn with_default_capacity(hub: ServerHub) -> Arc<Self> {
        Self::new(hub, DEFAULT_MAX_CONNS)
    }

    /// The WebSocket router; serve it with
    /// `into_make_service_with_connect_info::<SocketAddr>()`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(crate::config::WS_PATH, get(ws_handler))
            .with_state(self)
    }

    async fn at_capacity(&self) -> bool {
        self.peers.read().await.len() >= self.max_conns
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub(crate) async fn add_peer(&self, peer: Arc<Peer>) {
        self.peers.write().await.insert(peer.id.clone(), peer);
    }

    pub(crate) async fn remove_peer(&self, id: &str) {
        self.peers.write().await.remove(id);
    }

    /// Decode, apply, and route one inbound frame. Handler failures are
    /// logged here and do not kill the connection; decode failures propagate
    /// and do.
    pub(crate) async fn receive(&self, sender: &Arc<Peer>, payload: Vec<u8>) -> Result<(), SyncError> {
        let mut event = event::decode_event(&payload)?;
        let was_update = event.op == Op::Update;
        if let Err(err) = self.hub.process(&mut event).await {
            error!(peer = %sender.name, %err, "event processing failed");
            return Ok(());
        }
        info!(peer = %sender.name, op = %event.op, path = %event.path, "event processed");
        if was_update {
            // The hub filled the event with the authoritative copy; only the
            // requester gets it.
            let reply = event::encode(&event)?;
            self.respond(reply, sender).await;
        } else {
            self.broadcast(&payload, sender).await;
        }
        Ok(())
    }

    /// Send to every peer except the originator. Non-blocking; a full peer
    /// buffer drops that delivery.
    async fn broadcast(&self, payload: &[u8], sender: &Peer) {
        let targets: Vec<Arc<Peer>> = {
            let peers = self.peers.read().await;
            peers
                .values()
                .filter(|p| p.id != sender.id)
                .cloned()
                .collect()
        };
        for peer in targets {
            if !peer.try_send(payload.to_vec()) {
                error!(peer = %peer.name, "unable to send message to peer");
            }
        }
    }

    /// Send to the originating peer only, if it is still registered.
    async fn respond(&self, payload: Vec<u8>, peer: &Arc<Peer>) {
        let target = { self.peers.read().await.get(&peer.id).cloned() };
        match target {
            Some(target) => {
                if !target.try_send(payload) {
                    error!(peer = %target.name, "unable to send message to peer");
                }
            }
            None => error!(peer = %peer.name, "impossible to reach peer: not registered"),
        }
    }
}

/// Upgrade handler: reject over-capacity connections before the handshake
/// completes, otherwise hand the socket to the peer runtime.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(server): State<Arc<RelayServer>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    if server.at_capacity().await {
        warn!(%addr, error = %SyncError::CapacityExceeded, "connection rejected");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| peer::handle_socket(socket, server, addr))
        .into_response()
}
