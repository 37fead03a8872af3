//! Per-connection peer runtime: a reader/writer pair over one socket.

use super::RelayServer;
use crate::config::BUFFER_SIZE;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// One connected client as the relay sees it.
pub struct Peer {
    pub id: String,
    pub name: String,
    tx: mpsc::Sender<Vec<u8>>,
}

impl Peer {
    fn new(name: String) -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(BUFFER_SIZE);
        let peer = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            name,
            tx,
        });
        (peer, rx)
    }

    /// Non-blocking send. Returns false when the buffer is full or the
    /// writer is gone; the caller logs and drops.
    pub fn try_send(&self, payload: Vec<u8>) -> bool {
        self.tx.try_send(payload).is_ok()
    }
}

/// Drive one accepted socket until either loop exits, then deregister.
pub(crate) async fn handle_socket(socket: WebSocket, server: Arc<RelayServer>, addr: SocketAddr) {
    let (peer, mut outbound) = Peer::new(addr.to_string());
    server.add_peer(Arc::clone(&peer)).await;
    info!(peer = %peer.name, "peer connected");

    let (mut sink, mut stream) = socket.split();

    // Writer: drain the bounded outbound channel to the wire.
    let writer = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if let Err(err) = sink.send(Message::Binary(payload)).await {
                debug!(%err, "write failed, closing writer");
                break;
            }
        }
    });

    // Reader: one decode, one process, one routing call, then the next read.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Binary(payload)) => {
                if let Err(err) = server.receive(&peer, payload).await {
                    error!(peer = %peer.name, %err, "dropping connection: bad frame");
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(peer = %peer.name, "peer initiated close");
                break;
            }
            // Non-binary frames carry nothing we understand.
            Ok(_) => {}
            Err(err) => {
                debug!(peer = %peer.name, %err, "read failed, closing reader");
                break;
            }
        }
    }

    server.remove_peer(&peer.id).await;
    writer.abort();
    info!(peer = %peer.name, "peer disconnected");
}
