//! The watching client runtime: one WebSocket to the relay, the registry's
//! events going up, the server's events coming down.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::event;
use crate::fsops;
use crate::hub::{ClientHub, Hub};
use crate::index::FileIndex;
use crate::watch::Registry;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct SyncClient {
    config: SyncConfig,
    registry: Arc<Registry>,
    outbound: mpsc::Receiver<Vec<u8>>,
    hub: ClientHub,
    url: String,
}

impl SyncClient {
    pub fn new(
        config: SyncConfig,
        index: Arc<dyn FileIndex>,
        url: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let (registry, outbound) = Registry::new(config.clone(), index)?;
        Ok(Self {
            hub: ClientHub::new(config.clone()),
            config,
            registry,
            outbound,
            url: url.into(),
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Bootstrap the storage tree, connect, and run the read/write loops
    /// until the connection drops or the token cancels.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SyncError> {
        fsops::make_storage(&self.config)?;
        self.registry.append_dir(&self.config.storage_dir())?;

        info!(url = %self.url, "connecting to relay");
        let (socket, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = socket.split();

        let listener = tokio::spawn(self.registry.clone().listen(shutdown.clone()));

        let writer_shutdown = shutdown.clone();
        let mut outbound = self.outbound;
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => break,
                    payload = outbound.recv() => match payload {
                        None => break,
                        Some(payload) => {
                            if let Err(err) = sink.send(Message::Binary(payload)).await {
                                error!(%err, "connection write failed");
                                break;
                            }
                        }
                    }
                }
            }
        });

        // With the writer draining, push anything the index does not know
        // about yet.
        if let Err(err) = self.registry.scan_storage() {
            error!(%err, "initial storage scan failed");
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = stream.next() => match frame {
                    None => {
                        info!("connection closed by relay");
                        break;
                    }
                    Some(Err(err)) => {
                        error!(%err, "connection read failed");
                        break;
                    }
                    Some(Ok(Message::Binary(payload))) => {
                        let mut event = match event::decode_event(&payload) {
                            Ok(event) => event,
                            Err(err) => {
                                error!(%err, "bad frame from relay");
                                break;
                            }
                        };
                        if let Err(err) = self.hub.process(&mut event).await {
                            error!(%err, "error applying relay event");
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => debug!("ignoring non-binary frame"),
                }
            }
        }

        writer.abort();
        listener.abort();
        Ok(())
    }
}
