//! TCP outbound
//!
//! Listens for peers and sends every written chunk to all of them. Each peer
//! has its own bounded queue and writer task; a slow peer misses chunks, a
//! failing peer is dropped.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::component::{Component, Sink};
use crate::error::{ConnectionError, Error, Result};
use crate::registry::{BuildContext, Factory};

use super::peers::PeerFanout;

fn default_buffer_size() -> usize {
    1024
}

/// Options of the `tcp` outbound
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpOutboundOptions {
    /// Address to listen on for peers
    pub address: String,
    /// Per-peer queue length, in chunks
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Per-write timeout; expiry drops the peer
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,
}

/// Multi-peer stream server sink
pub struct TcpOutbound {
    id: String,
    options: TcpOutboundOptions,
    peers: Arc<PeerFanout>,
    local_addr: OnceLock<SocketAddr>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpOutbound {
    /// Create an unbound outbound
    pub fn new(id: impl Into<String>, options: TcpOutboundOptions) -> Self {
        let id = id.into();
        Self {
            peers: Arc::new(PeerFanout::new(id.clone(), options.buffer_size)),
            id,
            options,
            local_addr: OnceLock::new(),
            accept_task: Mutex::new(None),
        }
    }

    /// Bound address, available after `init`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Number of connected peers
    pub async fn peer_count(&self) -> usize {
        self.peers.peer_count().await
    }
}

#[async_trait]
impl Component for TcpOutbound {
    fn kind(&self) -> &'static str {
        "tcp-outbound"
    }

    async fn init(&self) -> Result<()> {
        let listener = TcpListener::bind(self.options.address.as_str())
            .await
            .map_err(|e| Error::factory(&self.id, format!("bind {}: {}", self.options.address, e)))?;
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);

        tracing::info!(id = %self.id, addr = %addr, "TCP outbound listening");

        let handle = tokio::spawn(accept_loop(
            listener,
            self.id.clone(),
            Arc::clone(&self.peers),
            self.options.write_timeout_ms.map(Duration::from_millis),
        ));
        *self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let handle = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        // Writers exit once their queues close
        self.peers.clear().await;
        tracing::info!(id = %self.id, "TCP outbound closed");
        Ok(())
    }
}

#[async_trait]
impl Sink for TcpOutbound {
    async fn write(&self, chunk: Bytes) -> Result<usize> {
        if self.local_addr.get().is_none() {
            return Err(ConnectionError::NotReady.into());
        }
        self.peers.broadcast(&chunk).await;
        Ok(chunk.len())
    }
}

async fn accept_loop(
    listener: TcpListener,
    id: String,
    peers: Arc<PeerFanout>,
    write_timeout: Option<Duration>,
) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::debug!(id = %id, error = %e, "Failed to set TCP_NODELAY");
                }
                tracing::info!(id = %id, peer = %peer, "Peer connected");

                let queue = peers.attach(peer).await;
                let peers = Arc::clone(&peers);
                let id = id.clone();

                tokio::spawn(async move {
                    if let Err(e) = write_loop(socket, queue, write_timeout).await {
                        tracing::warn!(id = %id, peer = %peer, error = %e, "Peer dropped");
                        peers.detach(&peer).await;
                    } else {
                        tracing::debug!(id = %id, peer = %peer, "Peer writer stopped");
                    }
                });
            }
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Failed to accept connection");
            }
        }
    }
}

async fn write_loop(
    mut socket: TcpStream,
    mut queue: mpsc::Receiver<Bytes>,
    write_timeout: Option<Duration>,
) -> Result<()> {
    while let Some(chunk) = queue.recv().await {
        match write_timeout {
            Some(limit) => tokio::time::timeout(limit, socket.write_all(&chunk))
                .await
                .map_err(|_| ConnectionError::TimedOut)??,
            None => socket.write_all(&chunk).await?,
        }
    }
    Ok(())
}

/// Constructor for the `tcp` outbound
pub struct TcpOutboundFactory;

impl Factory for TcpOutboundFactory {
    type Options = TcpOutboundOptions;
    type Output = TcpOutbound;

    fn build(&self, id: &str, options: TcpOutboundOptions, _ctx: &mut BuildContext) -> Result<TcpOutbound> {
        if options.buffer_size == 0 {
            return Err(Error::factory(id, "buffer_size must be greater than zero"));
        }
        Ok(TcpOutbound::new(id, options))
    }
}
