//! TCP inbound
//!
//! Listens on an address and serves one connection at a time. Bytes received
//! on the active connection are handed to the pump through an
//! [`AsyncReadBridge`]. When the connection ends the listener accepts the
//! next one; connection errors never reach the pump.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::bridge::AsyncReadBridge;
use crate::component::{Component, Source};
use crate::error::{ConnectionError, Error, Result};
use crate::registry::{BuildContext, Factory};

/// Options of the `tcp` inbound
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpInboundOptions {
    /// Address to listen on
    pub address: String,
    /// Per-connection read timeout; expiry ends that connection only
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
}

/// Stream listener source
pub struct TcpInbound {
    id: String,
    options: TcpInboundOptions,
    bridge: Arc<AsyncReadBridge>,
    local_addr: OnceLock<SocketAddr>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpInbound {
    /// Create an unbound inbound
    pub fn new(id: impl Into<String>, options: TcpInboundOptions) -> Self {
        Self {
            id: id.into(),
            options,
            bridge: Arc::new(AsyncReadBridge::new()),
            local_addr: OnceLock::new(),
            accept_task: Mutex::new(None),
        }
    }

    /// Bound address, available after `init`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }
}

#[async_trait]
impl Component for TcpInbound {
    fn kind(&self) -> &'static str {
        "tcp-inbound"
    }

    async fn init(&self) -> Result<()> {
        let listener = TcpListener::bind(self.options.address.as_str())
            .await
            .map_err(|e| Error::factory(&self.id, format!("bind {}: {}", self.options.address, e)))?;
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);

        tracing::info!(id = %self.id, addr = %addr, "TCP inbound listening");

        let ctx = ConnectionContext {
            id: self.id.clone(),
            bridge: Arc::clone(&self.bridge),
            read_timeout: self.options.read_timeout_ms.map(Duration::from_millis),
        };
        let handle = tokio::spawn(accept_loop(listener, ctx));
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
            tracing::info!(id = %self.id, "TCP inbound closed");
        }
        Ok(())
    }
}

#[async_trait]
impl Source for TcpInbound {
    async fn read(&self, buf: &mut BytesMut) -> Result<usize> {
        if self.local_addr.get().is_none() {
            return Err(ConnectionError::NotReady.into());
        }
        self.bridge.read(buf).await
    }
}

struct ConnectionContext {
    id: String,
    bridge: Arc<AsyncReadBridge>,
    read_timeout: Option<Duration>,
}

async fn accept_loop(listener: TcpListener, ctx: ConnectionContext) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::debug!(id = %ctx.id, error = %e, "Failed to set TCP_NODELAY");
                }
                tracing::info!(id = %ctx.id, peer = %peer, "Connection accepted");

                match serve(socket, &ctx).await {
                    Ok(bytes) => {
                        tracing::info!(id = %ctx.id, peer = %peer, bytes = bytes, "Connection closed")
                    }
                    Err(e) => {
                        tracing::warn!(id = %ctx.id, peer = %peer, error = %e, "Connection ended")
                    }
                }
            }
            Err(e) => {
                tracing::error!(id = %ctx.id, error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Feed one connection into the bridge until it ends. Returns bytes received.
async fn serve(mut socket: TcpStream, ctx: &ConnectionContext) -> Result<u64> {
    let mut total = 0u64;

    loop {
        let mut pending = ctx.bridge.acquire().await;

        let received = match ctx.read_timeout {
            Some(limit) => {
                let timed = tokio::time::timeout(limit, socket.read(pending.buf_mut())).await;
                match timed {
                    Ok(result) => result,
                    Err(_) => {
                        pending.complete(Ok(0));
                        return Err(ConnectionError::TimedOut.into());
                    }
                }
            }
            None => socket.read(pending.buf_mut()).await,
        };

        match received {
            Ok(0) => {
                pending.complete(Ok(0));
                return Ok(total);
            }
            Ok(n) => {
                total += n as u64;
                pending.complete(Ok(n));
            }
            Err(e) => {
                // The pump only sees "no data"; the listener keeps going
                pending.complete(Ok(0));
                return Err(e.into());
            }
        }
    }
}

/// Constructor for the `tcp` inbound
pub struct TcpInboundFactory;

impl Factory for TcpInboundFactory {
    type Options = TcpInboundOptions;
    type Output = TcpInbound;

    fn build(&self, id: &str, options: TcpInboundOptions, _ctx: &mut BuildContext) -> Result<TcpInbound> {
        Ok(TcpInbound::new(id, options))
    }
}
