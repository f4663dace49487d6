//! UDP inbound
//!
//! Every read returns one datagram. Datagrams longer than the read buffer are
//! truncated by the socket.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use bytes::BytesMut;
use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::bridge::AsyncReadBridge;
use crate::component::{Component, Source};
use crate::error::{ConnectionError, Error, Result};
use crate::registry::{BuildContext, Factory};

/// Options of the `udp` inbound
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UdpInboundOptions {
    /// Address to listen on
    pub address: String,
}

/// Datagram listener source
pub struct UdpInbound {
    id: String,
    options: UdpInboundOptions,
    bridge: Arc<AsyncReadBridge>,
    local_addr: OnceLock<SocketAddr>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpInbound {
    /// Create an unbound inbound
    pub fn new(id: impl Into<String>, options: UdpInboundOptions) -> Self {
        Self {
            id: id.into(),
            options,
            bridge: Arc::new(AsyncReadBridge::new()),
            local_addr: OnceLock::new(),
            recv_task: Mutex::new(None),
        }
    }

    /// Bound address, available after `init`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }
}

#[async_trait]
impl Component for UdpInbound {
    fn kind(&self) -> &'static str {
        "udp-inbound"
    }

    async fn init(&self) -> Result<()> {
        let socket = UdpSocket::bind(self.options.address.as_str())
            .await
            .map_err(|e| Error::factory(&self.id, format!("bind {}: {}", self.options.address, e)))?;
        let addr = socket.local_addr()?;
        let _ = self.local_addr.set(addr);

        tracing::info!(id = %self.id, addr = %addr, "UDP inbound listening");

        let handle = tokio::spawn(recv_loop(socket, self.id.clone(), Arc::clone(&self.bridge)));
        *self.recv_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let handle = self
            .recv_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!(id = %self.id, "UDP inbound closed");
        }
        Ok(())
    }
}

#[async_trait]
impl Source for UdpInbound {
    async fn read(&self, buf: &mut BytesMut) -> Result<usize> {
        if self.local_addr.get().is_none() {
            return Err(ConnectionError::NotReady.into());
        }
        self.bridge.read(buf).await
    }
}

async fn recv_loop(socket: UdpSocket, id: String, bridge: Arc<AsyncReadBridge>) {
    let mut last_peer: Option<SocketAddr> = None;

    loop {
        let mut pending = bridge.acquire().await;
        let received = socket.recv_from(pending.buf_mut()).await;

        match received {
            Ok((n, peer)) => {
                if last_peer != Some(peer) {
                    tracing::info!(id = %id, peer = %peer, "Receiving datagrams");
                    last_peer = Some(peer);
                }
                pending.complete(Ok(n));
            }
            Err(e) => {
                // ICMP errors surface here on some platforms; keep listening
                tracing::warn!(id = %id, error = %e, "Receive failed");
                pending.complete(Ok(0));
            }
        }
    }
}

/// Constructor for the `udp` inbound
pub struct UdpInboundFactory;

impl Factory for UdpInboundFactory {
    type Options = UdpInboundOptions;
    type Output = UdpInbound;

    fn build(&self, id: &str, options: UdpInboundOptions, _ctx: &mut BuildContext) -> Result<UdpInbound> {
        Ok(UdpInbound::new(id, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_datagram_per_read() {
        let source = UdpInbound::new(
            "cam",
            UdpInboundOptions {
                address: "127.0.0.1:0".into(),
            },
        );
        source.init().await.unwrap();
        let addr = source.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"first", addr).await.unwrap();
        sender.send_to(b"second", addr).await.unwrap();

        let mut buf = BytesMut::zeroed(1500);
        let n = source.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"first");
        assert_eq!(buf.len(), 1500);

        let n = source.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second");

        source.shutdown().await.unwrap();
    }

    #[test]
    fn test_unknown_option_rejected() {
        let result: std::result::Result<UdpInboundOptions, _> =
            serde_json::from_str(r#"{ "address": "0.0.0.0:5000", "port": 5000 }"#);
        assert!(result.is_err());
    }
}
