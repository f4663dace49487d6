//! Peer fan-out for multi-peer sinks
//!
//! Each attached peer gets a bounded queue drained by its own writer task.
//! Broadcasting never waits: a peer whose queue is full misses the chunk.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use crate::stats::BackpressureTracker;

struct Peer {
    tx: mpsc::Sender<Bytes>,
    dropped: AtomicU64,
    backpressure: BackpressureTracker,
}

impl Peer {
    /// Report drops the rate limiter is still holding back
    fn retire(&self) {
        self.backpressure.flush();
    }
}

/// Set of peers keyed by address
///
/// Read-mostly: every write broadcasts under the read lock, attach and detach
/// take the write lock.
pub struct PeerFanout {
    label: String,
    capacity: usize,
    peers: RwLock<HashMap<SocketAddr, Peer>>,
}

impl PeerFanout {
    /// Create an empty fan-out whose peers queue up to `capacity` chunks
    pub fn new(label: impl Into<String>, capacity: usize) -> Self {
        Self {
            label: label.into(),
            capacity: capacity.max(1),
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a peer and return the receiving end of its queue.
    ///
    /// Attaching an address that is already present replaces its queue; the
    /// old writer sees its queue close.
    pub async fn attach(&self, addr: SocketAddr) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let peer = Peer {
            tx,
            dropped: AtomicU64::new(0),
            backpressure: BackpressureTracker::new(format!("{}@{}", self.label, addr)),
        };

        let replaced = match self.peers.write().await.insert(addr, peer) {
            Some(old) => {
                old.retire();
                true
            }
            None => false,
        };
        tracing::debug!(sink = %self.label, peer = %addr, replaced = replaced, "Peer attached");
        rx
    }

    /// Remove a peer. Returns false if it was not attached.
    pub async fn detach(&self, addr: &SocketAddr) -> bool {
        match self.peers.write().await.remove(addr) {
            Some(peer) => {
                peer.retire();
                tracing::debug!(sink = %self.label, peer = %addr, "Peer detached");
                true
            }
            None => false,
        }
    }

    /// Offer `chunk` to every peer. Returns how many peers accepted it.
    pub async fn broadcast(&self, chunk: &Bytes) -> usize {
        let mut accepted = 0;
        let mut gone = Vec::new();

        {
            let peers = self.peers.read().await;
            for (addr, peer) in peers.iter() {
                match peer.tx.try_send(chunk.clone()) {
                    Ok(()) => {
                        accepted += 1;
                        peer.backpressure.report_pending();
                    }
                    Err(TrySendError::Full(dropped)) => {
                        peer.dropped.fetch_add(1, Ordering::Relaxed);
                        peer.backpressure.record_drop(dropped.len() as u64);
                    }
                    Err(TrySendError::Closed(_)) => gone.push(*addr),
                }
            }
        }

        // Writers that exited leave a closed queue behind
        if !gone.is_empty() {
            let mut peers = self.peers.write().await;
            for addr in gone {
                if peers.get(&addr).is_some_and(|p| p.tx.is_closed()) {
                    if let Some(peer) = peers.remove(&addr) {
                        peer.retire();
                    }
                    tracing::debug!(sink = %self.label, peer = %addr, "Peer removed");
                }
            }
        }

        accepted
    }

    /// Number of attached peers
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Chunks `addr` missed because its queue was full
    pub async fn dropped_chunks(&self, addr: &SocketAddr) -> Option<u64> {
        self.peers
            .read()
            .await
            .get(addr)
            .map(|p| p.dropped.load(Ordering::Relaxed))
    }

    /// Detach every peer
    pub async fn clear(&self) {
        for (_, peer) in self.peers.write().await.drain() {
            peer.retire();
        }
    }
}
