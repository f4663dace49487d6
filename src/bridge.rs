//! Rendezvous bridge between push-driven receive loops and pull-style reads
//!
//! Network adapters usually own their socket inside a background task that
//! wants to receive "into whatever buffer is requested". The pumps, on the
//! other hand, call [`Source::read`](crate::component::Source::read) and
//! expect to get bytes back. [`AsyncReadBridge`] pairs the two:
//!
//! ```text
//!   pump task                         receive task
//!   ---------                         ------------
//!   read(&mut buf) ──── buf ────────► acquire() -> PendingRead
//!        │                                 │ socket.recv(pending.buf_mut())
//!        │ (suspended)                     │
//!        ◄──────────── buf, n ──────────── pending.complete(Ok(n))
//! ```
//!
//! The buffer is moved to the producer and moved back, never copied. The
//! producer cannot get ahead of the consumer: it has nothing to fill until a
//! read is pending. Only one read is in flight per bridge; a second caller
//! waits for the first to finish.
//!
//! A producer that never completes a pending read blocks the reader forever.
//! A producer that drops a pending read without completing it makes the
//! reader fail with [`ConnectionError::BridgeAbandoned`].

use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{ConnectionError, Result};

type Reply = oneshot::Sender<(BytesMut, Result<usize>)>;

/// Synchronous-read facade over a push-driven producer
pub struct AsyncReadBridge {
    requests_tx: mpsc::Sender<PendingRead>,
    requests_rx: Mutex<mpsc::Receiver<PendingRead>>,
    /// Held for the whole exchange so reads never interleave
    read_lock: Mutex<()>,
}

/// A read request handed to the producer
///
/// Must be finished with [`PendingRead::complete`]; completion consumes the
/// request so it can only happen once.
pub struct PendingRead {
    buf: BytesMut,
    reply: Reply,
}

impl AsyncReadBridge {
    /// Create an idle bridge
    pub fn new() -> Self {
        // Capacity 1 plus the read lock keeps at most one request in flight
        let (requests_tx, requests_rx) = mpsc::channel(1);
        Self {
            requests_tx,
            requests_rx: Mutex::new(requests_rx),
            read_lock: Mutex::new(()),
        }
    }

    /// Consumer side: offer `buf` to the producer and wait for the result.
    ///
    /// On return `buf` is the same allocation that was offered, with the
    /// first `n` bytes filled in.
    pub async fn read(&self, buf: &mut BytesMut) -> Result<usize> {
        let _guard = self.read_lock.lock().await;

        let (reply, done) = oneshot::channel();
        let request = PendingRead {
            buf: std::mem::take(buf),
            reply,
        };

        if let Err(mpsc::error::SendError(request)) = self.requests_tx.send(request).await {
            *buf = request.buf;
            return Err(ConnectionError::BridgeAbandoned.into());
        }

        match done.await {
            Ok((filled, result)) => {
                *buf = filled;
                result
            }
            Err(_) => Err(ConnectionError::BridgeAbandoned.into()),
        }
    }

    /// Producer side: wait until a read is pending and take its buffer.
    pub async fn acquire(&self) -> PendingRead {
        let mut requests = self.requests_rx.lock().await;
        while let Some(pending) = requests.recv().await {
            // The reader may have given up while the request sat in the channel
            if !pending.reply.is_closed() {
                return pending;
            }
        }
        // The bridge owns a sender, so the channel only closes on drop
        std::future::pending().await
    }
}

impl Default for AsyncReadBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRead {
    /// Buffer the producer should fill
    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..]
    }

    /// Capacity offered by the reader
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the reader offered an empty buffer
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Report the outcome of this read to the waiting reader
    pub fn complete(self, result: Result<usize>) {
        debug_assert!(result.as_ref().map_or(true, |n| *n <= self.buf.len()));
        // Reader may have been cancelled in the meantime
        let _ = self.reply.send((self.buf, result));
    }
}

impl std::fmt::Debug for PendingRead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRead")
            .field("len", &self.buf.len())
            .finish()
    }
}
