//! RTP outbound
//!
//! A real-time sink with a small HTTP signalling endpoint. Peers subscribe by
//! posting their UDP address; every configured track is then forwarded to
//! them, one datagram per chunk.
//!
//! ```text
//!   POST   /  {"address": "10.0.0.5:7000"}  -> subscribe to every track
//!   DELETE /  {"address": "10.0.0.5:7000"}  -> unsubscribe
//! ```
//!
//! Each track is its own sink, registered as `<outbound id>:<track id>`.
//! The outbound id itself only owns the signalling server and cannot be
//! written to.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::component::{Component, Sink};
use crate::error::{ConfigError, Error, Result};
use crate::registry::{BuildContext, Factory};

use super::peers::PeerFanout;

const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

fn default_signal_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_buffer_size() -> usize {
    256
}

/// One media track
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TrackOptions {
    /// Track id, unique within the outbound
    pub id: String,
    /// Stream the track belongs to
    pub stream_id: String,
    /// Rewrite the RTP payload type of every packet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<u8>,
}

/// Options of the `rtp` outbound
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RtpOutboundOptions {
    /// Address of the HTTP signalling endpoint
    #[serde(default = "default_signal_address")]
    pub signal_address: String,
    /// Per-peer queue length, in packets
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Tracks to expose
    pub tracks: Vec<TrackOptions>,
}

/// Signalling request body
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalRequest {
    /// UDP address the peer receives on
    pub address: SocketAddr,
}

/// Answer to a subscription
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalResponse {
    /// Outbound id
    pub id: String,
    /// Tracks the peer is now subscribed to
    pub tracks: Vec<TrackOptions>,
}

/// Sink for one track
pub struct RtpTrack {
    sink_id: String,
    options: TrackOptions,
    peers: PeerFanout,
}

impl RtpTrack {
    fn new(outbound_id: &str, options: TrackOptions, buffer_size: usize) -> Self {
        let sink_id = format!("{}:{}", outbound_id, options.id);
        Self {
            peers: PeerFanout::new(sink_id.clone(), buffer_size),
            sink_id,
            options,
        }
    }

    /// Registered sink id (`outbound:track`)
    pub fn sink_id(&self) -> &str {
        &self.sink_id
    }

    /// Number of subscribed peers
    pub async fn peer_count(&self) -> usize {
        self.peers.peer_count().await
    }
}

#[async_trait]
impl Component for RtpTrack {
    fn kind(&self) -> &'static str {
        "rtp-track"
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.peers.clear().await;
        Ok(())
    }
}

#[async_trait]
impl Sink for RtpTrack {
    async fn write(&self, chunk: Bytes) -> Result<usize> {
        let len = chunk.len();
        let packet = match self.options.payload_type {
            Some(pt) => rewrite_payload_type(chunk, pt),
            None => chunk,
        };
        self.peers.broadcast(&packet).await;
        Ok(len)
    }
}

/// Replace the 7-bit payload type, keeping the marker bit
fn rewrite_payload_type(packet: Bytes, pt: u8) -> Bytes {
    if packet.len() < 2 {
        return packet;
    }
    let mut packet = BytesMut::from(&packet[..]);
    packet[1] = (packet[1] & 0x80) | (pt & 0x7f);
    packet.freeze()
}

struct Signalling {
    id: String,
    tracks: Vec<Arc<RtpTrack>>,
    socket: Arc<UdpSocket>,
}

/// Track multiplexer with an HTTP signalling endpoint
pub struct RtpOutbound {
    id: String,
    options: RtpOutboundOptions,
    tracks: Vec<Arc<RtpTrack>>,
    local_addr: OnceLock<SocketAddr>,
    stop: CancellationToken,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl RtpOutbound {
    fn new(id: &str, options: RtpOutboundOptions) -> Self {
        let tracks = options
            .tracks
            .iter()
            .map(|t| Arc::new(RtpTrack::new(id, t.clone(), options.buffer_size)))
            .collect();
        Self {
            id: id.to_string(),
            options,
            tracks,
            local_addr: OnceLock::new(),
            stop: CancellationToken::new(),
            server_task: Mutex::new(None),
        }
    }

    /// Bound signalling address, available after `init`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Per-track sinks
    pub fn tracks(&self) -> &[Arc<RtpTrack>] {
        &self.tracks
    }
}

#[async_trait]
impl Component for RtpOutbound {
    fn kind(&self) -> &'static str {
        "rtp-outbound"
    }

    async fn init(&self) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::factory(&self.id, format!("bind media socket: {}", e)))?;
        let listener = TcpListener::bind(self.options.signal_address.as_str())
            .await
            .map_err(|e| {
                Error::factory(
                    &self.id,
                    format!("bind {}: {}", self.options.signal_address, e),
                )
            })?;
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);

        let app = router(Arc::new(Signalling {
            id: self.id.clone(),
            tracks: self.tracks.clone(),
            socket: Arc::new(socket),
        }));

        tracing::info!(
            id = %self.id,
            addr = %addr,
            tracks = self.tracks.len(),
            "RTP signalling listening"
        );

        let stop = self.stop.clone();
        let id = self.id.clone();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(stop.cancelled_owned());
            if let Err(e) = server.await {
                tracing::error!(id = %id, error = %e, "Signalling server failed");
            }
        });
        *self
            .server_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.stop.cancel();
        let handle = self
            .server_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            // Idle keep-alive connections would hold the graceful shutdown open
            if tokio::time::timeout(SERVER_STOP_TIMEOUT, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        tracing::info!(id = %self.id, "RTP outbound closed");
        Ok(())
    }
}

#[async_trait]
impl Sink for RtpOutbound {
    async fn write(&self, _chunk: Bytes) -> Result<usize> {
        let hint = match self.tracks.first() {
            Some(track) => format!("write to a track sink such as '{}'", track.sink_id()),
            None => "the outbound has no tracks".to_string(),
        };
        Err(ConfigError::NotWritable {
            id: self.id.clone(),
            hint,
        }
        .into())
    }
}

/// Signalling routes: `POST /` subscribes, `DELETE /` unsubscribes
fn router(state: Arc<Signalling>) -> Router {
    Router::new()
        .route("/", post(subscribe).delete(unsubscribe))
        .with_state(state)
}

async fn subscribe(
    State(state): State<Arc<Signalling>>,
    Json(req): Json<SignalRequest>,
) -> Json<SignalResponse> {
    for track in &state.tracks {
        let queue = track.peers.attach(req.address).await;
        tokio::spawn(send_loop(
            Arc::clone(&state.socket),
            queue,
            req.address,
            track.sink_id.clone(),
        ));
    }

    tracing::info!(id = %state.id, peer = %req.address, "Peer subscribed");

    Json(SignalResponse {
        id: state.id.clone(),
        tracks: state.tracks.iter().map(|t| t.options.clone()).collect(),
    })
}

async fn unsubscribe(
    State(state): State<Arc<Signalling>>,
    Json(req): Json<SignalRequest>,
) -> StatusCode {
    let mut removed = false;
    for track in &state.tracks {
        removed |= track.peers.detach(&req.address).await;
    }

    if removed {
        tracing::info!(id = %state.id, peer = %req.address, "Peer unsubscribed");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn send_loop(
    socket: Arc<UdpSocket>,
    mut queue: mpsc::Receiver<Bytes>,
    peer: SocketAddr,
    sink_id: String,
) {
    while let Some(packet) = queue.recv().await {
        if let Err(e) = socket.send_to(&packet, peer).await {
            // UDP send errors are transient (ICMP unreachable and the like)
            tracing::debug!(sink = %sink_id, peer = %peer, error = %e, "Send failed");
        }
    }
}

/// Constructor for the `rtp` outbound
pub struct RtpOutboundFactory;

impl Factory for RtpOutboundFactory {
    type Options = RtpOutboundOptions;
    type Output = RtpOutbound;

    fn build(&self, id: &str, options: RtpOutboundOptions, ctx: &mut BuildContext) -> Result<RtpOutbound> {
        if options.buffer_size == 0 {
            return Err(Error::factory(id, "buffer_size must be greater than zero"));
        }

        let outbound = RtpOutbound::new(id, options);
        for track in &outbound.tracks {
            ctx.add_sink(track.sink_id().to_string(), Arc::clone(track));
        }
        Ok(outbound)
    }
}
