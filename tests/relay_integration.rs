//! End-to-end relay runs over loopback sockets

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use relay_rs::inbound::{TcpInbound, TcpInboundOptions, UdpInbound, UdpInboundOptions};
use relay_rs::outbound::{TcpOutbound, TcpOutboundOptions};
use relay_rs::pipe::Destination;
use relay_rs::{
    Component, ConfigError, ConnectionError, EngineConfig, Error, FailurePolicy, Relay,
    RelayDocument, RelayState, Result, Sink, Source,
};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Yields its chunks in order, then reports the stream closed
struct Scripted {
    chunks: Mutex<VecDeque<Bytes>>,
}

impl Scripted {
    fn new(chunks: Vec<Bytes>) -> Arc<Self> {
        Arc::new(Self {
            chunks: Mutex::new(chunks.into()),
        })
    }
}

#[async_trait]
impl Component for Scripted {
    async fn init(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Source for Scripted {
    async fn read(&self, buf: &mut BytesMut) -> Result<usize> {
        let next = self.chunks.lock().unwrap().pop_front();
        match next {
            Some(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Err(ConnectionError::Closed.into()),
        }
    }
}

/// Endless one-byte chunks, one per millisecond
struct Metronome;

#[async_trait]
impl Component for Metronome {
    async fn init(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Source for Metronome {
    async fn read(&self, buf: &mut BytesMut) -> Result<usize> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        buf[0] = b'.';
        Ok(1)
    }
}

struct Collector {
    delay: Option<Duration>,
    fail: bool,
    written: Mutex<Vec<Bytes>>,
}

impl Collector {
    fn fast() -> Arc<Self> {
        Self::build(None, false)
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Self::build(Some(delay), false)
    }

    fn failing() -> Arc<Self> {
        Self::build(None, true)
    }

    fn build(delay: Option<Duration>, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fail,
            written: Mutex::new(Vec::new()),
        })
    }

    fn written(&self) -> Vec<Bytes> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl Component for Collector {
    async fn init(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Sink for Collector {
    async fn write(&self, chunk: Bytes) -> Result<usize> {
        if self.fail {
            return Err(ConnectionError::Reset("refused".into()).into());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.written.lock().unwrap().push(chunk.clone());
        Ok(chunk.len())
    }
}

/// Start `relay` in the background; the returned sender stops it
async fn start(relay: Relay) -> (Arc<Relay>, oneshot::Sender<()>, JoinHandle<Result<()>>) {
    let mut states = relay.subscribe_state();
    let relay = Arc::new(relay);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn({
        let relay = Arc::clone(&relay);
        async move {
            relay
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
        }
    });

    tokio::time::timeout(
        TIMEOUT,
        states.wait_for(|s| *s != RelayState::Created && *s != RelayState::Initialized),
    )
    .await
    .expect("relay did not start")
    .expect("relay dropped");

    (relay, stop_tx, handle)
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn wait_for_peers(sink: &TcpOutbound, count: usize) {
    tokio::time::timeout(TIMEOUT, async {
        while sink.peer_count().await < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("peers did not connect");
}

async fn read_at_least(stream: &mut TcpStream, want: usize) -> Vec<u8> {
    let mut got = Vec::new();
    let mut buf = [0u8; 4096];
    tokio::time::timeout(TIMEOUT, async {
        while got.len() < want {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed early");
            got.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .expect("data did not arrive");
    got
}

fn tcp_outbound(id: &str) -> Arc<TcpOutbound> {
    Arc::new(TcpOutbound::new(
        id,
        TcpOutboundOptions {
            address: "127.0.0.1:0".into(),
            buffer_size: 1024,
            write_timeout_ms: None,
        },
    ))
}

#[tokio::test]
async fn test_slow_and_fast_destination() {
    let x = Collector::slow(Duration::from_millis(50));
    let y = Collector::fast();
    let input = vec![
        Bytes::from_static(b"a"),
        Bytes::from_static(b"b"),
        Bytes::from_static(b"c"),
    ];

    let mut relay = Relay::new(EngineConfig::default());
    relay
        .table_mut()
        .add_source("s", Scripted::new(input.clone()))
        .unwrap();
    relay.table_mut().add_sink("x", x.clone()).unwrap();
    relay.table_mut().add_sink("y", y.clone()).unwrap();
    relay.add_pipe(
        "s",
        [Destination::with_capacity("x", 1), Destination::with_capacity("y", 100)],
    );

    let stats = relay.stats();
    tokio::time::timeout(TIMEOUT, relay.run()).await.unwrap().unwrap();

    assert_eq!(y.written(), input);

    let got = x.written();
    assert!(got.len() < input.len());
    let mut remaining = input.iter();
    for chunk in &got {
        assert!(remaining.any(|c| c == chunk), "out of order: {:?}", got);
    }

    let edge = stats.edge("s").unwrap();
    assert!(edge.destination("x").unwrap().chunks_dropped >= 1);
    assert_eq!(edge.destination("y").unwrap().chunks_dropped, 0);
}

#[tokio::test]
async fn test_failing_destination_isolated() {
    let bad = Collector::failing();
    let good = Collector::fast();
    let input: Vec<Bytes> = (0..100).map(|i| Bytes::from(format!("{:03}", i))).collect();

    let mut relay = Relay::new(EngineConfig::default());
    relay
        .table_mut()
        .add_source("s", Scripted::new(input.clone()))
        .unwrap();
    relay.table_mut().add_sink("bad", bad).unwrap();
    relay.table_mut().add_sink("good", good.clone()).unwrap();
    relay.add_pipe("s", ["bad", "good"]);

    let stats = relay.stats();
    tokio::time::timeout(TIMEOUT, relay.run()).await.unwrap().unwrap();

    assert_eq!(good.written(), input);
    let bad_stats = stats.edge("s").unwrap().destination("bad").cloned().unwrap();
    assert!(bad_stats.stopped);
    assert_eq!(relay.state(), RelayState::Stopped);
}

#[tokio::test]
async fn test_failing_destination_aborts_relay() {
    let config = EngineConfig::default().failure_policy(FailurePolicy::Abort);
    let mut relay = Relay::new(config);
    relay
        .table_mut()
        .add_source("s", Arc::new(Metronome))
        .unwrap();
    relay
        .table_mut()
        .add_sink("bad", Collector::failing())
        .unwrap();
    relay
        .table_mut()
        .add_sink("good", Collector::fast())
        .unwrap();
    relay.add_pipe("s", ["bad", "good"]);

    let result = tokio::time::timeout(TIMEOUT, relay.run()).await.unwrap();
    assert!(matches!(
        result,
        Err(Error::Connection(ConnectionError::Reset(_)))
    ));
    assert_eq!(relay.state(), RelayState::Stopped);
}

#[tokio::test]
async fn test_tcp_to_tcp_in_order() {
    let inbound = Arc::new(TcpInbound::new(
        "ingest",
        TcpInboundOptions {
            address: "127.0.0.1:0".into(),
            read_timeout_ms: None,
        },
    ));
    let outbound = tcp_outbound("viewers");

    let mut relay = Relay::new(EngineConfig::default());
    relay
        .table_mut()
        .add_source("ingest", Arc::clone(&inbound))
        .unwrap();
    relay
        .table_mut()
        .add_sink("viewers", Arc::clone(&outbound))
        .unwrap();
    relay.add_pipe("ingest", ["viewers"]);

    let (relay, stop, handle) = start(relay).await;

    let mut viewer = TcpStream::connect(outbound.local_addr().unwrap())
        .await
        .unwrap();
    wait_for_peers(&outbound, 1).await;

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let mut publisher = TcpStream::connect(inbound.local_addr().unwrap())
        .await
        .unwrap();
    publisher.write_all(&payload).await.unwrap();

    let got = read_at_least(&mut viewer, payload.len()).await;
    assert_eq!(got, payload);

    stop.send(()).unwrap();
    tokio::time::timeout(TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(relay.state(), RelayState::Stopped);

    let edge = relay.stats().edge("ingest").unwrap();
    assert_eq!(edge.bytes_read, payload.len() as u64);
}

#[tokio::test]
async fn test_udp_fan_out_to_two_sinks() {
    let inbound = Arc::new(UdpInbound::new(
        "cam",
        UdpInboundOptions {
            address: "127.0.0.1:0".into(),
        },
    ));
    let collector = Collector::fast();
    let outbound = tcp_outbound("viewers");

    let mut relay = Relay::new(EngineConfig::default());
    relay
        .table_mut()
        .add_source("cam", Arc::clone(&inbound))
        .unwrap();
    relay.table_mut().add_sink("log", collector.clone()).unwrap();
    relay
        .table_mut()
        .add_sink("viewers", Arc::clone(&outbound))
        .unwrap();
    relay.add_pipe("cam", ["log", "viewers"]);

    let (_relay, stop, handle) = start(relay).await;

    let mut viewer = TcpStream::connect(outbound.local_addr().unwrap())
        .await
        .unwrap();
    wait_for_peers(&outbound, 1).await;

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = inbound.local_addr().unwrap();
    sender.send_to(b"datagram-1", target).await.unwrap();
    sender.send_to(b"datagram-2", target).await.unwrap();

    assert_eq!(read_at_least(&mut viewer, 20).await, b"datagram-1datagram-2");
    wait_until(|| collector.written().len() == 2).await;
    assert_eq!(
        collector.written(),
        vec![
            Bytes::from_static(b"datagram-1"),
            Bytes::from_static(b"datagram-2")
        ]
    );

    stop.send(()).unwrap();
    tokio::time::timeout(TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_cat_round_trip() {
    let inbound = Arc::new(UdpInbound::new(
        "cam",
        UdpInboundOptions {
            address: "127.0.0.1:0".into(),
        },
    ));
    let outbound = tcp_outbound("viewers");

    let mut relay = Relay::with_builtin_adapters(EngineConfig::default());
    relay
        .table_mut()
        .add_source("cam", Arc::clone(&inbound))
        .unwrap();
    relay
        .add_duplex("cat", "exec", json!({ "path": "cat" }))
        .unwrap();
    relay
        .table_mut()
        .add_sink("viewers", Arc::clone(&outbound))
        .unwrap();
    relay.add_pipe("cam", ["cat"]);
    relay.add_pipe("cat", ["viewers"]);

    let (relay, stop, handle) = start(relay).await;

    let mut viewer = TcpStream::connect(outbound.local_addr().unwrap())
        .await
        .unwrap();
    wait_for_peers(&outbound, 1).await;

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .send_to(b"through the pipe", inbound.local_addr().unwrap())
        .await
        .unwrap();

    assert_eq!(read_at_least(&mut viewer, 16).await, b"through the pipe");

    stop.send(()).unwrap();
    tokio::time::timeout(TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(relay.state(), RelayState::Stopped);
}

#[tokio::test]
async fn test_document_builds_topology() {
    let doc: RelayDocument = r#"{
        "engine": { "queue_capacity": 16 },
        "inbounds": [ { "id": "cam", "type": "udp", "options": { "address": "127.0.0.1:0" } } ],
        "outbounds": [
            { "id": "viewers", "type": "tcp", "options": { "address": "127.0.0.1:0" } },
            { "id": "web", "type": "rtp", "options": {
                "signal_address": "127.0.0.1:0",
                "tracks": [ { "id": "video", "stream_id": "main", "payload_type": 96 } ]
            } }
        ],
        "pipes": [ { "in": "cam", "outs": ["viewers", { "id": "web:video", "queue_capacity": 4 }] } ]
    }"#
    .parse()
    .unwrap();

    let relay = Relay::from_document(doc).unwrap();
    assert!(relay.table().contains_source("cam"));
    assert!(relay.table().contains_sink("viewers"));
    assert!(relay.table().contains_sink("web"));
    assert!(relay.table().contains_sink("web:video"));
    assert_eq!(relay.config().queue_capacity, 16);

    let (relay, stop, handle) = start(relay).await;
    assert_eq!(relay.state(), RelayState::Running);

    stop.send(()).unwrap();
    tokio::time::timeout(TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_document_errors() {
    let doc: RelayDocument =
        r#"{ "inbounds": [ { "id": "cam", "type": "srt", "options": {} } ] }"#
            .parse()
            .unwrap();
    assert!(matches!(
        Relay::from_document(doc),
        Err(Error::Config(ConfigError::UnknownType { .. }))
    ));

    let doc: RelayDocument =
        r#"{ "inbounds": [ { "id": "cam", "type": "udp", "options": { "adress": "x" } } ] }"#
            .parse()
            .unwrap();
    assert!(matches!(
        Relay::from_document(doc),
        Err(Error::Config(ConfigError::InvalidOptions { .. }))
    ));

    // Unresolved pipes are caught before any component starts
    let doc: RelayDocument = r#"{
        "outbounds": [ { "id": "viewers", "type": "tcp", "options": { "address": "127.0.0.1:0" } } ],
        "pipes": [ { "in": "nobody", "outs": ["viewers"] } ]
    }"#
    .parse()
    .unwrap();
    let relay = Relay::from_document(doc).unwrap();
    assert!(matches!(
        relay.run().await,
        Err(Error::Config(ConfigError::UnknownSource(_)))
    ));
    assert_eq!(relay.state(), RelayState::Created);
}
