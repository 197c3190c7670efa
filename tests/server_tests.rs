use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use fanout::broker::{BrokerCore, ClientId};
use fanout::config::ServerConfig;
use fanout::server::network;
use fanout::server::protocol::{
    FanoutCodec, FrameHeader, InboundFrame, OP_ECHO, OP_PUB, OP_SUB, OP_UNSUB, PUSH_TYPE_PUBSUB,
    STATUS_DATA, STATUS_ERR, STATUS_OK, TYPE_PUSH, TYPE_RESPONSE,
};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;

mod helpers;
use helpers::{settle, setup_broker, RECV_TIMEOUT};

async fn start_server() -> (Arc<BrokerCore>, SocketAddr) {
    start_server_with(ServerConfig::default()).await
}

async fn start_server_with(config: ServerConfig) -> (Arc<BrokerCore>, SocketAddr) {
    let core = setup_broker();
    let listener = network::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(network::serve_listener(listener, Arc::clone(&core), config));
    (core, addr)
}

fn request_frame(opcode: u8, id: u32, payload: &[u8]) -> BytesMut {
    let header = FrameHeader::request(opcode, id, payload.len() as u32);
    let mut buf = BytesMut::with_capacity(FrameHeader::SIZE + payload.len());
    buf.extend_from_slice(bytemuck::bytes_of(&header));
    buf.extend_from_slice(payload);
    buf
}

/// Writes `count` echo requests back to back without waiting for any response.
fn pipeline_echoes(mut writer: OwnedWriteHalf, count: u32) -> tokio::task::JoinHandle<OwnedWriteHalf> {
    tokio::spawn(async move {
        for id in 1..=count {
            let frame = request_frame(OP_ECHO, id, &id.to_be_bytes());
            writer.write_all(&frame).await.expect("write");
        }
        writer
    })
}

struct TestClient {
    reader: FramedRead<OwnedReadHalf, FanoutCodec>,
    writer: OwnedWriteHalf,
    pushes: VecDeque<InboundFrame>,
    next_id: u32,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            reader: FramedRead::new(reader, FanoutCodec::new()),
            writer,
            pushes: VecDeque::new(),
            next_id: 1,
        }
    }

    async fn request(&mut self, opcode: u8, payload: &[u8]) -> InboundFrame {
        let id = self.next_id;
        self.next_id += 1;

        let buf = request_frame(opcode, id, payload);
        self.writer.write_all(&buf).await.expect("write");

        loop {
            let frame = self.next_frame().await.expect("connection closed before response");
            if frame.header.frame_type == TYPE_PUSH {
                self.pushes.push_back(frame);
                continue;
            }
            assert_eq!(frame.header.frame_type, TYPE_RESPONSE);
            assert_eq!(frame.header.id(), id);
            return frame;
        }
    }

    async fn subscribe(&mut self, pattern: &str) -> InboundFrame {
        self.request(OP_SUB, &prefixed(pattern, b"")).await
    }

    async fn unsubscribe(&mut self, pattern: &str) -> InboundFrame {
        self.request(OP_UNSUB, &prefixed(pattern, b"")).await
    }

    async fn publish(&mut self, topic: &str, data: &[u8]) -> InboundFrame {
        self.request(OP_PUB, &prefixed(topic, data)).await
    }

    async fn next_push(&mut self) -> (String, Bytes) {
        let frame = match self.pushes.pop_front() {
            Some(frame) => frame,
            None => self.next_frame().await.expect("connection closed before push"),
        };
        assert_eq!(frame.header.frame_type, TYPE_PUSH);
        assert_eq!(frame.header.meta, PUSH_TYPE_PUBSUB);

        let payload = frame.payload;
        let mut len = [0u8; 4];
        len.copy_from_slice(&payload[..4]);
        let topic_len = u32::from_be_bytes(len) as usize;
        let topic = String::from_utf8(payload[4..4 + topic_len].to_vec()).expect("utf8 topic");
        (topic, payload.slice(4 + topic_len..))
    }

    async fn next_frame(&mut self) -> Option<InboundFrame> {
        tokio::time::timeout(RECV_TIMEOUT, self.reader.next())
            .await
            .expect("timed out waiting for frame")
            .map(|frame| frame.expect("valid frame"))
    }
}

fn prefixed(s: &str, rest: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
    buf.put_slice(rest);
    buf.to_vec()
}

fn error_message(frame: &InboundFrame) -> String {
    assert_eq!(frame.header.meta, STATUS_ERR);
    String::from_utf8(frame.payload[4..].to_vec()).expect("utf8 message")
}

#[tokio::test]
async fn test_publish_reaches_wildcard_subscriber_over_tcp() {
    let (_core, addr) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    let mut c = TestClient::connect(addr).await;

    assert_eq!(a.subscribe("sensors/+/temp").await.header.meta, STATUS_OK);
    assert_eq!(c.publish("sensors/kitchen/temp", b"21.5").await.header.meta, STATUS_OK);

    let (topic, data) = a.next_push().await;
    assert_eq!(topic, "sensors/kitchen/temp");
    assert_eq!(&data[..], b"21.5");
}

#[tokio::test]
async fn test_unsubscribe_over_tcp() {
    let (core, addr) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;

    a.subscribe("news/#").await;
    assert_eq!(a.unsubscribe("news/#").await.header.meta, STATUS_OK);
    b.publish("news/today", b"x").await;
    a.subscribe("other").await;
    b.publish("other", b"marker").await;

    // Only the marker arrives; the earlier publish had no subscriber.
    let (topic, _) = a.next_push().await;
    assert_eq!(topic, "other");
    assert_eq!(settle(&core).await.subscriptions, 1);
}

#[tokio::test]
async fn test_errors_are_reported_per_request() {
    let (_core, addr) = start_server().await;
    let mut client = TestClient::connect(addr).await;

    let bad_filter = client.subscribe("a/#/b").await;
    assert!(error_message(&bad_filter).contains("last segment"));

    let bad_topic = client.publish("a/+", b"x").await;
    assert!(error_message(&bad_topic).contains("wildcard"));

    let unknown = client.request(0x7F, b"").await;
    assert!(error_message(&unknown).contains("Unknown opcode"));

    let truncated = client.request(OP_SUB, &[0, 0]).await;
    assert_eq!(truncated.header.meta, STATUS_ERR);

    // The connection survives request-level errors.
    let echo = client.request(OP_ECHO, b"ping").await;
    assert_eq!(echo.header.meta, STATUS_DATA);
    assert_eq!(&echo.payload[..], b"ping");
}

#[tokio::test]
async fn test_closing_socket_drops_subscriptions() {
    let (core, addr) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    client.subscribe("a/#").await;
    client.subscribe("b").await;
    assert_eq!(settle(&core).await.active_clients, 1);

    drop(client);

    let mut cleaned = false;
    for _ in 0..100 {
        let snapshot = settle(&core).await;
        if snapshot.active_clients == 0 && snapshot.subscriptions == 0 {
            cleaned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleaned, "server should deregister closed connections");
}

#[tokio::test]
async fn test_stop_closes_connections() {
    let (core, addr) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    client.subscribe("t").await;

    core.stop().await;

    assert!(client.next_frame().await.is_none());
    assert!(!core.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipelined_requests_all_answered_with_tiny_channels() {
    const REQUESTS: u32 = 5_000;
    let (_core, addr) = start_server_with(ServerConfig {
        channel_capacity_socket_write: 2,
        ..ServerConfig::default()
    })
    .await;
    let TestClient { mut reader, writer, .. } = TestClient::connect(addr).await;

    let writer_task = pipeline_echoes(writer, REQUESTS);

    for expected in 1..=REQUESTS {
        let frame = tokio::time::timeout(RECV_TIMEOUT, reader.next())
            .await
            .unwrap_or_else(|_| panic!("stalled after {} responses", expected - 1))
            .expect("connection closed")
            .expect("valid frame");
        assert_eq!(frame.header.frame_type, TYPE_RESPONSE);
        assert_eq!(frame.header.id(), expected, "responses keep request order");
        assert_eq!(&frame.payload[..], &expected.to_be_bytes());
    }
    writer_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_requests_keep_flowing_under_push_flood() {
    const REQUESTS: u32 = 2_000;
    const PUBLISHES: usize = 20_000;
    let (core, addr) = start_server().await;
    let mut subscriber = TestClient::connect(addr).await;
    assert_eq!(subscriber.subscribe("t").await.header.meta, STATUS_OK);
    let TestClient { mut reader, writer, .. } = subscriber;

    let flood = {
        let core = Arc::clone(&core);
        tokio::spawn(async move {
            let publisher = ClientId::new("flood");
            for _ in 0..PUBLISHES {
                core.on_publish(&publisher, "t", "payload").await.expect("publish");
            }
        })
    };
    let writer_task = pipeline_echoes(writer, REQUESTS);

    let mut responses = 0;
    while responses < REQUESTS {
        let frame = tokio::time::timeout(RECV_TIMEOUT, reader.next())
            .await
            .unwrap_or_else(|_| panic!("stalled after {} responses", responses))
            .expect("connection closed")
            .expect("valid frame");
        if frame.header.frame_type == TYPE_RESPONSE {
            responses += 1;
            assert_eq!(frame.header.id(), responses);
        }
    }

    flood.await.unwrap();
    writer_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_closes_connection_with_unread_backlog() {
    let (core, addr) = start_server_with(ServerConfig {
        channel_capacity_socket_write: 2,
        ..ServerConfig::default()
    })
    .await;
    let TestClient { mut reader, writer, .. } = TestClient::connect(addr).await;

    // Nobody reads while the backlog builds, so every channel on the path fills up.
    let writer_task = pipeline_echoes(writer, 50_000);
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(5), core.stop())
        .await
        .expect("stop should not wait on a stuck session");

    let mut closed = false;
    for _ in 0..200_000 {
        match tokio::time::timeout(RECV_TIMEOUT, reader.next()).await {
            Ok(None) | Ok(Some(Err(_))) => {
                closed = true;
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Err(_) => break,
        }
    }
    assert!(closed, "session should close its socket on shutdown");
    writer_task.abort();
}
