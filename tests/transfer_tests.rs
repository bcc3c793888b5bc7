//! End-to-end transfers over the loopback interface.
//!
//! Each test binds a [`Server`] on an OS-assigned port, runs it in a
//! background task until one stream completes, and drives a [`Client`]
//! against it.  Loss and reordering come from a seeded simulator so failures
//! are reproducible.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::UdpSocket;

use sack_over_udp::client::MAX_FIN_RETRIES;
use sack_over_udp::config::{ReceiverConfig, SenderConfig};
use sack_over_udp::session::CompletedTransfer;
use sack_over_udp::simulator::SimulatorConfig;
use sack_over_udp::source::StreamSource;
use sack_over_udp::state::ConnectionState;
use sack_over_udp::{send_stream, Client, ClientError, SeqRange, Server, TransferReport};

const TEST_DEADLINE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn spawn_server() -> (SocketAddr, tokio::task::JoinHandle<CompletedTransfer>) {
    let mut server = Server::bind(ReceiverConfig::new("127.0.0.1:0".parse().unwrap()))
        .await
        .expect("bind server");
    let addr = server.local_addr();
    let handle = tokio::spawn(async move { server.next_transfer().await.expect("server loop") });
    (addr, handle)
}

fn sender_config(peer: SocketAddr, simulator: SimulatorConfig) -> SenderConfig {
    let mut config = SenderConfig::new(peer).with_ack_timeout(Duration::from_millis(40));
    config.simulator = simulator;
    config.timer.max_consecutive_timeouts = Some(200);
    config
}

fn text(len: usize) -> String {
    (0..len)
        .map(|i| match i % 64 {
            63 => '\n',
            n => (b'a' + (n % 26) as u8) as char,
        })
        .collect()
}

async fn transfer(data: String, simulator: SimulatorConfig) -> (TransferReport, CompletedTransfer) {
    let (addr, server) = spawn_server().await;
    let client = Client::new(sender_config(addr, simulator), StreamSource::new(data))
        .await
        .expect("client");

    tokio::time::timeout(TEST_DEADLINE, async move {
        let report = client.run().await.expect("client run");
        let done = server.await.expect("server task");
        (report, done)
    })
    .await
    .expect("transfer timed out")
}

/// A hand-driven receiver. Every `data` is acked with its own range. The
/// first `fin_answered_at - 1` fins get a late `ack`, the next one gets
/// `fin`; with `None` fins are never answered.  Returns the number of fins
/// seen once the sender goes quiet.
async fn scripted_receiver(sock: UdpSocket, fin_answered_at: Option<usize>) -> usize {
    let mut buf = vec![0u8; 2048];
    let mut fins = 0;
    loop {
        let (n, from) =
            match tokio::time::timeout(Duration::from_millis(500), sock.recv_from(&mut buf)).await {
                Ok(received) => received.unwrap(),
                Err(_quiet) => return fins,
            };
        let msg: Value = serde_json::from_slice(&buf[..n]).unwrap();
        let answer = match msg["type"].as_str() {
            Some("data") => Some(json!({
                "type": "ack",
                "sacks": [msg["seq"].clone()],
                "id": msg["id"].clone(),
            })),
            Some("fin") => {
                fins += 1;
                match fin_answered_at {
                    Some(at) if fins == at => Some(json!({"type": "fin"})),
                    Some(_) => Some(json!({"type": "ack", "sacks": [], "id": 0})),
                    None => None,
                }
            }
            other => panic!("unexpected packet type {other:?}"),
        };
        if let Some(answer) = answer {
            sock.send_to(answer.to_string().as_bytes(), from).await.unwrap();
        }
        if fin_answered_at == Some(fins) {
            return fins;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_link_delivers_stream() {
    let data = text(10_000);
    let (addr, server) = spawn_server().await;
    let config = sender_config(addr, SimulatorConfig::default());
    let source = StreamSource::new(data.clone());
    let report = tokio::time::timeout(TEST_DEADLINE, send_stream(config, source))
        .await
        .expect("transfer timed out")
        .expect("client run");
    let done = server.await.expect("server task");

    assert_eq!(done.data, data);
    assert!(done.delivered_all);
    assert!(report.fin_acknowledged);
    assert_eq!(report.length, data.len() as u64);
    assert_eq!(report.simulated_drops, 0);
}

#[tokio::test]
async fn short_tail_segment_is_delivered() {
    // Not a multiple of the payload size.
    let data = text(3000);
    let (report, done) = transfer(data.clone(), SimulatorConfig::default()).await;
    assert_eq!(done.data, data);
    assert!(report.packets_sent >= 3);
}

#[tokio::test]
async fn reordered_link_delivers_in_order() {
    let data = text(40_000);
    let sim = SimulatorConfig {
        loss_rate: 0.0,
        reorder_window: 5,
        seed: Some(11),
    };
    let (_, done) = transfer(data.clone(), sim).await;
    assert_eq!(done.data, data);
    assert!(done.delivered_all);
}

#[tokio::test]
async fn lossy_reordered_link_delivers_in_order() {
    let data = text(60_000);
    let sim = SimulatorConfig {
        loss_rate: 0.2,
        reorder_window: 4,
        seed: Some(7),
    };
    let (report, done) = transfer(data.clone(), sim).await;

    assert_eq!(done.data, data);
    assert!(done.delivered_all);
    assert!(report.simulated_drops > 0);
    assert!(report.retransmissions > 0);
}

#[tokio::test]
async fn multibyte_text_round_trips() {
    let data: String = "mostly ascii, with an accent: café → done\n".repeat(150);
    let (report, done) = transfer(data.clone(), SimulatorConfig::default()).await;
    assert_eq!(done.data, data);
    assert_eq!(report.length, data.chars().count() as u64);
}

#[tokio::test]
async fn empty_stream_still_closes() {
    let (addr, _server) = spawn_server().await;
    let config = sender_config(addr, SimulatorConfig::default());
    let client = Client::new(config, StreamSource::new(String::new()))
        .await
        .expect("client");

    let report = tokio::time::timeout(TEST_DEADLINE, client.run())
        .await
        .expect("timed out")
        .expect("client run");
    assert_eq!(report.packets_sent, 0);
    // No session exists, but the fin is still answered.
    assert!(report.fin_acknowledged);
}

#[tokio::test]
async fn gives_up_on_silent_peer() {
    // Bound but never read from: every deadline expires.
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut config = sender_config(silent.local_addr().unwrap(), SimulatorConfig::default());
    config.timer.ack_timeout = Duration::from_millis(10);
    config.timer.max_consecutive_timeouts = Some(3);

    let client = Client::new(config, StreamSource::new(text(5000)))
        .await
        .expect("client");
    let err = tokio::time::timeout(TEST_DEADLINE, client.run())
        .await
        .expect("timed out")
        .unwrap_err();
    assert!(matches!(err, ClientError::PeerUnresponsive { timeouts: 4, .. }));
}

#[tokio::test]
async fn rejects_window_smaller_than_a_packet() {
    let mut config = SenderConfig::new("127.0.0.1:9".parse().unwrap());
    config.recv_window = 1000;
    let err = Client::new(config, StreamSource::new(text(10))).await.err().unwrap();
    assert!(matches!(err, ClientError::Config(_)));
}

#[tokio::test]
async fn fin_is_resent_after_late_ack() {
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = sock.local_addr().unwrap();
    let receiver = tokio::spawn(scripted_receiver(sock, Some(2)));

    let client = Client::new(
        sender_config(addr, SimulatorConfig::default()),
        StreamSource::new("hello fin".into()),
    )
    .await
    .expect("client");
    assert_eq!(client.state(), ConnectionState::Transferring);

    let report = tokio::time::timeout(TEST_DEADLINE, client.run())
        .await
        .expect("timed out")
        .expect("client run");
    assert!(report.fin_acknowledged);
    assert_eq!(receiver.await.unwrap(), 2);
}

#[tokio::test]
async fn closes_after_unanswered_fins() {
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = sock.local_addr().unwrap();
    let receiver = tokio::spawn(scripted_receiver(sock, None));

    let mut config = sender_config(addr, SimulatorConfig::default());
    config.timer.ack_timeout = Duration::from_millis(10);
    let source = StreamSource::new(text(100));
    let report = tokio::time::timeout(TEST_DEADLINE, send_stream(config, source))
        .await
        .expect("timed out")
        .expect("client run");

    assert!(!report.fin_acknowledged);
    // A late data ack during close adds a fin that is not a retry.
    assert!(receiver.await.unwrap() > MAX_FIN_RETRIES as usize);
}

#[tokio::test]
async fn oversized_segment_names_its_range() {
    // Every quote is escaped on the wire, doubling the segment size.
    let data = "\"".repeat(1300);
    let config = SenderConfig::new("127.0.0.1:9".parse().unwrap());
    let err = tokio::time::timeout(TEST_DEADLINE, send_stream(config, StreamSource::new(data)))
        .await
        .expect("timed out")
        .unwrap_err();

    match err {
        ClientError::Unencodable { range, .. } => assert_eq!(range, SeqRange::new(0, 1200)),
        other => panic!("unexpected error {other}"),
    }
}
