//! Relay server integration tests over real WebSocket connections.

use driftsync::config::SyncConfig;
use driftsync::event::{self, FileEvent, Op};
use driftsync::hash::sha256_hex;
use driftsync::hub::ServerHub;
use driftsync::index::{FileIndex, NewFileRecord, SqliteIndex};
use driftsync::relay::RelayServer;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const PAST: &str = "2024-10-22 14:32:45.123456789 -0400 EDT";

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("driftsync=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

struct Relay {
    addr: SocketAddr,
    server: Arc<RelayServer>,
    index: Arc<SqliteIndex>,
    cfg: SyncConfig,
    _tmp: TempDir,
}

async fn start_relay(max_conns: usize) -> Relay {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let cfg = SyncConfig::new(tmp.path());
    std::fs::create_dir(cfg.storage_dir()).unwrap();
    std::fs::write(cfg.abs("storage/file-1.txt"), b"authoritative copy").unwrap();

    let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
    index
        .create_file(NewFileRecord {
            path: "storage/file-1.txt".into(),
            hash: sha256_hex(b"authoritative copy"),
            created_at: PAST.into(),
            updated_at: PAST.into(),
            is_dir: false,
        })
        .unwrap();

    let shared: Arc<dyn FileIndex> = index.clone();
    let hub = ServerHub::new(cfg.clone(), shared);
    let server = RelayServer::new(hub, max_conns);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server
        .clone()
        .router()
        .into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    Relay {
        addr,
        server,
        index,
        cfg,
        _tmp: tmp,
    }
}

async fn connect(addr: &SocketAddr) -> WsClient {
    let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

async fn wait_for_peers(server: &Arc<RelayServer>, count: usize) {
    for _ in 0..100 {
        if server.peer_count().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("peer count never reached {count}");
}

async fn next_binary(socket: &mut WsClient) -> Vec<u8> {
    loop {
        let frame = timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("read error");
        if let Message::Binary(payload) = frame {
            return payload;
        }
    }
}

async fn expect_silence(socket: &mut WsClient) {
    if let Ok(Some(Ok(Message::Binary(payload)))) =
        timeout(Duration::from_millis(500), socket.next()).await
    {
        let event = event::decode_event(&payload).unwrap();
        panic!("unexpected frame: {} {}", event.op, event.path);
    }
}

#[tokio::test]
async fn over_capacity_connections_are_rejected() {
    let relay = start_relay(1).await;

    let _first = connect(&relay.addr).await;
    wait_for_peers(&relay.server, 1).await;

    let err = connect_async(format!("ws://{}/ws", relay.addr))
        .await
        .expect_err("second connection should be rejected");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 503);
        }
        other => panic!("expected HTTP rejection, got: {other}"),
    }
}

#[tokio::test]
async fn update_request_is_answered_to_originator_only() {
    let relay = start_relay(4).await;

    let mut requester = connect(&relay.addr).await;
    let mut bystander = connect(&relay.addr).await;
    wait_for_peers(&relay.server, 2).await;

    let request = FileEvent::update("storage/file-1.txt".into());
    requester
        .send(Message::Binary(event::encode(&request).unwrap()))
        .await
        .unwrap();

    let payload = next_binary(&mut requester).await;
    let reply = event::decode_event(&payload).unwrap();
    assert_eq!(reply.op, Op::Write);
    assert_eq!(reply.path, "storage/file-1.txt");
    assert_eq!(reply.data, b"authoritative copy");
    assert_eq!(reply.hash, sha256_hex(b"authoritative copy"));

    expect_silence(&mut bystander).await;
}

#[tokio::test]
async fn events_broadcast_to_everyone_but_the_sender() {
    let relay = start_relay(4).await;

    let mut sender = connect(&relay.addr).await;
    let mut receiver = connect(&relay.addr).await;
    wait_for_peers(&relay.server, 2).await;

    let data = b"created over the wire".to_vec();
    let created = FileEvent::create_file("storage/new.txt".into(), data.clone(), sha256_hex(&data));
    sender
        .send(Message::Binary(event::encode(&created).unwrap()))
        .await
        .unwrap();

    let payload = next_binary(&mut receiver).await;
    let forwarded = event::decode_event(&payload).unwrap();
    assert_eq!(forwarded, created);

    // the relay applied it before forwarding
    assert_eq!(std::fs::read(relay.cfg.abs("storage/new.txt")).unwrap(), data);
    let row = relay.index.get_file("storage/new.txt").unwrap();
    assert_eq!(row.hash, sha256_hex(&data));

    expect_silence(&mut sender).await;
}

#[tokio::test]
async fn failed_events_do_not_kill_the_connection() {
    let relay = start_relay(4).await;

    let mut client = connect(&relay.addr).await;
    wait_for_peers(&relay.server, 1).await;

    // applying this fails (parent is a file), but the connection survives
    let bad = FileEvent::create_file(
        "storage/file-1.txt/nested.txt".into(),
        b"x".to_vec(),
        sha256_hex(b"x"),
    );
    client
        .send(Message::Binary(event::encode(&bad).unwrap()))
        .await
        .unwrap();

    // a follow-up request still gets answered
    let request = FileEvent::update("storage/file-1.txt".into());
    client
        .send(Message::Binary(event::encode(&request).unwrap()))
        .await
        .unwrap();
    let reply = event::decode_event(&next_binary(&mut client).await).unwrap();
    assert_eq!(reply.op, Op::Write);
}

#[tokio::test]
async fn undecodable_frames_drop_the_connection() {
    let relay = start_relay(4).await;

    let mut client = connect(&relay.addr).await;
    wait_for_peers(&relay.server, 1).await;

    client
        .send(Message::Binary(b"not an envelope".to_vec()))
        .await
        .unwrap();

    wait_for_peers(&relay.server, 0).await;
}

#[tokio::test]
async fn closed_peers_are_deregistered() {
    let relay = start_relay(4).await;

    let mut client = connect(&relay.addr).await;
    wait_for_peers(&relay.server, 1).await;

    client.close(None).await.unwrap();
    wait_for_peers(&relay.server, 0).await;
}
