//! End-to-end push/receive over a real TCP socket

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tokio::net::TcpStream;

use synco_core::protocol::{
    checksum_bytes, read_response, write_message, Message, ResponseCode,
};
use synco_core::vclock::VectorClock;
use synco_core::{ConflictStrategy, EventKind, FileEvent};
use synco_transport::{ReceiveServer, Syncer, TcpSyncer};

fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

async fn start_server(dst: &TempDir, node_id: &str, strategy: ConflictStrategy) -> (ReceiveServer, String) {
    let addr = free_addr();
    let server = ReceiveServer::new(dst.path(), &addr, node_id, strategy).unwrap();
    server.start().await.unwrap();
    // Give the accept loop a beat to come up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (server, addr)
}

async fn send_raw(addr: &str, msg: &Message) -> synco_core::Response {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_message(&mut stream, msg).await.unwrap();
    read_response(&mut stream).await.unwrap()
}

fn sync_msg(
    origin: &str,
    vclock: HashMap<String, u64>,
    path: &str,
    mod_time_nanos: i64,
    data: &[u8],
) -> Message {
    Message::sync(
        origin,
        vclock,
        path,
        mod_time_nanos,
        checksum_bytes(data),
        Bytes::copy_from_slice(data),
    )
}

#[tokio::test]
async fn test_push_merges_clocks_both_ways() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let (_server, addr) = start_server(&dst, "n2", ConflictStrategy::NewerWins).await;

    let file = src.path().join("f");
    tokio::fs::write(&file, "x").await.unwrap();

    let clock = Arc::new(VectorClock::new());
    let syncer = TcpSyncer::new(src.path(), &addr, "n1", Arc::clone(&clock)).unwrap();

    let result = syncer.handle(FileEvent::new(EventKind::Write, &file)).await;
    assert!(result.is_success(), "err: {:?}", result.err);

    assert_eq!(
        tokio::fs::read_to_string(dst.path().join("f")).await.unwrap(),
        "x"
    );

    // The pusher ticked itself, the receiver merged then ticked itself, and
    // the response carried the combined clock home.
    let snap = clock.snapshot();
    assert_eq!(snap.get("n1"), Some(&1));
    assert_eq!(snap.get("n2"), Some(&1));
}

#[tokio::test]
async fn test_stale_clock_is_skipped() {
    let dst = TempDir::new().unwrap();
    let (_server, addr) = start_server(&dst, "srv", ConflictStrategy::NewerWins).await;

    let newer = sync_msg("n1", HashMap::from([("n1".into(), 2)]), "f", 2_000, b"v2");
    assert_eq!(send_raw(&addr, &newer).await.code, ResponseCode::Ok);

    let stale = sync_msg("n1", HashMap::from([("n1".into(), 1)]), "f", 1_000, b"v1");
    let resp = send_raw(&addr, &stale).await;
    assert_eq!(resp.code, ResponseCode::Skip);

    assert_eq!(
        tokio::fs::read_to_string(dst.path().join("f")).await.unwrap(),
        "v2",
        "stale write must not touch the destination"
    );
}

#[tokio::test]
async fn test_identical_content_skips_without_clock() {
    let dst = TempDir::new().unwrap();
    let (_server, addr) = start_server(&dst, "srv", ConflictStrategy::NewerWins).await;

    let msg = sync_msg("n1", HashMap::from([("n1".into(), 1)]), "same", 1_000, b"idempotent");
    assert_eq!(send_raw(&addr, &msg).await.code, ResponseCode::Ok);

    // Retransmit with an *older* clock: the hash fast path answers first.
    let retransmit = sync_msg("n1", HashMap::new(), "same", 1_000, b"idempotent");
    assert_eq!(send_raw(&addr, &retransmit).await.code, ResponseCode::Skip);
}

#[tokio::test]
async fn test_concurrent_newer_incoming_overwrites() {
    let dst = TempDir::new().unwrap();
    let (_server, addr) = start_server(&dst, "srv", ConflictStrategy::NewerWins).await;

    let first = sync_msg("n1", HashMap::from([("n1".into(), 1)]), "f", 1_000, b"local");
    assert_eq!(send_raw(&addr, &first).await.code, ResponseCode::Ok);

    // Disjoint clock = concurrent; far-future mtime wins under NEWER_WINS.
    let future_nanos = (std::time::SystemTime::now() + Duration::from_secs(3600))
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64;
    let concurrent = sync_msg("n2", HashMap::from([("n2".into(), 1)]), "f", future_nanos, b"remote");

    let resp = send_raw(&addr, &concurrent).await;
    assert_eq!(resp.code, ResponseCode::Ok, "msg: {}", resp.msg);
    assert_eq!(
        tokio::fs::read_to_string(dst.path().join("f")).await.unwrap(),
        "remote"
    );
}

#[tokio::test]
async fn test_concurrent_older_incoming_skips() {
    let dst = TempDir::new().unwrap();
    let (_server, addr) = start_server(&dst, "srv", ConflictStrategy::NewerWins).await;

    let first = sync_msg("n1", HashMap::from([("n1".into(), 1)]), "f", 1_000, b"local");
    assert_eq!(send_raw(&addr, &first).await.code, ResponseCode::Ok);

    // Concurrent clock but an ancient mtime: the local file stays.
    let concurrent = sync_msg("n2", HashMap::from([("n2".into(), 1)]), "f", 1, b"remote");
    let resp = send_raw(&addr, &concurrent).await;

    assert_eq!(resp.code, ResponseCode::Skip);
    assert_eq!(resp.msg, "conflict: resolved as skip");
    assert_eq!(
        tokio::fs::read_to_string(dst.path().join("f")).await.unwrap(),
        "local"
    );
}

#[tokio::test]
async fn test_checksum_mismatch_rejected() {
    let dst = TempDir::new().unwrap();
    let (_server, addr) = start_server(&dst, "srv", ConflictStrategy::NewerWins).await;

    let mut msg = sync_msg("n1", HashMap::from([("n1".into(), 1)]), "bad", 1_000, b"payload");
    msg.checksum = checksum_bytes(b"something else");

    let resp = send_raw(&addr, &msg).await;
    assert_eq!(resp.code, ResponseCode::Err);
    assert_eq!(resp.msg, "checksum validation failed");
    assert!(!dst.path().join("bad").exists(), "payload must be discarded");
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let dst = TempDir::new().unwrap();
    let (_server, addr) = start_server(&dst, "srv", ConflictStrategy::NewerWins).await;

    tokio::fs::write(dst.path().join("doomed"), "x").await.unwrap();

    let resp = send_raw(&addr, &Message::delete("doomed")).await;
    assert_eq!(resp.code, ResponseCode::Ok);
    assert!(!dst.path().join("doomed").exists());

    // Deleting a missing file is still OK.
    let resp = send_raw(&addr, &Message::delete("doomed")).await;
    assert_eq!(resp.code, ResponseCode::Ok);
}

#[tokio::test]
async fn test_ping() {
    let dst = TempDir::new().unwrap();
    let (_server, addr) = start_server(&dst, "srv", ConflictStrategy::NewerWins).await;

    let resp = send_raw(&addr, &Message::ping()).await;
    assert_eq!(resp.code, ResponseCode::Ok);
}

#[tokio::test]
async fn test_malformed_frame_gets_error_response() {
    let dst = TempDir::new().unwrap();
    let (_server, addr) = start_server(&dst, "srv", ConflictStrategy::NewerWins).await;

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut stream, &[0x7f]).await.unwrap();

    let resp = read_response(&mut stream).await.unwrap();
    assert_eq!(resp.code, ResponseCode::Err);
    assert!(resp.msg.contains("unknown message type"), "msg: {}", resp.msg);
}

#[tokio::test]
async fn test_rename_pushes_delete_of_old_path() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let (_server, addr) = start_server(&dst, "n2", ConflictStrategy::NewerWins).await;

    tokio::fs::write(dst.path().join("old.txt"), "x").await.unwrap();

    let clock = Arc::new(VectorClock::new());
    let syncer = TcpSyncer::new(src.path(), &addr, "n1", clock).unwrap();

    let result = syncer
        .handle(FileEvent::new(EventKind::Rename, src.path().join("old.txt")))
        .await;
    assert!(result.is_success());
    assert!(!dst.path().join("old.txt").exists());
}

#[tokio::test]
async fn test_dial_failure_is_reported_not_fatal() {
    let src = TempDir::new().unwrap();
    let file = src.path().join("f");
    tokio::fs::write(&file, "x").await.unwrap();

    // Nothing is listening here.
    let clock = Arc::new(VectorClock::new());
    let syncer = TcpSyncer::new(src.path(), free_addr(), "n1", clock).unwrap();

    let result = syncer.handle(FileEvent::new(EventKind::Write, &file)).await;
    assert!(!result.is_success());
    assert!(result.err.unwrap().contains("failed to connect"));
}
