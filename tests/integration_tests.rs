//! Integration tests for aesdsocket
//!
//! Each test runs a full server on an ephemeral port with its own log file.

use aesdsocket::config::ServerConfig;
use aesdsocket::server::{LogServer, SharedLog};
use aesdsocket::types::TimestampRecord;
use aesdsocket::AesdError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

struct TestServer {
    addr: SocketAddr,
    log: Arc<SharedLog>,
    log_path: PathBuf,
    shutdown: CancellationToken,
    handle: JoinHandle<aesdsocket::Result<()>>,
    _dir: TempDir,
}

/// Helper function to start a server with a test config
async fn start_server(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let temp_dir = tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.server.bind_address = "127.0.0.1".to_string();
    config.server.port = 0;
    config.storage.log_path = temp_dir.path().join("aesdsocketdata");
    config.timestamp.enabled = false;
    configure(&mut config);

    let log_path = config.storage.log_path.clone();
    let server = LogServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let log = server.log();
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.run_until(std::future::pending()));

    TestServer {
        addr,
        log,
        log_path,
        shutdown,
        handle,
        _dir: temp_dir,
    }
}

async fn stop_server(server: TestServer) -> PathBuf {
    server.shutdown.cancel();
    timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server did not shut down")
        .unwrap()
        .unwrap();
    server.log_path
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for log readback")
        .unwrap();
    buf
}

/// Read until `needle` shows up somewhere in what was received
async fn read_until_contains(stream: &mut TcpStream, received: &mut Vec<u8>, needle: &[u8]) {
    timeout(Duration::from_secs(5), async {
        let mut buf = [0u8; 4096];
        while !received.windows(needle.len()).any(|w| w == needle) {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed the connection early");
            received.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .expect("record never came back");
}

/// Test the two-client hello/world exchange
#[tokio::test]
async fn test_hello_world_scenario() {
    let server = start_server(|_| {}).await;

    let mut first = TcpStream::connect(server.addr).await.unwrap();
    first.write_all(b"hello\n").await.unwrap();
    assert_eq!(read_exactly(&mut first, 6).await, b"hello\n");
    assert_eq!(server.log.read_all().await.unwrap(), b"hello\n");

    let mut second = TcpStream::connect(server.addr).await.unwrap();
    second.write_all(b"world\n").await.unwrap();
    assert_eq!(read_exactly(&mut second, 12).await, b"hello\nworld\n");
    assert_eq!(server.log.read_all().await.unwrap(), b"hello\nworld\n");

    first.write_all(b"again\n").await.unwrap();
    assert_eq!(read_exactly(&mut first, 18).await, b"hello\nworld\nagain\n");

    drop(first);
    drop(second);
    stop_server(server).await;
}

/// Test many concurrent clients, each waiting for its readback before sending more
#[tokio::test]
async fn test_concurrent_clients_produce_untorn_log() {
    let server = start_server(|_| {}).await;

    let mut clients = vec![];
    for client in 0..10 {
        let addr = server.addr;
        clients.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut received = Vec::new();
            for record in 0..20 {
                let line = format!("client-{:02}-record-{:02}-{}\n", client, record, "x".repeat(64));
                stream.write_all(line.as_bytes()).await.unwrap();
                read_until_contains(&mut stream, &mut received, line.as_bytes()).await;
            }
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    let content = String::from_utf8(server.log.read_all().await.unwrap()).unwrap();
    let mut lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 200);
    lines.sort_unstable();
    lines.dedup();
    assert_eq!(lines.len(), 200, "duplicated records in log");
    for client in 0..10 {
        for record in 0..20 {
            let expected = format!("client-{:02}-record-{:02}-{}", client, record, "x".repeat(64));
            assert!(lines.binary_search(&expected.as_str()).is_ok(), "missing {}", expected);
        }
    }

    stop_server(server).await;
}

/// Test that simultaneous single-record clients never interleave bytes
#[tokio::test]
async fn test_simultaneous_appends_do_not_tear() {
    let server = start_server(|_| {}).await;

    let mut clients = vec![];
    for client in 0..20u8 {
        let addr = server.addr;
        clients.push(tokio::spawn(async move {
            let mut record = vec![b'A' + client; 600];
            record.push(b'\n');

            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&record).await.unwrap();
            stream.shutdown().await.unwrap();

            let mut response = Vec::new();
            timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
                .await
                .unwrap()
                .unwrap();
            assert!(response.windows(record.len()).any(|w| w == record.as_slice()));
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    let content = server.log.read_all().await.unwrap();
    let lines: Vec<&[u8]> = content.split(|b| *b == b'\n').filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 20);
    for line in lines {
        assert_eq!(line.len(), 600);
        assert!(line.iter().all(|b| *b == line[0]), "torn record");
    }

    stop_server(server).await;
}

/// Test timestamp records interleaving with client records
#[tokio::test]
async fn test_timestamps_interleave_with_client_records() {
    let server = start_server(|config| {
        config.timestamp.enabled = true;
        config.timestamp.interval_ms = 100;
    })
    .await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let mut received = Vec::new();
    for record in 0..5 {
        let line = format!("client record {}\n", record);
        stream.write_all(line.as_bytes()).await.unwrap();
        read_until_contains(&mut stream, &mut received, line.as_bytes()).await;
        sleep(Duration::from_millis(60)).await;
    }
    sleep(Duration::from_millis(150)).await;

    let content = String::from_utf8(server.log.read_all().await.unwrap()).unwrap();
    let mut client_records = 0;
    let mut stamps = 0;
    for line in content.lines() {
        if line.starts_with("client record ") {
            client_records += 1;
        } else {
            assert!(TimestampRecord::parse(line).is_some(), "corrupt line {:?}", line);
            stamps += 1;
        }
    }
    assert_eq!(client_records, 5);
    assert!(stamps >= 2, "expected timestamp records, found {}", stamps);

    drop(stream);
    stop_server(server).await;
}

/// Test shutdown while clients are still connected
#[tokio::test]
async fn test_shutdown_with_connected_clients_removes_log() {
    let server = start_server(|_| {}).await;

    let mut clients = vec![];
    for client in 0..3 {
        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream.write_all(format!("client {} ", client).as_bytes()).await.unwrap();
        sleep(Duration::from_millis(20)).await;
        stream.write_all(b"done\n").await.unwrap();
        let mut received = Vec::new();
        read_until_contains(&mut stream, &mut received, format!("client {} done\n", client).as_bytes()).await;
        clients.push(stream);
    }

    let log_path = stop_server(server).await;
    assert!(!log_path.exists(), "log file must be removed on shutdown");

    for mut stream in clients {
        let mut rest = Vec::new();
        timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
            .await
            .expect("server must close client connections")
            .ok();
    }
}

/// Test that new connections are refused after shutdown
#[tokio::test]
async fn test_no_accepts_after_shutdown() {
    let server = start_server(|_| {}).await;
    let addr = server.addr;
    let token = server.shutdown.clone();

    stop_server(server).await;
    token.cancel();

    assert!(TcpStream::connect(addr).await.is_err());
}

/// Test that the server truncates a log left behind by an earlier run
#[tokio::test]
async fn test_startup_truncates_stale_log() {
    let temp_dir = tempdir().unwrap();
    let stale = temp_dir.path().join("aesdsocketdata");
    std::fs::write(&stale, "left over\n").unwrap();

    let server = start_server(|config| config.storage.log_path = stale.clone()).await;
    assert!(server.log.read_all().await.unwrap().is_empty());

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"fresh\n").await.unwrap();
    assert_eq!(read_exactly(&mut stream, 6).await, b"fresh\n");

    drop(stream);
    stop_server(server).await;
    assert!(!stale.exists());
}

/// Test that a port already in use is a setup error
#[tokio::test]
async fn test_bind_conflict_is_setup_error() {
    let server = start_server(|_| {}).await;
    let temp_dir = tempdir().unwrap();

    let mut config = ServerConfig::default();
    config.server.bind_address = "127.0.0.1".to_string();
    config.server.port = server.addr.port();
    config.storage.log_path = temp_dir.path().join("other");

    let result = LogServer::bind(config).await;
    assert!(matches!(result, Err(AesdError::Setup(_))));

    stop_server(server).await;
}
