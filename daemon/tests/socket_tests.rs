use procmon_daemon::protocol::{Request, Response};
use procmon_daemon::socket::{handle_client, RequestHandler, SocketServer};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::time::timeout;

struct PingHandler;

#[async_trait::async_trait]
impl RequestHandler for PingHandler {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,
            _ => Response::error("unsupported"),
        }
    }
}

async fn next(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> String {
    timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timed out waiting for a line")
        .unwrap()
        .expect("connection closed")
}

#[tokio::test]
async fn test_partial_request_survives_broadcast() {
    let dir = tempdir().unwrap();
    let server = SocketServer::bind(&dir.path().join("procmon.sock")).await.unwrap();
    let tx = server.broadcast_sender();
    let rx = tx.subscribe();

    let client = UnixStream::connect(server.path()).await.unwrap();
    let stream = server.accept().await.unwrap();
    tokio::spawn(handle_client(stream, rx, Arc::new(PingHandler)));

    let (reader, mut writer) = client.into_split();
    let mut lines = BufReader::new(reader).lines();

    // Half a request is in flight when a broadcast arrives.
    writer.write_all(br#"{"cmd":"pi"#).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(r#"{"type":"status"}"#.to_string()).unwrap();
    assert_eq!(next(&mut lines).await, r#"{"type":"status"}"#);

    writer.write_all(b"ng\"}\n").await.unwrap();
    assert_eq!(next(&mut lines).await, r#"{"type":"pong"}"#);
}

#[tokio::test]
async fn test_blank_lines_are_ignored() {
    let dir = tempdir().unwrap();
    let server = SocketServer::bind(&dir.path().join("procmon.sock")).await.unwrap();
    let rx = server.broadcast_sender().subscribe();

    let client = UnixStream::connect(server.path()).await.unwrap();
    let stream = server.accept().await.unwrap();
    tokio::spawn(handle_client(stream, rx, Arc::new(PingHandler)));

    let (reader, mut writer) = client.into_split();
    let mut lines = BufReader::new(reader).lines();
    writer.write_all(b"\n  \n{\"cmd\":\"ping\"}\n").await.unwrap();
    assert_eq!(next(&mut lines).await, r#"{"type":"pong"}"#);
}
