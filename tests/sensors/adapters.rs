use std::time::Duration;

use futures_util::StreamExt;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, UnixListener},
    time::timeout,
};
use uuid::Uuid;

use peghub::{
    error::HubErrorKind,
    sensors::{
        PullFeed, PushFeed,
        adapters::{HttpJsonFeed, UnixSocketStreamFeed},
        normalize_sample,
    },
};

async fn serve_once(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|window| window == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.expect("read request");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let response = format!(
            "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket
            .write_all(response.as_bytes())
            .await
            .expect("write response");
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}/feed")
}

#[tokio::test]
async fn http_feed_reads_flat_json_object() {
    let url = serve_once("HTTP/1.1 200 OK", r#"{"price": 101.5, "volume": "2000", "venue": "x"}"#).await;
    let feed = HttpJsonFeed::new("market", &url).expect("valid url");

    let sample = timeout(Duration::from_secs(5), feed.fetch())
        .await
        .expect("fetch should finish")
        .expect("fetch should succeed");
    let reading = normalize_sample(feed.source_id(), sample).expect("sample normalizes");
    assert_eq!(reading.field("price"), Some(101.5));
    assert_eq!(reading.field("volume"), Some(2000.0));
    assert_eq!(reading.field("venue"), None);
}

#[tokio::test]
async fn http_feed_error_status_is_feed_unavailable() {
    let url = serve_once("HTTP/1.1 503 Service Unavailable", "{}").await;
    let feed = HttpJsonFeed::new("market", &url).expect("valid url");

    let err = timeout(Duration::from_secs(5), feed.fetch())
        .await
        .expect("fetch should finish")
        .expect_err("503 must fail");
    assert_eq!(err.kind, HubErrorKind::FeedUnavailable);
}

#[tokio::test]
async fn unix_socket_feed_streams_ndjson_until_close() {
    let dir = std::env::temp_dir().join(format!("peghub-sock-{}", Uuid::now_v7().simple()));
    std::fs::create_dir_all(&dir).expect("socket dir");
    let socket_path = dir.join("iot.sock");
    let listener = UnixListener::bind(&socket_path).expect("bind socket");

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let lines = concat!(
            "{\"fields\":{\"energy_price\":60},\"timestamp\":\"2026-03-01T10:00:00Z\"}\n",
            "\n",
            "not json\n",
            "{\"fields\":{\"energy_price\":\"12.5\"}}\n",
        );
        stream.write_all(lines.as_bytes()).await.expect("write lines");
        let _ = stream.shutdown().await;
    });

    let feed = UnixSocketStreamFeed::new("iot", &socket_path);
    let samples: Vec<_> = timeout(Duration::from_secs(5), async {
        feed.connect().await.expect("connect").collect::<Vec<_>>().await
    })
    .await
    .expect("stream should end when the socket closes");

    assert_eq!(samples.len(), 3, "blank lines are skipped");
    let first = samples[0].as_ref().expect("first line parses");
    assert!(first.timestamp.is_some());
    assert_eq!(
        samples[1].as_ref().expect_err("garbage line is an error").kind,
        HubErrorKind::InvalidInput
    );
    let third = normalize_sample("iot", samples[2].clone().expect("third line parses"))
        .expect("normalizes");
    assert_eq!(third.field("energy_price"), Some(12.5));

    let _ = std::fs::remove_file(&socket_path);
    let _ = std::fs::remove_dir(&dir);
}

#[tokio::test]
async fn unix_socket_feed_connect_failure_is_feed_unavailable() {
    let feed = UnixSocketStreamFeed::new("iot", "/nonexistent/peghub/iot.sock");
    let err = feed.connect().await.err().expect("connect must fail");
    assert_eq!(err.kind, HubErrorKind::FeedUnavailable);
}
