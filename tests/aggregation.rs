//! Request aggregation over real connections.

use std::time::Duration;

use futures_util::future::{self, FutureExt};
use http::StatusCode;
use werval_http::config::BodySize;
use werval_http::Outcome;

mod common;

use common::{post, post_chunked, start_server};

fn ok() -> impl Fn(werval_http::Request) -> future::BoxFuture<'static, Result<Outcome, werval_http::BoxError>>
       + Send
       + Sync
       + 'static {
    |_request| future::ready(Ok(Outcome::text(StatusCode::OK, "ok"))).boxed()
}

#[tokio::test]
async fn small_body_is_aggregated_in_memory() {
    let server = start_server(
        |c| {
            c.requests.max_body_size = BodySize::Bytes(100);
            c.requests.disk_threshold = 100;
        },
        ok(),
    )
    .await;

    let mut client = server.connect().await;
    let response = client
        .request(&post_chunked("/upload", &[b"ab", b"cd", b"ef"], &[]))
        .await;
    assert_eq!(response.status, 200);

    let seen = server.app.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].body, b"abcdef");
    assert!(!seen[0].spooled);
    assert_eq!(seen[0].header("content-length"), Some("6"));
    assert_eq!(seen[0].header("transfer-encoding"), None);
}

#[tokio::test]
async fn large_body_spools_to_disk_and_is_deleted() {
    let server = start_server(|c| c.requests.disk_threshold = 50, ok()).await;

    let chunk = [b'x'; 40];
    let mut client = server.connect().await;
    let response = client
        .request(&post_chunked("/upload", &[&chunk, &chunk, &chunk], &[]))
        .await;
    assert_eq!(response.status, 200);

    let seen = server.app.seen();
    assert_eq!(seen[0].body, vec![b'x'; 120]);
    assert!(seen[0].spooled);
    assert_eq!(seen[0].header("content-length"), Some("120"));
    assert_eq!(server.spool_files(), 0);
}

#[tokio::test]
async fn oversized_body_is_rejected_without_the_application() {
    let server = start_server(|c| c.requests.max_body_size = BodySize::Bytes(100), ok()).await;

    let mut client = server.connect().await;
    let response = client
        .request(&post_chunked("/upload", &[&[b'y'; 200]], &[]))
        .await;
    assert_eq!(response.status, 413);
    assert_eq!(response.text(), "HTTP content length exceeded 100 bytes.");
    assert_eq!(response.header("connection"), Some("close"));
    assert!(client.closed_within(Duration::from_secs(2)).await);
    assert_eq!(server.app.calls(), 0);
    assert_eq!(server.spool_files(), 0);
}

#[tokio::test]
async fn body_of_exactly_the_maximum_is_accepted() {
    let server = start_server(|c| c.requests.max_body_size = BodySize::Bytes(10), ok()).await;

    let mut client = server.connect().await;
    let response = client.request(&post("/", &[b'z'; 10])).await;
    assert_eq!(response.status, 200);
    assert_eq!(server.app.calls(), 1);
}

#[tokio::test]
async fn declared_length_over_maximum_fails_before_upload() {
    let server = start_server(|c| c.requests.max_body_size = BodySize::Bytes(100), ok()).await;

    let mut client = server.connect().await;
    let response = client
        .request(
            b"POST /upload HTTP/1.1\r\nHost: test\r\nContent-Length: 1000\r\nExpect: 100-continue\r\n\r\n",
        )
        .await;
    assert_eq!(response.status, 413);
    assert_eq!(server.app.calls(), 0);
}

#[tokio::test]
async fn expect_continue_gets_interim_response() {
    let server = start_server(|_| {}, ok()).await;

    let mut client = server.connect().await;
    client
        .send(b"POST /upload HTTP/1.1\r\nHost: test\r\nContent-Length: 5\r\nExpect: 100-continue\r\n\r\n")
        .await;
    let interim = client.read_response().await.unwrap();
    assert_eq!(interim.status, 100);

    client.send(b"hello").await;
    let response = client.read_response().await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(server.app.seen()[0].body, b"hello");
}

#[tokio::test]
async fn trailers_are_merged_into_headers() {
    let server = start_server(|_| {}, ok()).await;

    let mut client = server.connect().await;
    let response = client
        .request(&post_chunked("/", &[b"data"], &[("X-Checksum", "abc123")]))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(server.app.seen()[0].header("x-checksum"), Some("abc123"));
}

#[tokio::test]
async fn malformed_request_gets_400_and_close() {
    let server = start_server(|_| {}, ok()).await;

    let mut client = server.connect().await;
    let response = client.request(b"NOT HTTP AT ALL\r\n\r\n").await;
    assert_eq!(response.status, 400);
    assert_eq!(response.header("content-length"), Some("0"));
    assert_eq!(response.header("connection"), Some("close"));
    assert!(client.closed_within(Duration::from_secs(2)).await);
    assert_eq!(server.app.calls(), 0);
}

#[tokio::test]
async fn bad_chunk_size_mid_body_gets_400() {
    let server = start_server(|_| {}, ok()).await;

    let mut client = server.connect().await;
    let response = client
        .request(b"POST / HTTP/1.1\r\nHost: test\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n")
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(server.app.calls(), 0);
}

#[tokio::test]
async fn peer_leaving_mid_upload_deletes_spool_file() {
    let server = start_server(|c| c.requests.disk_threshold = 8, ok()).await;

    {
        let mut client = server.connect().await;
        client
            .send(b"POST / HTTP/1.1\r\nHost: test\r\nContent-Length: 100\r\n\r\n0123456789abcdef")
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.spool_files(), 1);
    }

    let mut remaining = server.spool_files();
    for _ in 0..50 {
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        remaining = server.spool_files();
    }
    assert_eq!(remaining, 0);
    assert_eq!(server.app.calls(), 0);
}
