//! Shared utilities for integration tests.
//!
//! Boots an `HttpServer` on an ephemeral port with a scripted application
//! and speaks raw HTTP/1.1 to it over a `TcpStream`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use werval_http::config::ServerConfig;
use werval_http::http::ServerError;
use werval_http::net::Listener;
use werval_http::observability::Events;
use werval_http::{Application, BoxError, HttpServer, Outcome, Request, Shutdown, WorkerPool};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

type Handler = dyn Fn(Request) -> BoxFuture<'static, Result<Outcome, BoxError>> + Send + Sync;

/// What the application saw of one request.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub spooled: bool,
}

impl Seen {
    pub fn header(&self, name: &str) -> Option<&str> {
        find(&self.headers, name)
    }
}

/// Application that records requests and delegates to a closure.
pub struct ScriptedApp {
    handler: Box<Handler>,
    pub calls: AtomicUsize,
    pub completed: AtomicUsize,
    pub seen: Mutex<Vec<Seen>>,
}

impl ScriptedApp {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

impl Application for ScriptedApp {
    fn handle_request(&self, request: Request) -> BoxFuture<'static, Result<Outcome, BoxError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let header = &request.header;
        self.seen.lock().unwrap().push(Seen {
            method: header.method.to_string(),
            uri: header.uri.to_string(),
            headers: header
                .headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect(),
            body: request.body.to_bytes().map(|b| b.to_vec()).unwrap_or_default(),
            spooled: request.body.is_on_disk(),
        });
        (self.handler)(request)
    }

    fn on_request_complete(&self, _header: &werval_http::http::RequestHeader) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A running server and the handles tests poke at.
pub struct TestServer {
    pub addr: SocketAddr,
    pub app: Arc<ScriptedApp>,
    pub shutdown: Shutdown,
    pub events: Events,
    pub spool_dir: PathBuf,
    task: JoinHandle<Result<(), ServerError>>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub async fn connect(&self) -> Client {
        Client::connect(self.addr).await
    }

    /// Number of files currently in the spool directory.
    pub fn spool_files(&self) -> usize {
        std::fs::read_dir(&self.spool_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Trigger shutdown and wait for `run` to return.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        tokio::time::timeout(IO_TIMEOUT, self.task)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

/// Start a server with default settings adjusted by `configure`.
pub async fn start_server<C, F>(configure: C, handler: F) -> TestServer
where
    C: FnOnce(&mut ServerConfig),
    F: Fn(Request) -> BoxFuture<'static, Result<Outcome, BoxError>> + Send + Sync + 'static,
{
    let dir = tempfile::tempdir().unwrap();
    let spool_dir = dir.path().join("spool");

    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.requests.spool_dir = Some(spool_dir.clone());
    config.shutdown.timeout_ms = 2000;
    configure(&mut config);

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Arc::new(ScriptedApp {
        handler: Box::new(handler),
        calls: AtomicUsize::new(0),
        completed: AtomicUsize::new(0),
        seen: Mutex::new(Vec::new()),
    });

    let server = HttpServer::new(config, app.clone(), WorkerPool::current().unwrap());
    let shutdown = server.shutdown_handle();
    let events = server.events();
    let task = tokio::spawn(server.run(listener));

    TestServer {
        addr,
        app,
        shutdown,
        events,
        spool_dir,
        task,
        _dir: dir,
    }
}

/// Response as read off the wire.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub trailers: Vec<(String, String)>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        find(&self.headers, name)
    }

    pub fn trailer(&self, name: &str) -> Option<&str> {
        find(&self.trailers, name)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Raw HTTP/1.1 client.
pub struct Client {
    stream: TcpStream,
    buf: BytesMut,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buf: BytesMut::new(),
        }
    }

    pub async fn send(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).await.unwrap();
    }

    /// Send `raw` and read one response.
    pub async fn request(&mut self, raw: &[u8]) -> Response {
        self.send(raw).await;
        self.read_response().await.expect("connection closed before a response")
    }

    /// Read only a response head, as for the answer to a `HEAD` request.
    pub async fn read_head(&mut self) -> Option<Response> {
        let (status, headers) = loop {
            let parsed = {
                let mut fields = [httparse::EMPTY_HEADER; 64];
                let mut response = httparse::Response::new(&mut fields);
                match response.parse(&self.buf).expect("malformed response head") {
                    httparse::Status::Complete(len) => Some((
                        len,
                        response.code.unwrap_or_default(),
                        response
                            .headers
                            .iter()
                            .map(|h| {
                                (
                                    h.name.to_string(),
                                    String::from_utf8_lossy(h.value).into_owned(),
                                )
                            })
                            .collect::<Vec<_>>(),
                    )),
                    httparse::Status::Partial => None,
                }
            };
            match parsed {
                Some((len, status, headers)) => {
                    self.buf.advance(len);
                    break (status, headers);
                }
                None => {
                    if !self.fill().await {
                        return None;
                    }
                }
            }
        };

        Some(Response {
            status,
            headers,
            body: Vec::new(),
            trailers: Vec::new(),
        })
    }

    /// Read one response, `None` if the server closed first.
    pub async fn read_response(&mut self) -> Option<Response> {
        let mut response = self.read_head().await?;
        let status = response.status;
        if (100..200).contains(&status) || status == 204 || status == 304 {
            return Some(response);
        }

        let chunked = response
            .header("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
        if chunked {
            loop {
                let line = self.read_line().await?;
                let size = usize::from_str_radix(line.trim(), 16).expect("bad chunk size");
                if size == 0 {
                    loop {
                        let line = self.read_line().await?;
                        if line.is_empty() {
                            break;
                        }
                        let (name, value) = line.split_once(':').expect("bad trailer");
                        response
                            .trailers
                            .push((name.trim().to_string(), value.trim().to_string()));
                    }
                    break;
                }
                let data = self.read_exact(size + 2).await?;
                response.body.extend_from_slice(&data[..size]);
            }
        } else if let Some(length) = response.header("content-length") {
            let length: usize = length.parse().expect("bad content-length");
            response.body = self.read_exact(length).await?;
        } else {
            while self.fill().await {}
            response.body = self.buf.split().to_vec();
        }
        Some(response)
    }

    /// Everything the server sends until it closes the connection.
    pub async fn read_to_close(&mut self) -> Vec<u8> {
        while self.fill().await {}
        self.buf.split().to_vec()
    }

    /// Whether the server closed the connection, waiting up to `wait`.
    pub async fn closed_within(&mut self, wait: Duration) -> bool {
        match tokio::time::timeout(wait, self.stream.read_buf(&mut self.buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => true,
            Ok(Ok(_)) | Err(_) => false,
        }
    }

    async fn fill(&mut self) -> bool {
        matches!(
            tokio::time::timeout(IO_TIMEOUT, self.stream.read_buf(&mut self.buf)).await,
            Ok(Ok(n)) if n > 0
        )
    }

    async fn read_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.split_to(pos + 2);
                return Some(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
            if !self.fill().await {
                return None;
            }
        }
    }

    async fn read_exact(&mut self, len: usize) -> Option<Vec<u8>> {
        while self.buf.len() < len {
            if !self.fill().await {
                return None;
            }
        }
        Some(self.buf.split_to(len).to_vec())
    }
}

/// A `POST` with a `Content-Length` body.
pub fn post(path: &str, body: &[u8]) -> Vec<u8> {
    let mut raw = format!(
        "POST {} HTTP/1.1\r\nHost: test\r\nContent-Length: {}\r\n\r\n",
        path,
        body.len()
    )
    .into_bytes();
    raw.extend_from_slice(body);
    raw
}

/// A `POST` whose body is sent as the given chunks.
pub fn post_chunked(path: &str, chunks: &[&[u8]], trailers: &[(&str, &str)]) -> Vec<u8> {
    let mut raw = format!(
        "POST {} HTTP/1.1\r\nHost: test\r\nTransfer-Encoding: chunked\r\n\r\n",
        path
    )
    .into_bytes();
    for chunk in chunks {
        raw.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        raw.extend_from_slice(chunk);
        raw.extend_from_slice(b"\r\n");
    }
    raw.extend_from_slice(b"0\r\n");
    for (name, value) in trailers {
        raw.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    raw.extend_from_slice(b"\r\n");
    raw
}

pub fn get(path: &str) -> Vec<u8> {
    format!("GET {} HTTP/1.1\r\nHost: test\r\n\r\n", path).into_bytes()
}
