//! Werval HTTP server.
//!
//! Serves a demonstration application on top of the `werval_http` core:
//!
//! - `GET /stream?n=<count>` answers with `count` chunks using chunked
//!   transfer encoding
//! - any other request is answered with a JSON description of the
//!   aggregated request
//!
//! ```text
//! werval-http --config werval.toml --bind 0.0.0.0:23023
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use futures_util::future::{BoxFuture, FutureExt};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, StatusCode};
use serde_json::json;

use werval_http::config::{load_config, validate_config, ConfigError, ServerConfig};
use werval_http::lifecycle::shutdown_on_signal;
use werval_http::net::Listener;
use werval_http::observability::{init_logging, metrics};
use werval_http::reactive::IterPublisher;
use werval_http::{Application, BoxError, HttpServer, Outcome, Request, WorkerPool};

const MAX_STREAM_CHUNKS: u64 = 10_000;

#[derive(Debug, Parser)]
#[command(name = "werval-http", version, about = "Werval HTTP server")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

/// Demonstration application.
struct Demo {
    chunk_size: usize,
}

impl Application for Demo {
    fn handle_request(&self, request: Request) -> BoxFuture<'static, Result<Outcome, BoxError>> {
        respond(request, self.chunk_size).boxed()
    }
}

async fn respond(request: Request, chunk_size: usize) -> Result<Outcome, BoxError> {
    let header = &request.header;
    if header.method == Method::GET && header.uri.path() == "/stream" {
        let count = header
            .uri
            .query()
            .into_iter()
            .flat_map(|query| query.split('&'))
            .find_map(|pair| pair.strip_prefix("n="))
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(10)
            .min(MAX_STREAM_CHUNKS);
        let chunks = (0..count).map(|i| Ok::<_, Infallible>(Bytes::from(format!("chunk {}\n", i))));
        return Ok(
            Outcome::chunked(StatusCode::OK, IterPublisher::new(chunks), chunk_size)
                .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
        );
    }

    let description = json!({
        "id": request.id().as_str(),
        "method": header.method.as_str(),
        "uri": header.uri.to_string(),
        "body_length": request.body.len(),
        "spooled": request.body.is_on_disk(),
    });
    Ok(
        Outcome::simple(StatusCode::OK, serde_json::to_vec(&description)?)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json")),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "werval-http starting");

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let workers = WorkerPool::from_config(&config.workers)?;
    let listener = Listener::bind(&config.listener).await?;
    let application = Arc::new(Demo {
        chunk_size: config.responses.chunk_size,
    });

    let server = HttpServer::new(config, application, workers);
    tokio::spawn(shutdown_on_signal(server.shutdown_handle()));
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
