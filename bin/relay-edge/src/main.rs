use anyhow::Result;
use http_body_util::Full;
use hyper::{
    body::Bytes,
    server::conn::http1,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::tokio::TokioIo;
use relay_proxy::{EdgeForwarder, MetricsCollector};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::fmt::init as tracing_init;

const DEFAULT_ADDR: &str = "0.0.0.0:8787";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    info!("Starting relay-edge...");

    let upstream_timeout = std::env::var("RELAY_UPSTREAM_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(relay_proxy::forwarder::DEFAULT_UPSTREAM_TIMEOUT);
    let forwarder = Arc::new(EdgeForwarder::new(upstream_timeout));
    info!("Forwarder initialized with {:?} upstream timeout", upstream_timeout);

    let metrics_collector = Arc::new(MetricsCollector::new()?);
    info!("Metrics collector initialized");

    let addr: SocketAddr = std::env::var("RELAY_EDGE_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Edge server listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let forwarder = forwarder.clone();
        let metrics_collector = metrics_collector.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let forwarder = forwarder.clone();
                let metrics_collector = metrics_collector.clone();
                handle_request(req, forwarder, metrics_collector)
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving connection from {}: {}", peer_addr, e);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    forwarder: Arc<EdgeForwarder>,
    metrics_collector: Arc<MetricsCollector>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("{} {}", method, path);

    if path == "/healthz" {
        let response = Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("OK\n")))
            .unwrap();
        return Ok(response);
    }

    if path == "/metrics" && method == "GET" {
        let metrics_text = metrics_collector
            .gather()
            .unwrap_or_else(|_| "Failed to gather metrics\n".to_string());
        let response = Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(Full::new(Bytes::from(metrics_text)))
            .unwrap();
        return Ok(response);
    }

    let started = Instant::now();
    let response = forwarder.handle(req).await;

    if let Some(kind) = response
        .headers()
        .get(relay_proxy::forwarder::ERROR_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        metrics_collector.observe_error(kind);
    }
    metrics_collector.observe_request(method.as_str(), response.status().as_u16(), started);

    Ok(response)
}
