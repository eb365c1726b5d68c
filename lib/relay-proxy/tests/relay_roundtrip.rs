//! End-to-end relay tests: dispatcher -> local edge server -> echo upstream.
//!
//! The edge server here runs the same `EdgeForwarder` the deployed worker
//! script mirrors, listening on an ephemeral local port, so the full wire
//! contract (target transport, header filtering, error envelopes) is
//! exercised without a control plane.

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use relay_core::{
    ControlPlane, CoreError, DeployedScript, EndpointRegistry, EndpointStore, Result as CoreResult,
};
use relay_proxy::{EdgeForwarder, ProxyDispatcher, RelayError, TargetTransport};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Echo upstream: answers with a JSON rendering of the request it saw.
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            tokio::spawn(async move {
                let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                    let (parts, body) = req.into_parts();
                    let body = body.collect().await.unwrap().to_bytes();
                    let probe_header = parts
                        .headers
                        .get("x-probe")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("");
                    let echo = serde_json::json!({
                        "method": parts.method.as_str(),
                        "path": parts.uri.path(),
                        "query": parts.uri.query().unwrap_or(""),
                        "x_probe": probe_header,
                        "body": String::from_utf8_lossy(&body),
                    });
                    Ok::<_, hyper::Error>(
                        Response::builder()
                            .status(StatusCode::OK)
                            .header("content-type", "application/json")
                            .body(Full::new(Bytes::from(echo.to_string())))
                            .unwrap(),
                    )
                });
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    addr
}

/// Local stand-in for a deployed endpoint, running the real forwarder.
async fn spawn_edge_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let forwarder = Arc::new(EdgeForwarder::new(Duration::from_secs(5)));

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let forwarder = forwarder.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let forwarder = forwarder.clone();
                    async move { Ok::<_, hyper::Error>(forwarder.handle(req).await) }
                });
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    addr
}

/// Control plane whose deploys all resolve to one local edge server.
struct LocalControlPlane {
    edge_addr: SocketAddr,
    counter: AtomicUsize,
}

impl LocalControlPlane {
    fn new(edge_addr: SocketAddr) -> Self {
        Self {
            edge_addr,
            counter: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ControlPlane for LocalControlPlane {
    async fn deploy(&self) -> CoreResult<DeployedScript> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(DeployedScript {
            id: format!("relay-local-{}", n),
            // Distinct path per endpoint keeps public URLs unique.
            public_url: format!("http://{}/{}", self.edge_addr, n),
            created_at: None,
        })
    }

    async fn list_deployed(&self) -> CoreResult<Vec<DeployedScript>> {
        Ok(Vec::new())
    }

    async fn delete(&self, _id: &str) -> CoreResult<()> {
        Ok(())
    }
}

async fn dispatcher_with_endpoints(
    edge_addr: SocketAddr,
    count: usize,
) -> (ProxyDispatcher, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = EndpointStore::new(dir.path().join("endpoints.json"));
    let control = Arc::new(LocalControlPlane::new(edge_addr));
    let registry = Arc::new(EndpointRegistry::new(control, store).unwrap());
    registry.create(count).await.unwrap();
    (ProxyDispatcher::new(registry), dir)
}

#[tokio::test]
async fn relay_preserves_method_body_and_custom_header() {
    let echo_addr = spawn_echo_server().await;
    let edge_addr = spawn_edge_server().await;
    let (dispatcher, _dir) = dispatcher_with_endpoints(edge_addr, 1).await;

    let mut headers = HeaderMap::new();
    headers.insert("x-probe", HeaderValue::from_static("fidelity-check"));

    let response = dispatcher
        .relay(
            &format!("http://{}/echo", echo_addr),
            Method::POST,
            headers,
            Some(Bytes::from_static(b"payload-bytes")),
            RELAY_TIMEOUT,
        )
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers["access-control-allow-origin"], "*");

    let echo: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["path"], "/echo");
    assert_eq!(echo["x_probe"], "fidelity-check");
    assert_eq!(echo["body"], "payload-bytes");
}

#[tokio::test]
async fn relayed_get_matches_direct_get() {
    let echo_addr = spawn_echo_server().await;
    let edge_addr = spawn_edge_server().await;
    let (dispatcher, _dir) = dispatcher_with_endpoints(edge_addr, 1).await;
    let target = format!("http://{}/compare", echo_addr);

    let direct = reqwest::get(&target).await.unwrap();
    assert_eq!(direct.status(), reqwest::StatusCode::OK);
    let direct_body = direct.bytes().await.unwrap();

    let relayed = dispatcher
        .relay(&target, Method::GET, HeaderMap::new(), None, RELAY_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(relayed.status, StatusCode::OK);
    assert_eq!(relayed.body, direct_body);
}

#[tokio::test]
async fn header_transport_relays_like_query_transport() {
    let echo_addr = spawn_echo_server().await;
    let edge_addr = spawn_edge_server().await;
    let (dispatcher, _dir) = dispatcher_with_endpoints(edge_addr, 1).await;

    let response = dispatcher
        .relay_via(
            TargetTransport::Header,
            &format!("http://{}/via-header", echo_addr),
            Method::GET,
            HeaderMap::new(),
            None,
            RELAY_TIMEOUT,
        )
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    let echo: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(echo["path"], "/via-header");
}

#[tokio::test]
async fn unreachable_target_surfaces_as_edge_rejection() {
    let edge_addr = spawn_edge_server().await;
    let (dispatcher, _dir) = dispatcher_with_endpoints(edge_addr, 1).await;
    let before = dispatcher.registry().list().await;

    // Port 9 is discard; nothing listens there.
    let err = dispatcher
        .relay(
            "http://127.0.0.1:9/",
            Method::GET,
            HeaderMap::new(),
            None,
            RELAY_TIMEOUT,
        )
        .await
        .unwrap_err();

    match err {
        RelayError::EdgeRejected { kind, status } => {
            assert_eq!(kind, "upstream_unreachable");
            assert_eq!(status, StatusCode::BAD_GATEWAY);
        }
        other => panic!("expected EdgeRejected, got {:?}", other),
    }

    // The failed relay leaves the registry untouched.
    let after = dispatcher.registry().list().await;
    assert_eq!(before.len(), after.len());
    assert!(after.iter().all(|e| e.is_active()));
}

#[tokio::test]
async fn missing_target_at_the_edge_is_a_structured_400() {
    let edge_addr = spawn_edge_server().await;

    let response = reqwest::get(format!("http://{}/", edge_addr)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["x-relay-error"], "no_target");

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "no_target");
    assert!(body["usage"].is_object());
}

#[tokio::test]
async fn conflicting_header_and_query_targets_prefer_the_header() {
    let echo_addr = spawn_echo_server().await;
    let edge_addr = spawn_edge_server().await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!(
            "http://{}/?url=http://127.0.0.1:9/from-query",
            edge_addr
        ))
        .header("X-Target-URL", format!("http://{}/from-header", echo_addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let echo: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echo["path"], "/from-header");
}

#[tokio::test]
async fn empty_registry_yields_no_endpoints_available() {
    let dir = tempfile::tempdir().unwrap();
    let store = EndpointStore::new(dir.path().join("endpoints.json"));
    let control = Arc::new(LocalControlPlane::new("127.0.0.1:9".parse().unwrap()));
    let registry = Arc::new(EndpointRegistry::new(control, store).unwrap());
    let dispatcher = ProxyDispatcher::new(registry);

    let err = dispatcher
        .relay(
            "http://example.test/",
            Method::GET,
            HeaderMap::new(),
            None,
            RELAY_TIMEOUT,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::NoEndpointsAvailable));
}

#[tokio::test]
async fn create_relay_cleanup_lifecycle() {
    let echo_addr = spawn_echo_server().await;
    let edge_addr = spawn_edge_server().await;

    let dir = tempfile::tempdir().unwrap();
    let store = EndpointStore::new(dir.path().join("endpoints.json"));
    let control = Arc::new(LocalControlPlane::new(edge_addr));
    let registry = Arc::new(EndpointRegistry::new(control, store).unwrap());

    let created = registry.create(2).await.unwrap();
    assert_eq!(created.len(), 2);
    assert!(registry.list().await.iter().all(|e| e.is_active()));

    let dispatcher = ProxyDispatcher::new(registry.clone());
    let response = dispatcher
        .relay(
            &format!("http://{}/lifecycle", echo_addr),
            Method::GET,
            HeaderMap::new(),
            None,
            RELAY_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);

    let deleted = registry.cleanup().await.unwrap();
    assert_eq!(deleted, 2);
    assert!(registry.list().await.is_empty());
}

/// relay-core error mapping sanity for the test control plane.
#[tokio::test]
async fn local_control_plane_reports_structured_errors() {
    struct FailingControlPlane;

    #[async_trait]
    impl ControlPlane for FailingControlPlane {
        async fn deploy(&self) -> CoreResult<DeployedScript> {
            Err(CoreError::ControlPlane("quota exhausted".to_string()))
        }
        async fn list_deployed(&self) -> CoreResult<Vec<DeployedScript>> {
            Ok(Vec::new())
        }
        async fn delete(&self, _id: &str) -> CoreResult<()> {
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let store = EndpointStore::new(dir.path().join("endpoints.json"));
    let registry = EndpointRegistry::new(Arc::new(FailingControlPlane), store).unwrap();

    let err = registry.create(1).await.unwrap_err();
    match err {
        CoreError::PartialFailure { succeeded, attempted, failures } => {
            assert_eq!(succeeded, 0);
            assert_eq!(attempted, 1);
            assert!(failures[0].1.contains("quota exhausted"));
        }
        other => panic!("expected PartialFailure, got {:?}", other),
    }
}
