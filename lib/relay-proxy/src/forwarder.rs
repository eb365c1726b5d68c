//! Edge-resident forwarding logic
//!
//! One inbound request, one outbound fetch, one relayed response. The
//! forwarder holds no state across invocations; concurrent calls are fully
//! independent. Every failure path produces a defined status code with a
//! JSON envelope and an `X-Relay-Error` header, never an unhandled fault.
//!
//! The embedded worker script in `relay-control` implements this same
//! algorithm for the hosted endpoints; this is the canonical version.

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode, Uri};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Header naming the target URL; takes precedence over the query parameter.
pub const TARGET_HEADER: &str = "x-target-url";
/// Query parameter naming the target URL.
pub const TARGET_PARAM: &str = "url";
/// Caller-supplied X-Forwarded-For override.
pub const SPOOF_HEADER: &str = "x-my-x-forwarded-for";
/// Set on forwarder-generated error responses so the dispatcher can tell
/// them apart from an upstream's own 4xx/5xx.
pub const ERROR_HEADER: &str = "x-relay-error";

// Query parameters consumed by the relay hop, not passed upstream.
const STRIPPED_QUERY_PARAMS: &[&str] = &["url", "_cb", "_t"];

/// Upstream timeout default; must stay under the edge platform's own
/// execution budget.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(25);

/// Stateless per-request forwarder.
pub struct EdgeForwarder {
    http: reqwest::Client,
    upstream_timeout: Duration,
}

impl EdgeForwarder {
    pub fn new(upstream_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            upstream_timeout,
        }
    }

    /// Extract the target, replay the request upstream, relay the response.
    ///
    /// Infallible by contract: input and upstream failures come back as
    /// structured 400/502 responses.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = req.into_parts();

        let raw_target = match extract_target(&parts.uri, &parts.headers) {
            Some(target) => target,
            None => {
                debug!("Rejecting request with no target");
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "no_target",
                    serde_json::json!({
                        "usage": {
                            "header": "X-Target-URL: https://example.com",
                            "query_param": "?url=https://example.com",
                        }
                    }),
                );
            }
        };

        let target = match validate_target(&raw_target) {
            Some(url) => url,
            None => {
                debug!("Rejecting malformed target: {}", raw_target);
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_target",
                    serde_json::json!({ "provided": raw_target }),
                );
            }
        };
        let target = append_surviving_query(target, &parts.uri);

        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read inbound request body: {}", e);
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "body_read_failed",
                    serde_json::json!({}),
                );
            }
        };

        let headers = outbound_headers(&parts.headers);

        debug!("Forwarding {} {} upstream", parts.method, target);

        let mut outbound = self
            .http
            .request(parts.method.clone(), target)
            .headers(headers)
            .timeout(self.upstream_timeout);
        if method_carries_body(&parts.method) {
            outbound = outbound.body(body_bytes);
        }

        match outbound.send().await {
            Ok(upstream) => self.relay_response(upstream, &parts.method).await,
            Err(e) => {
                warn!("Upstream fetch failed: {}", e);
                error_response(
                    StatusCode::BAD_GATEWAY,
                    "upstream_unreachable",
                    serde_json::json!({ "message": e.to_string() }),
                )
            }
        }
    }

    /// Relay status, headers, and body verbatim, adding CORS headers.
    async fn relay_response(&self, upstream: reqwest::Response, method: &Method) -> Response<Full<Bytes>> {
        let status = upstream.status();

        let mut headers = HeaderMap::new();
        for (name, value) in upstream.headers() {
            if !is_stripped_response_header(name.as_str()) {
                headers.append(name.clone(), value.clone());
            }
        }
        add_cors(&mut headers);

        if method == Method::OPTIONS {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NO_CONTENT;
            *response.headers_mut() = headers;
            return response;
        }

        let body = match upstream.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Upstream body read failed: {}", e);
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    "upstream_unreachable",
                    serde_json::json!({ "message": e.to_string() }),
                );
            }
        };

        debug!("Upstream responded {} with {} bytes", status, body.len());

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl Default for EdgeForwarder {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM_TIMEOUT)
    }
}

/// Target lookup: header first, then query parameter. The header wins when
/// both are present, since URL-rewriting intermediaries duplicate query
/// parameters more readily than headers.
fn extract_target(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(TARGET_HEADER).and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    query_pairs(uri)
        .into_iter()
        .find(|(key, _)| key == TARGET_PARAM)
        .map(|(_, value)| value)
}

/// Decoded query pairs of the inbound request URI.
fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    // Uri has no query decoding of its own; parse through a synthetic base.
    match reqwest::Url::parse(&format!("http://edge.internal{}", path_and_query)) {
        Ok(url) => url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// A usable target is an absolute http(s) URL with a host.
fn validate_target(raw: &str) -> Option<reqwest::Url> {
    let url = reqwest::Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str()?;
    Some(url)
}

/// Pass inbound query parameters through to the target, minus the ones the
/// relay hop consumes.
fn append_surviving_query(mut target: reqwest::Url, uri: &Uri) -> reqwest::Url {
    for (key, value) in query_pairs(uri) {
        if !STRIPPED_QUERY_PARAMS.contains(&key.as_str()) {
            target.query_pairs_mut().append_pair(&key, &value);
        }
    }
    target
}

/// Headers to send upstream: everything except hop-by-hop, host-specific,
/// and relay control headers, with X-Forwarded-For recomputed.
fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound.iter() {
        if !is_hop_by_hop_header(name.as_str()) && !is_control_header(name.as_str()) {
            headers.insert(name.clone(), value.clone());
        }
    }

    let forwarded_for = inbound
        .get(SPOOF_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| {
            // random_ipv4 output is always a valid header value
            HeaderValue::from_str(&random_ipv4()).unwrap()
        });
    headers.insert("x-forwarded-for", forwarded_for);

    headers
}

pub(crate) fn method_carries_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

/// Hop-by-hop and host-specific headers the transport layer recomputes.
pub(crate) fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

fn is_control_header(name: &str) -> bool {
    name == TARGET_HEADER || name == SPOOF_HEADER
}

fn is_stripped_response_header(name: &str) -> bool {
    // Recomputed by the transport, plus the error marker an upstream must
    // not be able to spoof.
    matches!(
        name,
        "content-encoding" | "content-length" | "transfer-encoding"
    ) || name == ERROR_HEADER
}

fn add_cors(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS, PATCH, HEAD"),
    );
    headers.insert("access-control-allow-headers", HeaderValue::from_static("*"));
}

fn error_response(status: StatusCode, code: &'static str, details: serde_json::Value) -> Response<Full<Bytes>> {
    let mut body = serde_json::json!({ "error": code });
    if let (Some(target), serde_json::Value::Object(extra)) = (body.as_object_mut(), details) {
        target.extend(extra);
    }

    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert(ERROR_HEADER, HeaderValue::from_static(code));
    add_cors(headers);
    response
}

fn random_ipv4() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}.{}.{}.{}",
        rng.gen_range(1..=254),
        rng.gen_range(1..=254),
        rng.gen_range(1..=254),
        rng.gen_range(1..=254)
    )
}
