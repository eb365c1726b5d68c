//! Client-side dispatcher relaying requests through a deployed endpoint

use crate::forwarder::{is_hop_by_hop_header, method_carries_body, ERROR_HEADER, TARGET_HEADER};
use crate::selection::{EndpointSelector, SelectionStrategy};
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Method, StatusCode};
use relay_core::{Endpoint, EndpointRegistry};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// How the target URL rides to the endpoint. Exactly one transport is
/// applied per call; the endpoint gives the header precedence if a caller
/// somehow supplies both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetTransport {
    /// `?url=<target>` query parameter (the default).
    QueryParam,
    /// `X-Target-URL` header.
    Header,
}

impl Default for TargetTransport {
    fn default() -> Self {
        TargetTransport::QueryParam
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("No endpoints available")]
    NoEndpointsAvailable,

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("Relay through {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Relay through {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Endpoint rejected the request: {kind} ({status})")]
    EdgeRejected { kind: String, status: StatusCode },
}

/// One relayed exchange, exactly as the endpoint returned it.
#[derive(Debug)]
pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Picks a usable endpoint and performs one forwarded HTTP exchange.
///
/// Reads the registry, never mutates it. Does not retry against another
/// endpoint on failure; that policy belongs to callers (see
/// [`EndpointProber`](crate::EndpointProber) for the batched variant).
pub struct ProxyDispatcher {
    registry: Arc<EndpointRegistry>,
    selector: EndpointSelector,
    http: reqwest::Client,
}

impl ProxyDispatcher {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self::with_strategy(registry, SelectionStrategy::default())
    }

    pub fn with_strategy(registry: Arc<EndpointRegistry>, strategy: SelectionStrategy) -> Self {
        Self {
            registry,
            selector: EndpointSelector::new(strategy),
            http: reqwest::Client::new(),
        }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Relay one request through a selected endpoint using the default
    /// query-parameter transport.
    pub async fn relay(
        &self,
        target_url: &str,
        method: Method,
        headers: HeaderMap,
        body: Option<Bytes>,
        timeout: Duration,
    ) -> Result<RelayResponse, RelayError> {
        self.relay_via(TargetTransport::default(), target_url, method, headers, body, timeout)
            .await
    }

    /// Relay one request with an explicit target transport.
    pub async fn relay_via(
        &self,
        transport: TargetTransport,
        target_url: &str,
        method: Method,
        headers: HeaderMap,
        body: Option<Bytes>,
        timeout: Duration,
    ) -> Result<RelayResponse, RelayError> {
        let endpoints = self.registry.list().await;
        let endpoint = self
            .selector
            .select(&endpoints)
            .ok_or(RelayError::NoEndpointsAvailable)?
            .clone();

        debug!("Relaying {} {} via {}", method, target_url, endpoint.id);
        self.relay_through(&endpoint, transport, target_url, method, headers, body, timeout)
            .await
    }

    /// Relay through one specific endpoint (prober entry point).
    #[allow(clippy::too_many_arguments)]
    pub async fn relay_through(
        &self,
        endpoint: &Endpoint,
        transport: TargetTransport,
        target_url: &str,
        method: Method,
        headers: HeaderMap,
        body: Option<Bytes>,
        timeout: Duration,
    ) -> Result<RelayResponse, RelayError> {
        let mut url = reqwest::Url::parse(&endpoint.public_url)
            .map_err(|e| RelayError::ConnectionFailed {
                endpoint: endpoint.id.clone(),
                reason: format!("invalid endpoint URL: {}", e),
            })?;

        if target_url.is_empty() {
            return Err(RelayError::InvalidTarget("empty target URL".to_string()));
        }

        if transport == TargetTransport::QueryParam {
            url.query_pairs_mut().append_pair("url", target_url);
        }

        // Hop-specific headers are recomputed by the transport layer.
        let mut outbound = HeaderMap::new();
        for (name, value) in headers.iter() {
            if !is_hop_by_hop_header(name.as_str()) {
                outbound.insert(name.clone(), value.clone());
            }
        }

        let mut request = self
            .http
            .request(method.clone(), url)
            .headers(outbound)
            .timeout(timeout);
        if transport == TargetTransport::Header {
            request = request.header(TARGET_HEADER, target_url);
        }
        if let Some(body) = body.filter(|_| method_carries_body(&method)) {
            request = request.body(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!("Relay through {} timed out", endpoint.id);
                return Err(RelayError::Timeout {
                    endpoint: endpoint.id.clone(),
                });
            }
            Err(e) => {
                warn!("Relay through {} failed: {}", endpoint.id, e);
                return Err(RelayError::ConnectionFailed {
                    endpoint: endpoint.id.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let status = response.status();
        let headers = response.headers().clone();

        // Endpoint-generated failures are marked; an upstream's own 4xx/5xx
        // comes back verbatim as a RelayResponse instead.
        if let Some(kind) = headers.get(ERROR_HEADER).and_then(|v| v.to_str().ok()) {
            debug!("Endpoint {} rejected the relay: {}", endpoint.id, kind);
            return Err(RelayError::EdgeRejected {
                kind: kind.to_string(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RelayError::ConnectionFailed {
                endpoint: endpoint.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(RelayResponse { status, headers, body })
    }
}
