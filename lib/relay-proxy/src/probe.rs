//! Liveness probing across all endpoints
//!
//! The batched "test every endpoint" operation: one relay per endpoint,
//! issued concurrently, each outcome tracked independently. Transport-level
//! failures flip the endpoint to Unreachable; an endpoint that answered but
//! could not reach the probe target stays Active (the endpoint itself is
//! alive, the target is not).

use crate::dispatcher::{ProxyDispatcher, RelayError, TargetTransport};
use futures::future::join_all;
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Method, StatusCode};
use relay_core::EndpointStatus;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of probing one endpoint.
#[derive(Debug)]
pub struct ProbeResult {
    pub endpoint_id: String,
    /// Status the relay came back with, when it came back at all.
    pub status: Option<StatusCode>,
    /// Response body on a successful relay (for origin-IP style targets).
    pub body: Option<Bytes>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        self.status.map(|s| s.is_success()).unwrap_or(false)
    }
}

pub struct EndpointProber {
    dispatcher: ProxyDispatcher,
    timeout: Duration,
}

impl EndpointProber {
    pub fn new(dispatcher: ProxyDispatcher, timeout: Duration) -> Self {
        Self { dispatcher, timeout }
    }

    /// Probe every known endpoint against `target_url` with `method`.
    pub async fn probe_all(&self, target_url: &str, method: Method) -> Vec<ProbeResult> {
        let endpoints = self.dispatcher.registry().list().await;
        debug!("Probing {} endpoints against {}", endpoints.len(), target_url);

        join_all(
            endpoints
                .iter()
                .map(|e| self.probe_one(&e.id, target_url, method.clone())),
        )
        .await
    }

    async fn probe_one(&self, endpoint_id: &str, target_url: &str, method: Method) -> ProbeResult {
        let endpoints = self.dispatcher.registry().list().await;
        let Some(endpoint) = endpoints.iter().find(|e| e.id == endpoint_id) else {
            return ProbeResult {
                endpoint_id: endpoint_id.to_string(),
                status: None,
                body: None,
                error: Some("endpoint disappeared from registry".to_string()),
            };
        };

        let outcome = self
            .dispatcher
            .relay_through(
                endpoint,
                TargetTransport::QueryParam,
                target_url,
                method,
                HeaderMap::new(),
                None,
                self.timeout,
            )
            .await;

        match outcome {
            Ok(response) => {
                self.set_status(endpoint_id, EndpointStatus::Active).await;
                ProbeResult {
                    endpoint_id: endpoint_id.to_string(),
                    status: Some(response.status),
                    body: Some(response.body),
                    error: None,
                }
            }
            Err(e @ (RelayError::Timeout { .. } | RelayError::ConnectionFailed { .. })) => {
                warn!("Endpoint {} unreachable: {}", endpoint_id, e);
                self.set_status(endpoint_id, EndpointStatus::Unreachable).await;
                ProbeResult {
                    endpoint_id: endpoint_id.to_string(),
                    status: None,
                    body: None,
                    error: Some(e.to_string()),
                }
            }
            Err(e) => {
                // The endpoint answered; the failure is about the target.
                let status = match &e {
                    RelayError::EdgeRejected { status, .. } => Some(*status),
                    _ => None,
                };
                ProbeResult {
                    endpoint_id: endpoint_id.to_string(),
                    status,
                    body: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn set_status(&self, endpoint_id: &str, status: EndpointStatus) {
        if let Err(e) = self.dispatcher.registry().set_status(endpoint_id, status).await {
            debug!("Could not record status for {}: {}", endpoint_id, e);
        }
    }
}
