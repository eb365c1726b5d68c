//! Endpoint data model
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reachability status of a deployed endpoint.
///
/// `Unreachable` is set when a liveness probe fails; it never removes the
/// record. Only a sync against the control plane removes endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointStatus {
    Active,
    Unreachable,
}

/// One deployed forwarding instance with a stable public URL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Endpoint {
    /// Stable identity, assigned at creation (the deployed script name).
    pub id: String,
    /// Externally reachable base URL of the deployed instance.
    pub public_url: String,
    pub created_at: DateTime<Utc>,
    pub status: EndpointStatus,
}

impl Endpoint {
    /// Whether this endpoint is eligible for relay selection.
    pub fn is_active(&self) -> bool {
        self.status == EndpointStatus::Active
    }
}
