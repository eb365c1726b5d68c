//! Control plane contract for deploying forwarding endpoints

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A forwarding script as the control plane reports it.
#[derive(Clone, Debug)]
pub struct DeployedScript {
    /// Script identity; doubles as the registry endpoint id.
    pub id: String,
    /// Public URL the script is reachable at.
    pub public_url: String,
    /// Creation time when the control plane reports one.
    pub created_at: Option<DateTime<Utc>>,
}

/// Management API of the edge platform hosting the forwarding endpoints.
///
/// The control plane is the source of truth for which endpoints exist;
/// registry state is derived from it. Failures map to
/// [`CoreError::ControlPlane`](crate::CoreError::ControlPlane) and are never
/// retried here, so callers can apply their own backoff policy.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Deploy one new forwarding instance and return its identity and URL.
    async fn deploy(&self) -> Result<DeployedScript>;

    /// List every forwarding instance the platform currently hosts.
    async fn list_deployed(&self) -> Result<Vec<DeployedScript>>;

    /// Delete a deployed instance. Deleting an already-gone instance
    /// succeeds.
    async fn delete(&self, id: &str) -> Result<()>;
}
