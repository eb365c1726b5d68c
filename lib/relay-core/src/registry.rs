//! Endpoint registry reconciled against the control plane
//!
//! The registry owns the local view of deployed forwarding endpoints. The
//! control plane is the source of truth: local state is provisional and
//! [`EndpointRegistry::sync`] is the only operation allowed to resolve
//! divergence. Drift (endpoints deleted or added out-of-band) is expected,
//! not exceptional.

use crate::{ControlPlane, CoreError, Endpoint, EndpointStatus, EndpointStore, Result};
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass, as endpoint ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Present remotely but previously unknown locally.
    pub added: Vec<String>,
    /// Known locally but no longer present remotely (externally deleted).
    pub removed: Vec<String>,
    /// Known on both sides but with a different remote URL.
    pub updated: Vec<String>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Authoritative local view of deployed endpoints.
///
/// Only `create`, `sync`, `cleanup`, and `set_status` mutate the registry;
/// the dispatcher reads it through [`list`](Self::list).
pub struct EndpointRegistry {
    control: Arc<dyn ControlPlane>,
    // Kept in creation order; ids and public URLs are unique.
    endpoints: Arc<RwLock<Vec<Endpoint>>>,
    store: EndpointStore,
    // Serializes reconciliation so two racing syncs cannot interleave.
    sync_lock: Mutex<()>,
}

impl EndpointRegistry {
    /// Create a registry backed by `store`, loading any persisted endpoints.
    pub fn new(control: Arc<dyn ControlPlane>, store: EndpointStore) -> Result<Self> {
        let endpoints = store.load()?;
        Ok(Self {
            control,
            endpoints: Arc::new(RwLock::new(endpoints)),
            store,
            sync_lock: Mutex::new(()),
        })
    }

    /// Deploy `count` new forwarding endpoints.
    ///
    /// Each unit's outcome is tracked independently. Endpoints that deployed
    /// successfully are recorded and persisted even when later units fail;
    /// any failure surfaces as [`CoreError::PartialFailure`] reporting how
    /// many succeeded and which units failed. `count == 0` is a no-op.
    pub async fn create(&self, count: usize) -> Result<Vec<Endpoint>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let outcomes = join_all((0..count).map(|_| self.control.deploy())).await;

        let mut created = Vec::new();
        let mut failures = Vec::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(script) => {
                    debug!("Deployed endpoint {}: {}", script.id, script.public_url);
                    created.push(Endpoint {
                        id: script.id,
                        public_url: script.public_url,
                        created_at: script.created_at.unwrap_or_else(Utc::now),
                        status: EndpointStatus::Active,
                    });
                }
                Err(e) => {
                    warn!("Failed to deploy endpoint {}/{}: {}", i + 1, count, e);
                    failures.push((format!("endpoint {}/{}", i + 1, count), e.to_string()));
                }
            }
        }

        {
            let mut endpoints = self.endpoints.write().await;
            for endpoint in &created {
                // id is unique across the registry; a redeploy under an
                // existing name replaces the record instead of duplicating it
                match endpoints.iter_mut().find(|e| e.id == endpoint.id) {
                    Some(existing) => *existing = endpoint.clone(),
                    None => endpoints.push(endpoint.clone()),
                }
            }
            self.store.save(&endpoints)?;
        }

        info!("Created {} endpoints, {} failed", created.len(), failures.len());

        if failures.is_empty() {
            Ok(created)
        } else {
            Err(CoreError::PartialFailure {
                succeeded: created.len(),
                attempted: count,
                failures,
            })
        }
    }

    /// List known endpoints in creation order.
    ///
    /// Pure read of local state; never contacts the control plane.
    pub async fn list(&self) -> Vec<Endpoint> {
        self.endpoints.read().await.clone()
    }

    /// Reconcile local state with the control plane's authoritative list.
    ///
    /// Remote-only endpoints are added, local-only endpoints are removed
    /// (external deletion is expected, not an error), and URL mismatches are
    /// corrected. Idempotent: a second call with no intervening remote
    /// change yields an empty report.
    pub async fn sync(&self) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;

        let remote = self.control.list_deployed().await?;
        let remote_ids: HashSet<&str> = remote.iter().map(|s| s.id.as_str()).collect();

        let mut report = SyncReport::default();
        let mut endpoints = self.endpoints.write().await;

        endpoints.retain(|e| {
            if remote_ids.contains(e.id.as_str()) {
                true
            } else {
                debug!("Endpoint {} deleted remotely, dropping local record", e.id);
                report.removed.push(e.id.clone());
                false
            }
        });

        for script in remote {
            match endpoints.iter_mut().find(|e| e.id == script.id) {
                Some(local) => {
                    if local.public_url != script.public_url {
                        debug!("Endpoint {} URL changed: {} -> {}", local.id, local.public_url, script.public_url);
                        local.public_url = script.public_url;
                        report.updated.push(local.id.clone());
                    }
                }
                None => {
                    debug!("Endpoint {} found remotely, adding local record", script.id);
                    report.added.push(script.id.clone());
                    endpoints.push(Endpoint {
                        id: script.id,
                        public_url: script.public_url,
                        created_at: script.created_at.unwrap_or_else(Utc::now),
                        status: EndpointStatus::Active,
                    });
                }
            }
        }

        self.store.save(&endpoints)?;

        info!(
            "Sync complete: {} added, {} removed, {} updated",
            report.added.len(),
            report.removed.len(),
            report.updated.len()
        );
        Ok(report)
    }

    /// Delete every known endpoint, remotely first.
    ///
    /// A record is removed locally only after its own remote deletion
    /// succeeded; endpoints whose remote deletion fails stay in the registry
    /// and are reported via [`CoreError::PartialFailure`]. Returns the
    /// number deleted on full success.
    pub async fn cleanup(&self) -> Result<usize> {
        let snapshot = self.endpoints.read().await.clone();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let outcomes = join_all(snapshot.iter().map(|e| async {
            let result = self.control.delete(&e.id).await;
            (e.id.clone(), result)
        }))
        .await;

        let mut deleted: HashSet<String> = HashSet::new();
        let mut failures = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    debug!("Deleted endpoint: {}", id);
                    deleted.insert(id);
                }
                Err(e) => {
                    warn!("Failed to delete endpoint {}: {}", id, e);
                    failures.push((id, e.to_string()));
                }
            }
        }

        {
            let mut endpoints = self.endpoints.write().await;
            endpoints.retain(|e| !deleted.contains(&e.id));
            self.store.save(&endpoints)?;
        }

        info!("Cleanup complete: {} deleted, {} failed", deleted.len(), failures.len());

        if failures.is_empty() {
            Ok(deleted.len())
        } else {
            Err(CoreError::PartialFailure {
                succeeded: deleted.len(),
                attempted: snapshot.len(),
                failures,
            })
        }
    }

    /// Update the liveness status of one endpoint (used by the prober).
    pub async fn set_status(&self, id: &str, status: EndpointStatus) -> Result<()> {
        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| CoreError::EndpointNotFound(id.to_string()))?;

        if endpoint.status != status {
            debug!("Endpoint {} status: {:?} -> {:?}", id, endpoint.status, status);
            endpoint.status = status;
            self.store.save(&endpoints)?;
        }
        Ok(())
    }

    /// Count of known endpoints.
    pub async fn endpoint_count(&self) -> usize {
        self.endpoints.read().await.len()
    }
}
