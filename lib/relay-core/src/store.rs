//! File-backed persistence for the endpoint registry
//!
//! The on-disk layout is a JSON object mapping endpoint id to its record,
//! kept in a file alongside (but separate from) the credentials config. All
//! mutation goes through [`EndpointRegistry`](crate::EndpointRegistry);
//! nothing else writes this file.

use crate::{Endpoint, EndpointStatus, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Serialize, Deserialize)]
struct PersistedEndpoint {
    public_url: String,
    created_at: DateTime<Utc>,
    status: EndpointStatus,
}

/// Load/save boundary for the persisted endpoint set.
#[derive(Clone, Debug)]
pub struct EndpointStore {
    path: PathBuf,
}

impl EndpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted endpoint set, in creation order.
    ///
    /// A missing file is an empty registry, not an error.
    pub fn load(&self) -> Result<Vec<Endpoint>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let records: BTreeMap<String, PersistedEndpoint> = serde_json::from_str(&raw)?;

        let mut endpoints: Vec<Endpoint> = records
            .into_iter()
            .map(|(id, rec)| Endpoint {
                id,
                public_url: rec.public_url,
                created_at: rec.created_at,
                status: rec.status,
            })
            .collect();
        endpoints.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        debug!("Loaded {} endpoints from {}", endpoints.len(), self.path.display());
        Ok(endpoints)
    }

    /// Persist the full endpoint set, replacing the previous contents.
    pub fn save(&self, endpoints: &[Endpoint]) -> Result<()> {
        let records: BTreeMap<&str, PersistedEndpoint> = endpoints
            .iter()
            .map(|e| {
                (
                    e.id.as_str(),
                    PersistedEndpoint {
                        public_url: e.public_url.clone(),
                        created_at: e.created_at,
                        status: e.status,
                    },
                )
            })
            .collect();

        let raw = serde_json::to_string_pretty(&records)?;
        std::fs::write(&self.path, raw)?;

        debug!("Saved {} endpoints to {}", endpoints.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn endpoint(id: &str, ts: i64) -> Endpoint {
        Endpoint {
            id: id.to_string(),
            public_url: format!("https://{}.workers.dev", id),
            created_at: Utc.timestamp_opt(ts, 0).unwrap(),
            status: EndpointStatus::Active,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EndpointStore::new(dir.path().join("endpoints.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = EndpointStore::new(dir.path().join("endpoints.json"));

        let endpoints = vec![endpoint("relay-100-aaaaaa", 100), endpoint("relay-200-bbbbbb", 200)];
        store.save(&endpoints).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "relay-100-aaaaaa");
        assert_eq!(loaded[0].public_url, "https://relay-100-aaaaaa.workers.dev");
        assert_eq!(loaded[0].status, EndpointStatus::Active);
    }

    #[test]
    fn test_load_orders_by_creation_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = EndpointStore::new(dir.path().join("endpoints.json"));

        // Saved out of order; the map key (id) sorts differently too.
        let endpoints = vec![endpoint("relay-900-zzzzzz", 900), endpoint("relay-050-aaaaaa", 50)];
        store.save(&endpoints).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded[0].id, "relay-050-aaaaaa");
        assert_eq!(loaded[1].id, "relay-900-zzzzzz");
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = EndpointStore::new(dir.path().join("endpoints.json"));

        store.save(&[endpoint("relay-1-a", 1), endpoint("relay-2-b", 2)]).unwrap();
        store.save(&[endpoint("relay-3-c", 3)]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "relay-3-c");
    }
}
