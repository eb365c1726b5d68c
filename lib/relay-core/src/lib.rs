//! Core endpoint registry functionality
//!
//! This library provides:
//! - The endpoint data model and status tracking
//! - The control plane contract for deploying forwarding endpoints
//! - A file-backed registry reconciled against the control plane

pub mod control;
pub mod endpoint;
pub mod error;
pub mod registry;
pub mod store;

pub use control::{ControlPlane, DeployedScript};
pub use endpoint::{Endpoint, EndpointStatus};
pub use error::{CoreError, Result};
pub use registry::{EndpointRegistry, SyncReport};
pub use store::EndpointStore;
