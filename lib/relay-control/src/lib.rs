//! Cloudflare Workers control plane client
//!
//! Implements the [`ControlPlane`](relay_core::ControlPlane) contract
//! against the Workers management API: deploying the embedded forwarding
//! script, listing deployed instances, and deleting them. Also owns the
//! credentials configuration that the excluded surfaces (CLI) load.

pub mod client;
pub mod config;
pub mod script;

pub use client::{CloudflareClient, ENDPOINT_PREFIX};
pub use config::RelayConfig;
pub use script::WORKER_SCRIPT;
