//! Request relaying through deployed forwarding endpoints
pub mod dispatcher;
pub mod forwarder;
pub mod metrics;
pub mod probe;
pub mod selection;

pub use dispatcher::{ProxyDispatcher, RelayError, RelayResponse, TargetTransport};
pub use forwarder::EdgeForwarder;
pub use metrics::MetricsCollector;
pub use probe::{EndpointProber, ProbeResult};
pub use selection::{EndpointSelector, SelectionStrategy};
