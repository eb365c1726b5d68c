use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Missing or invalid configuration: {0}")]
    Configuration(String),

    #[error("Control plane request failed: {0}")]
    ControlPlane(String),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("{succeeded} of {attempted} operations succeeded")]
    PartialFailure {
        succeeded: usize,
        attempted: usize,
        /// Per-unit failures as (unit, reason) pairs.
        failures: Vec<(String, String)>,
    },

    #[error("Registry store error: {0}")]
    Store(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
