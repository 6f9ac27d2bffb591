use thiserror::Error;

/// Container runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to connect to the container runtime: {0}")]
    Connect(String),

    #[cfg(feature = "docker")]
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Container {0} not found")]
    NotFound(String),

    #[error("Invalid runtime endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("'{host}' couldn't be resolved: {reason}")]
    HostResolution { host: String, reason: String },

    #[error("Runtime event stream failed: {0}")]
    Events(String),
}
