use portalias_net::AllocError;
use thiserror::Error;

/// Errors that escape reconciliation.
///
/// Per-port and per-container problems are logged and skipped inside the
/// registry; only conditions that make further forwarding unsafe surface here.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Source address allocation failed: {0}")]
    Allocation(#[from] AllocError),
}
