//! Event orchestration
//!
//! The single control loop that turns container lifecycle events into
//! registry changes.

pub mod orchestrator;

pub use orchestrator::Orchestrator;
