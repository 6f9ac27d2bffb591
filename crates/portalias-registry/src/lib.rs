//! Relay registry and reconciler
//!
//! Keeps one relay per container port, publishes each relay's hostname, and
//! brings both in line with what the container runtime reports.

pub mod error;
pub mod registry;
pub mod view;
pub mod zone;

pub use error::RegistryError;
pub use registry::{Registry, RegistryConfig};
pub use view::RegistryView;
pub use zone::HostnameZone;
