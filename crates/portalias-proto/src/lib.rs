//! Shared data types for portalias
//!
//! Container records as reported by the runtime, the runtime events the control
//! loop reacts to, and the binding records the registry publishes.

pub mod binding;
pub mod container;
pub mod event;

pub use binding::{BindingInfo, RelayKey};
pub use container::{ContainerInfo, PortMapping, PortProtocol};
pub use event::ContainerEvent;

/// Container identity as assigned by the runtime
pub type ContainerId = String;
