//! TCP relay
//!
//! A relay binds one loopback source address/port and forwards every accepted
//! connection, full duplex, to one destination. It owns every connection it
//! accepts and closes all of them when stopped.

mod error;
mod forward;
pub mod hostname;
pub mod plan;
mod relay;
mod tracker;

pub use error::RelayError;
pub use hostname::derive_hostname;
pub use plan::{choose_source_port, RelayPlan, DEFAULT_FIRST_EPHEMERAL_PORT};
pub use relay::{Relay, RelayConfig, RelayState, RelayStats};
