//! Loopback source address management
//!
//! Hands out unique loopback alias address/port pairs for relays and provisions
//! new aliases on the loopback interface when the existing ones are full.

pub mod alias;
pub mod allocator;

pub use alias::{AliasMethod, AliasProvisioner, CommandProvisioner, ProvisionError};
pub use allocator::{AddressAllocator, AllocError, DEFAULT_SOURCE_START};
