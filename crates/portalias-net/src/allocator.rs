//! Source address allocator
//!
//! Every relay listens on a loopback alias address. The allocator owns the set
//! of aliases provisioned so far and, per alias, which ports are claimed. It is
//! the only place that decides where a relay binds, so two relays never share
//! an address/port pair.
//!
//! Allocation is first-fit over the aliases in ascending address order. When
//! every alias already has the requested port claimed, the successor of the
//! highest alias is provisioned. Aliases are never removed; only their port
//! claims are released.

use crate::alias::{AliasProvisioner, ProvisionError};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// First alias provisioned when none is configured
pub const DEFAULT_SOURCE_START: Ipv4Addr = Ipv4Addr::new(127, 2, 2, 1);

/// Allocation errors. All of them are fatal for the process.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("Source start address {0} is not a loopback address")]
    NotLoopback(Ipv4Addr),

    #[error("Ran out of loopback addresses after {last}")]
    Exhausted { last: Ipv4Addr },

    #[error("Failed to add loopback alias {addr}: {source}")]
    Provision {
        addr: Ipv4Addr,
        source: ProvisionError,
    },
}

/// Loopback alias pool with per-alias port claims
pub struct AddressAllocator {
    start: Ipv4Addr,
    /// alias -> (claimed port -> destination it serves)
    addresses: BTreeMap<Ipv4Addr, BTreeMap<u16, SocketAddr>>,
    provisioner: Arc<dyn AliasProvisioner>,
}

impl AddressAllocator {
    pub fn new(start: Ipv4Addr, provisioner: Arc<dyn AliasProvisioner>) -> Result<Self, AllocError> {
        if !start.is_loopback() {
            return Err(AllocError::NotLoopback(start));
        }

        Ok(Self {
            start,
            addresses: BTreeMap::new(),
            provisioner,
        })
    }

    /// Claim `port` on the first alias that has it free, provisioning a new
    /// alias if none does.
    pub fn allocate(&mut self, port: u16, destination: SocketAddr) -> Result<SocketAddrV4, AllocError> {
        for (addr, claims) in self.addresses.iter_mut() {
            if !claims.contains_key(&port) {
                claims.insert(port, destination);
                debug!(
                    "Claimed {}:{} for {} on existing alias",
                    addr, port, destination
                );
                return Ok(SocketAddrV4::new(*addr, port));
            }
        }

        let next = self.next_address()?;
        self.provisioner
            .provision(next)
            .map_err(|source| AllocError::Provision { addr: next, source })?;

        let mut claims = BTreeMap::new();
        claims.insert(port, destination);
        self.addresses.insert(next, claims);

        info!(
            "Provisioned source address {} ({} aliases in use)",
            next,
            self.addresses.len()
        );
        Ok(SocketAddrV4::new(next, port))
    }

    /// Drop the claim for `port` on `addr`, returning the destination it served.
    /// The alias itself stays provisioned.
    pub fn release(&mut self, addr: Ipv4Addr, port: u16) -> Option<SocketAddr> {
        let released = self
            .addresses
            .get_mut(&addr)
            .and_then(|claims| claims.remove(&port));

        if released.is_some() {
            debug!("Released claim {}:{}", addr, port);
        }
        released
    }

    /// Provisioned aliases in ascending order
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.addresses.keys().copied().collect()
    }

    pub fn is_claimed(&self, addr: Ipv4Addr, port: u16) -> bool {
        self.addresses
            .get(&addr)
            .map(|claims| claims.contains_key(&port))
            .unwrap_or(false)
    }

    /// Claims held on `addr` as (port, destination), ascending by port
    pub fn claims(&self, addr: Ipv4Addr) -> Vec<(u16, SocketAddr)> {
        self.addresses
            .get(&addr)
            .map(|claims| claims.iter().map(|(p, d)| (*p, *d)).collect())
            .unwrap_or_default()
    }

    /// Total number of live claims across all aliases
    pub fn claim_count(&self) -> usize {
        self.addresses.values().map(|claims| claims.len()).sum()
    }

    fn next_address(&self) -> Result<Ipv4Addr, AllocError> {
        let Some(last) = self.addresses.keys().next_back().copied() else {
            return Ok(self.start);
        };

        let next = u32::from(last)
            .checked_add(1)
            .map(Ipv4Addr::from)
            .filter(|addr| addr.is_loopback())
            .ok_or(AllocError::Exhausted { last })?;
        Ok(next)
    }
}
