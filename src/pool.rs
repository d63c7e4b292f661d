// SPDX-License-Identifier: AGPL-3.0-or-later
//! Address pool allocation
//!
//! A pool is an IPv4 CIDR block whose first host is reserved for the server
//! (gateway). Peers get the lowest free host starting at host number 2.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use tracing::debug;

use crate::error::{Result, RosterError};

/// Host number of the reserved gateway address
pub const GATEWAY_HOST: u32 = 1;

/// First host number handed to peers
pub const FIRST_PEER_HOST: u32 = 2;

/// Longest prefix that still leaves room for a peer
pub const MAX_PREFIX_LEN: u8 = 30;

/// An IPv4 block minus its reserved gateway address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPool {
    network: Ipv4Net,
}

impl AddressPool {
    /// Create a pool from a CIDR block; host bits are truncated
    pub fn new(network: Ipv4Net) -> Result<Self> {
        if network.prefix_len() > MAX_PREFIX_LEN {
            return Err(RosterError::InvalidConfig {
                message: format!(
                    "pool {} is too small, prefix must be /{} or shorter",
                    network, MAX_PREFIX_LEN
                ),
            });
        }

        Ok(Self {
            network: network.trunc(),
        })
    }

    /// The CIDR block backing this pool
    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    /// The reserved server address (host 1)
    pub fn gateway(&self) -> Ipv4Addr {
        self.address_of(GATEWAY_HOST)
    }

    /// Whether `address` lies inside the block
    pub fn contains(&self, address: &Ipv4Addr) -> bool {
        self.network.contains(address)
    }

    /// Number of addresses peers can receive
    pub fn capacity(&self) -> u32 {
        self.broadcast_host() - FIRST_PEER_HOST
    }

    /// Pick the lowest free peer address not present in `used`.
    ///
    /// Deterministic: the same `used` set always yields the same address.
    pub fn allocate(&self, used: &BTreeSet<Ipv4Addr>) -> Result<Ipv4Addr> {
        for host in FIRST_PEER_HOST..self.broadcast_host() {
            let candidate = self.address_of(host);
            if used.contains(&candidate) {
                continue;
            }

            let address = self.validate(candidate)?;
            debug!(address = %address, used = used.len(), "Allocated address");
            return Ok(address);
        }

        Err(RosterError::PoolExhausted {
            network: self.network.to_string(),
        })
    }

    /// Validate a dotted-quad address against this pool
    pub fn validate_address(&self, text: &str) -> Result<Ipv4Addr> {
        let address: Ipv4Addr = text.trim().parse().map_err(|_| RosterError::InvalidAddress {
            address: text.to_string(),
            reason: "not a four-octet IPv4 address".to_string(),
        })?;

        self.validate(address)
    }

    fn validate(&self, address: Ipv4Addr) -> Result<Ipv4Addr> {
        let invalid = |reason: String| RosterError::InvalidAddress {
            address: address.to_string(),
            reason,
        };

        if !self.contains(&address) {
            return Err(invalid(format!("outside of pool {}", self.network)));
        }
        if address == self.gateway() {
            return Err(invalid("reserved for the server".to_string()));
        }

        let host = self.host_number(address);
        if host <= GATEWAY_HOST || host >= self.broadcast_host() {
            return Err(invalid(format!(
                "host number {} must be between {} and {}",
                host,
                GATEWAY_HOST,
                self.broadcast_host()
            )));
        }

        Ok(address)
    }

    fn host_number(&self, address: Ipv4Addr) -> u32 {
        u32::from(address) - u32::from(self.network.network())
    }

    fn broadcast_host(&self) -> u32 {
        self.host_number(self.network.broadcast())
    }

    fn address_of(&self, host: u32) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network.network()) + host)
    }
}

impl std::fmt::Display for AddressPool {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> AddressPool {
        AddressPool::new("10.8.0.0/24".parse().unwrap()).unwrap()
    }

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 8, 0, last)
    }

    #[test]
    fn test_allocate_empty_pool_starts_at_two() {
        let used = BTreeSet::new();
        assert_eq!(pool().allocate(&used).unwrap(), addr(2));
    }

    #[test]
    fn test_allocate_fills_gaps_in_order() {
        let used: BTreeSet<_> = [addr(2), addr(3), addr(5)].into_iter().collect();
        assert_eq!(pool().allocate(&used).unwrap(), addr(4));
    }

    #[test]
    fn test_allocate_is_deterministic() {
        let used: BTreeSet<_> = (2..=40).map(addr).collect();
        let first = pool().allocate(&used).unwrap();
        for _ in 0..10 {
            assert_eq!(pool().allocate(&used).unwrap(), first);
        }
    }

    #[test]
    fn test_exhausted_pool() {
        let used: BTreeSet<_> = (2..=254).map(addr).collect();
        let err = pool().allocate(&used).unwrap_err();
        assert!(matches!(err, RosterError::PoolExhausted { .. }));
    }

    #[test]
    fn test_last_free_address_then_exhausted() {
        let mut used: BTreeSet<_> = (2..=253).map(addr).collect();
        let last = pool().allocate(&used).unwrap();
        assert_eq!(last, addr(254));

        used.insert(last);
        assert!(matches!(
            pool().allocate(&used),
            Err(RosterError::PoolExhausted { .. })
        ));
    }

    #[test]
    fn test_addresses_outside_pool_do_not_count_as_used() {
        let used: BTreeSet<_> = [Ipv4Addr::new(10, 9, 0, 2)].into_iter().collect();
        assert_eq!(pool().allocate(&used).unwrap(), addr(2));
    }

    #[test]
    fn test_validate_address() {
        let pool = pool();
        assert_eq!(pool.validate_address("10.8.0.17").unwrap(), addr(17));
        assert_eq!(pool.validate_address("10.8.0.254").unwrap(), addr(254));

        for bad in [
            "10.8.0",
            "10.8.0.256",
            "not-an-ip",
            "10.8.0.1",
            "10.8.0.0",
            "10.8.0.255",
            "10.9.0.5",
        ] {
            assert!(
                matches!(pool.validate_address(bad), Err(RosterError::InvalidAddress { .. })),
                "expected InvalidAddress for {}",
                bad
            );
        }
    }

    #[test]
    fn test_wider_pool() {
        let pool = AddressPool::new("172.16.0.0/22".parse().unwrap()).unwrap();
        assert_eq!(pool.gateway(), Ipv4Addr::new(172, 16, 0, 1));
        assert_eq!(pool.capacity(), 1021);
        assert!(pool.validate_address("172.16.1.0").is_ok());
        assert!(pool.validate_address("172.16.3.255").is_err());
    }

    #[test]
    fn test_host_bits_truncated_and_tiny_pools_rejected() {
        let pool = AddressPool::new("10.8.0.1/24".parse().unwrap()).unwrap();
        assert_eq!(pool.network().to_string(), "10.8.0.0/24");
        assert!(AddressPool::new("10.8.0.0/31".parse().unwrap()).is_err());
    }
}
