//! IPv4 CIDR ranges and host enumeration

use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RangeError {
    #[error("Invalid network address: {0}")]
    InvalidAddress(String),
    #[error("Invalid prefix length: {0}")]
    InvalidPrefix(String),
}

/// An IPv4 network given in CIDR notation (e.g. "192.168.1.0/24").
///
/// Host bits in the address are ignored, so "192.168.1.77/24" is the same
/// network as "192.168.1.0/24".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl AddressRange {
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, RangeError> {
        if prefix_len > 32 {
            return Err(RangeError::InvalidPrefix(prefix_len.to_string()));
        }
        let network = Ipv4Addr::from(u32::from(address) & mask(prefix_len));
        Ok(Self { network, prefix_len })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !mask(self.prefix_len))
    }

    /// Usable host addresses.
    ///
    /// Network and broadcast addresses are skipped, except for /31 point-to-point
    /// links and /32 single hosts where every address is usable.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let network = u32::from(self.network);
        let broadcast = u32::from(self.broadcast());

        let (first, last) = if self.prefix_len >= 31 {
            (network, broadcast)
        } else {
            (network + 1, broadcast - 1)
        };

        (first..=last).map(Ipv4Addr::from)
    }

    /// Number of usable host addresses
    pub fn host_count(&self) -> u64 {
        let size = 1u64 << (32 - u32::from(self.prefix_len));
        if self.prefix_len >= 31 {
            size
        } else {
            size - 2
        }
    }
}

impl FromStr for AddressRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let address = Ipv4Addr::from_str(addr.trim())
            .map_err(|_| RangeError::InvalidAddress(addr.to_string()))?;

        let prefix_len = match prefix {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .map_err(|_| RangeError::InvalidPrefix(p.to_string()))?,
            None => 32,
        };

        Self::new(address, prefix_len)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}
