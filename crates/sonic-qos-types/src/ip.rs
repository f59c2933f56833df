//! IPv4 address type used for test-port peer addressing.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// An IPv4 address wrapper with the arithmetic the harness needs for
/// synthesizing per-port peer addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ipv4Address(Ipv4Addr);

impl Ipv4Address {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Address(Ipv4Addr::new(a, b, c, d))
    }

    pub const fn inner(&self) -> Ipv4Addr {
        self.0
    }

    /// Parses an address that may carry a prefix length (`192.168.0.1/21`).
    pub fn from_interface(s: &str) -> Result<Self, ParseError> {
        let host = s.split('/').next().unwrap_or(s);
        host.parse()
    }

    /// Returns the address `offset` hosts above this one.
    ///
    /// VLAN-addressed test ports get `vlan_ip + ptf_index + 1` as their peer.
    ///
    /// ```
    /// use sonic_qos_types::Ipv4Address;
    ///
    /// let base = Ipv4Address::new(192, 168, 0, 1);
    /// assert_eq!(base.offset(5).unwrap().to_string(), "192.168.0.6");
    /// ```
    pub fn offset(&self, offset: u32) -> Result<Self, ParseError> {
        u32::from(self.0)
            .checked_add(offset)
            .map(|v| Ipv4Address(Ipv4Addr::from(v)))
            .ok_or_else(|| ParseError::AddressOverflow {
                base: self.to_string(),
                offset,
            })
    }

    /// Returns true if `s` (optionally with a prefix length) is an IPv4 address.
    ///
    /// IPv6 peers are silently skipped when building test ports, so anything
    /// that does not parse as IPv4 is reported as `false` rather than an error.
    pub fn is_ipv4_interface(s: &str) -> bool {
        let host = s.split('/').next().unwrap_or(s);
        matches!(host.parse::<IpAddr>(), Ok(IpAddr::V4(_)))
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ipv4Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Ipv4Address)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Ipv4Address(addr)
    }
}

impl From<Ipv4Address> for Ipv4Addr {
    fn from(addr: Ipv4Address) -> Self {
        addr.0
    }
}
