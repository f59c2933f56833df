//! Common types for the SONiC QoS test harness.
//!
//! This crate provides the plain data model the resolver works on. It
//! performs no I/O:
//!
//! - [`Device`] / [`AsicInstance`]: chassis members and their forwarding ASICs
//! - [`MinigraphFacts`]: per-device port, LAG, VLAN and neighbor facts
//! - [`Testbed`]: the inventory handed to the harness for one test session
//! - [`InterfaceKind`]: classification of SONiC interface names
//! - [`VlanId`] / [`Ipv4Address`]: validated network primitives

mod device;
mod facts;
mod ip;
mod port;
mod testbed;
mod vlan;

pub use device::{AsicInstance, Device, RedisEndpoint, SwitchType, Vendor};
pub use facts::{
    ActiveIpInterface, IpInterfaceFacts, MinigraphFacts, MuxCableFacts, NeighborFacts,
    PortChannelFacts, PortFacts, SystemPortFacts, VlanFacts,
};
pub use ip::Ipv4Address;
pub use port::{split_sub_interface, InterfaceKind};
pub use testbed::{Testbed, TopologyInfo};
pub use vlan::VlanId;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid VLAN name: {0}")]
    InvalidVlanName(String),

    #[error("invalid interface name: {0}")]
    InvalidInterfaceName(String),

    #[error("IP address {base} + {offset} overflows the IPv4 space")]
    AddressOverflow { base: String, offset: u32 },
}
