//! Interface name classification for SONiC ports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of interface, derived from its SONiC name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// Front-panel Ethernet port (`Ethernet0`).
    Ethernet,
    /// VLAN sub-interface of a front-panel port (`Ethernet0.10`).
    SubInterface,
    /// Link aggregation group (`PortChannel0001`).
    PortChannel,
    /// Backplane port on a multi-ASIC device (`Ethernet-BP0`).
    Backplane,
    /// Internal recycle port on a chassis (`Ethernet-Rec0`).
    Recycle,
    /// VLAN interface (`Vlan1000`).
    Vlan,
    /// Anything else (loopbacks, management, inband).
    Other,
}

impl InterfaceKind {
    /// Classifies an interface by name.
    pub fn classify(name: &str) -> Self {
        if name.starts_with("Ethernet-BP") {
            InterfaceKind::Backplane
        } else if name.starts_with("Ethernet-Rec") {
            InterfaceKind::Recycle
        } else if name.starts_with("Ethernet") {
            if name.contains('.') {
                InterfaceKind::SubInterface
            } else {
                InterfaceKind::Ethernet
            }
        } else if name.starts_with("PortChannel") {
            InterfaceKind::PortChannel
        } else if name.starts_with("Vlan") {
            InterfaceKind::Vlan
        } else {
            InterfaceKind::Other
        }
    }

    /// Returns true for ports that may carry test traffic.
    pub const fn is_front_panel(&self) -> bool {
        matches!(self, InterfaceKind::Ethernet | InterfaceKind::SubInterface)
    }

    /// Returns true for ports internal to the device.
    pub const fn is_internal(&self) -> bool {
        matches!(self, InterfaceKind::Backplane | InterfaceKind::Recycle)
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterfaceKind::Ethernet => "ethernet",
            InterfaceKind::SubInterface => "subinterface",
            InterfaceKind::PortChannel => "portchannel",
            InterfaceKind::Backplane => "backplane",
            InterfaceKind::Recycle => "recycle",
            InterfaceKind::Vlan => "vlan",
            InterfaceKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Splits `Ethernet0.10` into `("Ethernet0", Some("10"))`.
pub fn split_sub_interface(name: &str) -> (&str, Option<&str>) {
    match name.split_once('.') {
        Some((parent, vlan)) => (parent, Some(vlan)),
        None => (name, None),
    }
}
