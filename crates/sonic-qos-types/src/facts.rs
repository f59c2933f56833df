//! Minigraph-style port facts for one device.
//!
//! These mirror the shape of the facts the SONiC management tooling
//! extracts from a device's minigraph and running config.

use crate::port::InterfaceKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-port attributes from the PORT table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFacts {
    /// Configured speed in Mb/s.
    #[serde(default)]
    pub speed: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortChannelFacts {
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanFacts {
    /// Interface name (`Vlan1000`).
    pub name: String,
    #[serde(default)]
    pub vlanid: Option<u16>,
    #[serde(default)]
    pub members: Vec<String>,
    /// `Tagged` / `Untagged`.
    #[serde(default, rename = "type")]
    pub vlan_type: Option<String>,
}

impl VlanFacts {
    pub fn is_tagged(&self) -> bool {
        self.vlan_type
            .as_deref()
            .is_some_and(|t| t.contains("Tagged"))
    }
}

/// A routed, VLAN or sub-interface address entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInterfaceFacts {
    pub attachto: String,
    pub addr: String,
    #[serde(default)]
    pub peer_addr: String,
    /// VLAN tag of a sub-interface.
    #[serde(default)]
    pub vlan: Option<String>,
}

/// Active (oper-up) IP interface as seen on one ASIC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveIpInterface {
    pub addr: String,
    pub peer_ipv4: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborFacts {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxCableFacts {
    /// Server address with prefix length (`192.168.0.2/32`).
    pub server_ipv4: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPortFacts {
    pub system_port_id: u32,
}

/// All port facts of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinigraphFacts {
    /// Port name to traffic-generator port index.
    #[serde(default)]
    pub ptf_indices: BTreeMap<String, u32>,
    #[serde(default)]
    pub ports: BTreeMap<String, PortFacts>,
    #[serde(default)]
    pub portchannels: BTreeMap<String, PortChannelFacts>,
    /// VLANs in configuration order.
    #[serde(default)]
    pub vlans: Vec<VlanFacts>,
    #[serde(default)]
    pub vlan_interfaces: Vec<IpInterfaceFacts>,
    #[serde(default)]
    pub interfaces: Vec<IpInterfaceFacts>,
    #[serde(default)]
    pub vlan_sub_interfaces: Vec<IpInterfaceFacts>,
    /// Port name to LLDP/minigraph neighbor.
    #[serde(default)]
    pub neighbors: BTreeMap<String, NeighborFacts>,
    #[serde(default)]
    pub mux_cable: BTreeMap<String, MuxCableFacts>,
    /// SYSTEM_PORT table keyed by `<namespace>|<port>` or `Asic<N>|<port>`.
    #[serde(default)]
    pub system_ports: BTreeMap<String, SystemPortFacts>,
    /// Per-ASIC active IP interfaces, keyed by ASIC index.
    #[serde(default)]
    pub active_ip_interfaces: BTreeMap<u32, BTreeMap<String, ActiveIpInterface>>,
}

impl MinigraphFacts {
    pub fn ptf_index(&self, port: &str) -> Option<u32> {
        self.ptf_indices.get(port).copied()
    }

    /// Inverse of `ptf_indices`.
    pub fn ports_by_ptf_index(&self) -> BTreeMap<u32, String> {
        self.ptf_indices
            .iter()
            .map(|(name, idx)| (*idx, name.clone()))
            .collect()
    }

    /// Returns a copy with backplane ports removed from the port and index maps.
    pub fn without_backplane(&self) -> Self {
        let keep = |name: &String| InterfaceKind::classify(name) != InterfaceKind::Backplane;
        let mut facts = self.clone();
        facts.ptf_indices.retain(|name, _| keep(name));
        facts.ports.retain(|name, _| keep(name));
        facts
    }

    /// Ports that are members of any LAG.
    pub fn lag_members(&self) -> BTreeSet<&str> {
        self.portchannels
            .values()
            .flat_map(|lag| lag.members.iter().map(String::as_str))
            .collect()
    }

    /// First member of `lag`, used to index a LAG by one physical port.
    pub fn first_lag_member(&self, lag: &str) -> Option<&str> {
        self.portchannels
            .get(lag)
            .and_then(|pc| pc.members.first())
            .map(String::as_str)
    }

    pub fn port_speed(&self, port: &str) -> Option<u64> {
        self.ports.get(port).and_then(|p| p.speed)
    }

    pub fn neighbor_name(&self, port: &str) -> Option<&str> {
        self.neighbors.get(port).map(|n| n.name.as_str())
    }
}
