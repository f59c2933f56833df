//! Test port maps and source/destination port choice.
//!
//! [`collect_port_maps`] turns device facts into per-ASIC lists of candidate
//! traffic-generator port ids and their peer addresses. How a port gets its
//! peer address depends on the testbed shape:
//!
//! - VLAN-addressed (T0, and PTF on Nvidia): VLAN members get
//!   `vlan_ip + ptf_index + 1`, or the MUX server address on dual-ToR
//! - routed (T1, and PTF on Cisco): active IP interfaces carry their peer
//! - system-port (T2): routed, plus the VOQ system port of every port
//!
//! [`build_test_ports`] then picks `src`, `dst`, `dst_2` and `dst_3` from
//! those maps.

use crate::client::ConfigDbClient;
use crate::config::HarnessOptions;
use crate::error::{QosError, QosResult};
use crate::params::PortIdOverrides;
use crate::selector::ResolvedTopology;
use crate::tables;
use crate::topology::TopologyClass;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use sonic_qos_common::{DbId, FieldValues};
use sonic_qos_types::{
    split_sub_interface, ActiveIpInterface, Device, InterfaceKind, Ipv4Address, MinigraphFacts,
    Testbed, VlanId,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// SKUs whose sub-40G breakout ports are left out on frontend T0.
pub const BREAKOUT_SKUS: &[&str] = &["Arista-7050-QX-32S"];

/// SKUs that always test across uplinks.
pub const CISCO_UPLINK_OVERRIDE_SKUS: &[&str] =
    &["Cisco-8101-O8C48", "Cisco-8101-O8V48", "Cisco-8102-28FH-DPU-O-T1"];

/// Ports slower than this are breakout ports.
const BREAKOUT_SPEED_THRESHOLD: u64 = 40_000;

/// Returns true if uplinks carry their own DSCP to TC map.
pub async fn uses_separated_dscp_tc_map(client: &ConfigDbClient) -> QosResult<bool> {
    let key = DbId::ConfigDb.key(
        tables::CFG_DSCP_TO_TC_MAP_TABLE,
        &[tables::UPLINK_DSCP_TO_TC_MAP_KEY],
    );
    Ok(!client.hgetall(DbId::ConfigDb, &key).await?.is_empty())
}

/// Values keyed by device index, then ASIC index.
pub type PerAsic<T> = BTreeMap<usize, BTreeMap<u32, T>>;

fn per_asic_get<T>(map: &PerAsic<T>, device: usize, asic: u32) -> Option<&T> {
    map.get(&device).and_then(|m| m.get(&asic))
}

fn per_asic_insert<T>(map: &mut PerAsic<T>, device: usize, asic: u32, value: T) {
    map.entry(device).or_default().insert(asic, value);
}

/// Peer address of one test port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortIp {
    pub peer_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<VlanId>,
    /// DUT port name, recorded on system-port testbeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

impl PortIp {
    fn new(peer_addr: impl Into<String>) -> Self {
        Self {
            peer_addr: peer_addr.into(),
            vlan_id: None,
            port: None,
        }
    }
}

/// VOQ system port behind a test port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemPort {
    pub port: String,
    pub system_port: u32,
    /// The port itself, or the LAG it belongs to.
    pub port_type: String,
}

/// Ports facing one neighbor tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortGroup {
    pub ids: Vec<u32>,
    pub ips: Vec<String>,
    pub names: Vec<String>,
}

impl PortGroup {
    fn push(&mut self, id: u32, ip: &str, name: &str) {
        self.ids.push(id);
        self.ips.push(ip.to_string());
        self.names.push(name.to_string());
    }
}

/// Candidate test ports of every involved ASIC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortMaps {
    #[serde(rename = "testPortIds")]
    pub test_port_ids: PerAsic<Vec<u32>>,
    #[serde(rename = "testPortIps")]
    pub test_port_ips: PerAsic<BTreeMap<u32, PortIp>>,
    #[serde(skip)]
    pub dual_tor_port_indexes: PerAsic<Vec<u32>>,
    #[serde(skip)]
    pub sys_ports: PerAsic<BTreeMap<u32, SystemPort>>,
    #[serde(skip)]
    pub uplinks: PortGroup,
    #[serde(skip)]
    pub downlinks: PortGroup,
    /// Traffic-generator port id to DUT port name.
    #[serde(rename = "dutInterfaces")]
    pub dut_interfaces: BTreeMap<u32, String>,
}

/// Facts [`collect_port_maps`] works from.
#[derive(Debug, Clone, Copy)]
pub struct PortMapInputs<'a> {
    pub testbed: &'a Testbed,
    pub selection: &'a ResolvedTopology,
    pub class: TopologyClass,
    /// Dual-ToR facing port names of the source ASIC.
    pub dualtor_ports: &'a BTreeSet<String>,
    /// Uplinks and downlinks use different DSCP to TC maps.
    pub separated_dscp_tc_map: bool,
    /// `CABLE_LENGTH|AZURE` of the source ASIC, port to length.
    pub cable_lengths: &'a FieldValues,
    /// Active IP interfaces of each involved ASIC.
    pub active_ip_interfaces: &'a PerAsic<BTreeMap<String, ActiveIpInterface>>,
}

impl<'a> PortMapInputs<'a> {
    fn device(&self, index: usize) -> QosResult<&'a Device> {
        self.testbed
            .device(index)
            .ok_or_else(|| QosError::port_selection(format!("no device at index {}", index)))
    }

    /// Source ASIC, then destination ASIC when it differs.
    fn involved_asics(&self) -> Vec<(usize, u32)> {
        let s = self.selection;
        let mut asics = vec![(s.src_device, s.src_asic)];
        if !s.is_single_asic() {
            asics.push((s.dst_device, s.dst_asic));
        }
        asics
    }

    fn active_ips(&self, device: usize, asic: u32) -> QosResult<&'a BTreeMap<String, ActiveIpInterface>> {
        per_asic_get(self.active_ip_interfaces, device, asic).ok_or_else(|| {
            QosError::port_selection(format!(
                "no active IP interfaces known for device {} asic{}",
                device, asic
            ))
        })
    }
}

/// Addressing shape of the testbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortShape {
    VlanAddressed,
    Routed,
    SystemPort,
}

fn port_shape(inputs: &PortMapInputs<'_>, src: &Device) -> QosResult<PortShape> {
    let vendor = src.vendor();
    match inputs.class {
        TopologyClass::T0Like => Ok(PortShape::VlanAddressed),
        TopologyClass::PtfLike if vendor.is_mellanox() => Ok(PortShape::VlanAddressed),
        TopologyClass::T1Like => Ok(PortShape::Routed),
        TopologyClass::PtfLike if vendor.is_cisco() => Ok(PortShape::Routed),
        _ if inputs.testbed.topology.topo_type.contains("t2") => Ok(PortShape::SystemPort),
        _ => Err(QosError::unsupported(format!(
            "no test port layout for topology {} on {}",
            inputs.testbed.topology.name, vendor
        ))),
    }
}

/// Builds the candidate test port maps for the selected ASICs.
pub fn collect_port_maps(inputs: &PortMapInputs<'_>) -> QosResult<PortMaps> {
    let src = inputs.device(inputs.selection.src_device)?;
    let shape = port_shape(inputs, src)?;
    let mut maps = PortMaps::default();
    match shape {
        PortShape::VlanAddressed => collect_vlan_addressed(inputs, src, &mut maps)?,
        PortShape::Routed => collect_routed(inputs, src, &mut maps)?,
        PortShape::SystemPort => collect_system_ports(inputs, src, &mut maps)?,
    }

    maps.dut_interfaces = if inputs.testbed.topology.topo_type == "t2" {
        maps.test_port_ips
            .values()
            .flat_map(|asics| asics.values())
            .flat_map(|ips| ips.iter())
            .filter_map(|(idx, ip)| ip.port.clone().map(|p| (*idx, p)))
            .collect()
    } else {
        src.facts.without_backplane().ports_by_ptf_index()
    };

    info!(
        shape = ?shape,
        test_port_ids = ?maps.test_port_ids,
        uplinks = ?maps.uplinks.ids,
        downlinks = ?maps.downlinks.ids,
        "Collected test port maps"
    );
    Ok(maps)
}

/// Files `port` under uplinks or downlinks by its neighbor's tier.
fn split_by_neighbor(maps: &mut PortMaps, facts: &MinigraphFacts, idx: u32, peer: &str, port: &str) {
    let neighbor = facts.neighbor_name(port).unwrap_or_default().to_lowercase();
    if neighbor.contains("t0") {
        maps.downlinks.push(idx, peer, port);
    } else if neighbor.contains("t2") {
        maps.uplinks.push(idx, peer, port);
    }
}

fn parse_vlan(vlan: Option<&str>) -> QosResult<Option<VlanId>> {
    Ok(vlan.map(str::parse::<VlanId>).transpose()?)
}

fn collect_vlan_addressed(
    inputs: &PortMapInputs<'_>,
    src: &Device,
    maps: &mut PortMaps,
) -> QosResult<()> {
    let sel = inputs.selection;
    let topology = &inputs.testbed.topology;
    if src.is_multi_asic() {
        return Err(QosError::unsupported(
            "VLAN-addressed test ports are not supported on multi-ASIC devices",
        ));
    }
    let facts = src.facts.without_backplane();
    let mellanox = src.vendor().is_mellanox();

    let lag_ports: BTreeSet<u32> = facts
        .lag_members()
        .into_iter()
        .filter_map(|m| facts.ptf_index(m))
        .collect();
    let low_speed: BTreeSet<u32> =
        if BREAKOUT_SKUS.contains(&src.hwsku.as_str()) && !topology.is_backend() {
            facts
                .ports
                .iter()
                .filter(|(_, p)| p.speed.is_some_and(|s| s < BREAKOUT_SPEED_THRESHOLD))
                .filter_map(|(name, _)| facts.ptf_index(name))
                .collect()
        } else {
            BTreeSet::new()
        };

    let mut test_ids: BTreeSet<u32> = facts
        .ports
        .keys()
        .filter_map(|p| facts.ptf_index(p))
        .filter(|idx| !lag_ports.contains(idx) && !low_speed.contains(idx))
        .collect();
    if mellanox {
        // last index is the uplink of the fanout
        if let Some(uplink) = (facts.ptf_indices.len() as u32).checked_sub(1) {
            test_ids.remove(&uplink);
        }
    }
    if test_ids.is_empty() {
        return Err(QosError::unsupported("no ports are available for testing"));
    }
    let mut test_ids: Vec<u32> = test_ids.into_iter().collect();

    let interfaces = if topology.is_backend() {
        &facts.vlan_sub_interfaces
    } else {
        &facts.interfaces
    };
    let mut dut_ips = BTreeMap::new();
    let mut dual_tor_indexes = Vec::new();
    for cfg in interfaces {
        let (intf, _) = split_sub_interface(&cfg.attachto);
        if !Ipv4Address::is_ipv4_interface(&cfg.peer_addr) {
            continue;
        }
        let Some(idx) = facts.ptf_index(intf) else {
            debug!(interface = %intf, "No ptf index, skipping");
            continue;
        };
        if test_ids.contains(&idx) {
            let mut ip = PortIp::new(&cfg.peer_addr);
            ip.vlan_id = parse_vlan(cfg.vlan.as_deref())?;
            dut_ips.insert(idx, ip);
            if inputs.dualtor_ports.contains(intf) {
                dual_tor_indexes.push(idx);
            }
        }
        if inputs.separated_dscp_tc_map && mellanox {
            split_by_neighbor(maps, &facts, idx, &cfg.peer_addr, intf);
        }
    }

    if mellanox {
        let dualtor = inputs.class.is_ptf().then_some(inputs.dualtor_ports);
        test_ids = select_mellanox_port_group(&facts, &test_ids, inputs.cable_lengths, dualtor);
        dual_tor_indexes = test_ids.clone();
    }

    let lower_tor = inputs
        .testbed
        .lower_tor_index
        .and_then(|i| inputs.testbed.device(i))
        .unwrap_or(src);
    let mut test_ips = assign_vlan_port_ips(&facts, &topology.name, topology.is_dualtor(), lower_tor)?;
    if !dut_ips.is_empty() {
        test_ips = dut_ips;
    }
    if topology.is_backend() {
        test_ids = test_ips.keys().copied().collect();
    }

    per_asic_insert(&mut maps.test_port_ids, sel.src_device, sel.src_asic, test_ids);
    per_asic_insert(&mut maps.test_port_ips, sel.src_device, sel.src_asic, test_ips);
    per_asic_insert(&mut maps.dual_tor_port_indexes, sel.src_device, sel.src_asic, dual_tor_indexes);
    Ok(())
}

fn collect_routed(inputs: &PortMapInputs<'_>, src: &Device, maps: &mut PortMaps) -> QosResult<()> {
    let sel = inputs.selection;
    let split_links =
        inputs.separated_dscp_tc_map || CISCO_UPLINK_OVERRIDE_SKUS.contains(&src.hwsku.as_str());
    let mut dut_ips: PerAsic<BTreeMap<u32, PortIp>> = PerAsic::new();

    for (dev_idx, asic) in inputs.involved_asics() {
        let device = inputs.device(dev_idx)?;
        let facts = device.facts.without_backplane();
        let mut ips = BTreeMap::new();
        for (iface, addr) in inputs.active_ips(dev_idx, asic)? {
            let (port, vlan) = match InterfaceKind::classify(iface) {
                InterfaceKind::Ethernet | InterfaceKind::SubInterface => split_sub_interface(iface),
                InterfaceKind::PortChannel => match facts.first_lag_member(iface) {
                    Some(member) => (member, None),
                    None => {
                        debug!(lag = %iface, "LAG without members, skipping");
                        continue;
                    }
                },
                _ => continue,
            };
            let Some(idx) = facts.ptf_index(port) else {
                debug!(interface = %port, "No ptf index, skipping");
                continue;
            };
            let mut ip = PortIp::new(&addr.peer_ipv4);
            ip.vlan_id = parse_vlan(vlan)?;
            ips.insert(idx, ip);
            if split_links {
                split_by_neighbor(maps, &facts, idx, &addr.peer_ipv4, port);
            }
        }

        let mut test_ids: Vec<u32> = ips.keys().copied().collect();
        if device.vendor().is_mellanox() {
            let dualtor = inputs
                .testbed
                .topology
                .topo_type
                .contains("t1")
                .then_some(inputs.dualtor_ports);
            test_ids = select_mellanox_port_group(&facts, &test_ids, inputs.cable_lengths, dualtor);
        }
        per_asic_insert(&mut maps.test_port_ids, dev_idx, asic, test_ids);
        per_asic_insert(&mut dut_ips, dev_idx, asic, ips);
    }

    let topology = &inputs.testbed.topology;
    let src_facts = src.facts.without_backplane();
    let vlan_ips = if src_facts.vlans.is_empty() {
        BTreeMap::new()
    } else {
        assign_vlan_port_ips(&src_facts, &topology.name, topology.is_dualtor(), src)?
    };
    per_asic_insert(&mut maps.test_port_ips, sel.src_device, sel.src_asic, vlan_ips);

    let src_has_ips = per_asic_get(&dut_ips, sel.src_device, sel.src_asic).is_some_and(|m| !m.is_empty());
    if src_has_ips {
        for (dev_idx, asics) in dut_ips {
            maps.test_port_ips.insert(dev_idx, asics);
        }
    }
    Ok(())
}

fn collect_system_ports(
    inputs: &PortMapInputs<'_>,
    src: &Device,
    maps: &mut PortMaps,
) -> QosResult<()> {
    let dnx = src.is_dnx();
    for (dev_idx, asic_idx) in inputs.involved_asics() {
        let device = inputs.device(dev_idx)?;
        let asic = device.asic(asic_idx).ok_or_else(|| {
            QosError::port_selection(format!("{} has no asic{}", device.hostname, asic_idx))
        })?;
        let facts = device.facts.without_backplane();
        let prefix = format!("{}|", asic.namespace_or_asic());
        let system_port = |port: &str, port_type: &str| {
            facts
                .system_ports
                .get(&format!("{}{}", prefix, port))
                .map(|sp| SystemPort {
                    port: port.to_string(),
                    system_port: sp.system_port_id,
                    port_type: port_type.to_string(),
                })
        };

        let mut ips = BTreeMap::new();
        let mut sys_ports = BTreeMap::new();
        for (iface, addr) in inputs.active_ips(dev_idx, asic_idx)? {
            match InterfaceKind::classify(iface) {
                InterfaceKind::Ethernet => {
                    let Some(idx) = facts.ptf_index(iface) else {
                        continue;
                    };
                    let mut ip = PortIp::new(&addr.peer_ipv4);
                    ip.port = Some(iface.clone());
                    ips.insert(idx, ip);
                    if dnx {
                        if let Some(sp) = system_port(iface, iface) {
                            sys_ports.insert(idx, sp);
                        }
                    }
                }
                InterfaceKind::PortChannel => {
                    let Some(member) = facts.first_lag_member(iface) else {
                        continue;
                    };
                    let Some(idx) = facts.ptf_index(member) else {
                        continue;
                    };
                    let mut ip = PortIp::new(&addr.peer_ipv4);
                    ip.port = Some(member.to_string());
                    ips.insert(idx, ip);
                    if dnx {
                        let members = facts.portchannels.get(iface).map(|pc| pc.members.as_slice());
                        for member in members.unwrap_or_default() {
                            if let (Some(m_idx), Some(sp)) =
                                (facts.ptf_index(member), system_port(member, iface))
                            {
                                sys_ports.insert(m_idx, sp);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let test_ids: Vec<u32> = ips.keys().copied().collect();
        per_asic_insert(&mut maps.test_port_ids, dev_idx, asic_idx, test_ids);
        per_asic_insert(&mut maps.test_port_ips, dev_idx, asic_idx, ips);
        per_asic_insert(&mut maps.sys_ports, dev_idx, asic_idx, sys_ports);
    }
    Ok(())
}

/// Peer addresses of the members of the test VLAN.
///
/// The first VLAN is used. On `t0-56-po2vlan` the first VLAN may hold a
/// single LAG, in which case the next one is used, and the first LAG
/// member is dropped. Members without a ptf index are skipped.
pub fn assign_vlan_port_ips(
    facts: &MinigraphFacts,
    topology_name: &str,
    dualtor: bool,
    lower_tor: &Device,
) -> QosResult<BTreeMap<u32, PortIp>> {
    let mut vlans = facts.vlans.iter();
    let Some(mut vlan) = vlans.next() else {
        return Ok(BTreeMap::new());
    };
    let mut members = vlan.members.clone();
    if topology_name == "t0-56-po2vlan" {
        if members.len() == 1 {
            vlan = vlans
                .next()
                .ok_or_else(|| QosError::port_selection("no VLAN with physical members"))?;
            members = vlan.members.clone();
        }
        if let Some(pos) = members.iter().position(|m| m.contains("PortChannel")) {
            members.remove(pos);
        }
    }

    let vlan_ip = facts
        .vlan_interfaces
        .iter()
        .filter(|i| i.attachto.contains(&vlan.name))
        .find_map(|i| Ipv4Address::from_interface(&i.addr).ok())
        .ok_or_else(|| QosError::config_contract(&vlan.name, "Failed to obtain vlan IP"))?;
    let vlan_id = if vlan.is_tagged() {
        vlan.vlanid.map(VlanId::new).transpose()?
    } else {
        None
    };

    let mut ips = BTreeMap::new();
    for member in &members {
        let Some(idx) = facts.ptf_index(member) else {
            debug!(member = %member, vlan = %vlan.name, "VLAN member has no ptf index, skipping");
            continue;
        };
        let peer_addr = if dualtor {
            let mux = lower_tor.facts.mux_cable.get(member).ok_or_else(|| {
                QosError::config_contract(member, "no MUX cable entry on the lower ToR")
            })?;
            Ipv4Address::from_interface(&mux.server_ipv4)?.to_string()
        } else {
            vlan_ip.offset(idx + 1)?.to_string()
        };
        ips.insert(
            idx,
            PortIp {
                peer_addr,
                vlan_id,
                port: None,
            },
        );
    }
    Ok(ips)
}

/// Narrows Nvidia test ports to the largest group sharing cable length
/// and speed. Earlier groups win ties.
pub fn select_mellanox_port_group(
    facts: &MinigraphFacts,
    test_ids: &[u32],
    cable_lengths: &FieldValues,
    dualtor_ports: Option<&BTreeSet<String>>,
) -> Vec<u32> {
    let names = facts.ports_by_ptf_index();
    let mut groups: Vec<(String, Vec<u32>)> = Vec::new();
    for idx in test_ids {
        let Some(port) = names.get(idx) else {
            continue;
        };
        if dualtor_ports.is_some_and(|d| !d.is_empty() && !d.contains(port)) {
            continue;
        }
        let (Some(cable), Some(speed)) = (cable_lengths.get(port), facts.port_speed(port)) else {
            continue;
        };
        let key = format!("{}_{}", cable, speed);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, ids)) => ids.push(*idx),
            None => groups.push((key, vec![*idx])),
        }
    }

    let mut best: &[u32] = &[];
    for (_, ids) in &groups {
        if ids.len() > best.len() {
            best = ids;
        }
    }
    info!(test_port_ids = ?best, "Selected Nvidia test ports");
    best.to_vec()
}

/// Chosen source and destination ports, in the traffic runner's naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestPortBundle {
    pub dst_port_id: u32,
    pub dst_port_ip: String,
    pub dst_port_vlan: Option<VlanId>,
    pub dst_port_2_id: u32,
    pub dst_port_2_ip: String,
    pub dst_port_2_vlan: Option<VlanId>,
    pub dst_port_3_id: u32,
    pub dst_port_3_ip: String,
    pub dst_port_3_vlan: Option<VlanId>,
    pub src_port_id: u32,
    pub src_port_ip: String,
    pub src_port_vlan: Option<VlanId>,
    /// Destination ports and their LAG peers, to system port id.
    pub dst_sys_ports: BTreeMap<u32, u32>,
    pub uplink_port_ids: Vec<u32>,
    pub uplink_port_ips: Vec<String>,
    pub uplink_port_names: Vec<String>,
    pub downlink_port_ids: Vec<u32>,
    pub downlink_port_ips: Vec<String>,
    pub downlink_port_names: Vec<String>,
}

/// How a list of chosen ports is to be read.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PortPick {
    /// Positions in the test port id list.
    Positions(Vec<usize>),
    /// Test port ids.
    Ids(Vec<u32>),
}

impl PortPick {
    fn resolve(&self, test_ids: &[u32], side: &str) -> QosResult<Vec<u32>> {
        match self {
            PortPick::Ids(ids) => Ok(ids.clone()),
            PortPick::Positions(positions) => positions
                .iter()
                .map(|&pos| {
                    test_ids.get(pos).copied().ok_or_else(|| {
                        QosError::port_selection(format!(
                            "{} port position {} out of range ({} test ports)",
                            side,
                            pos,
                            test_ids.len()
                        ))
                    })
                })
                .collect(),
        }
    }
}

fn to_ids(ids: &[usize], side: &str) -> QosResult<Vec<u32>> {
    ids.iter()
        .map(|&id| {
            u32::try_from(id)
                .map_err(|_| QosError::port_selection(format!("{} port id {} too large", side, id)))
        })
        .collect()
}

fn require_subset(ids: &[u32], test_ids: &[u32], side: &str) -> QosResult<()> {
    match ids.iter().find(|id| !test_ids.contains(id)) {
        Some(bad) => Err(QosError::port_selection(format!(
            "{} port id {} passed in qos.yml is not a test port",
            side, bad
        ))),
        None => Ok(()),
    }
}

fn default_dst_positions(test_port_count: usize, src: &Device) -> Vec<usize> {
    match test_port_count {
        n if n >= 4 && src.asic_type == "cisco-8000" => vec![2, 3, 4],
        n if n >= 4 => vec![0, 2, 3],
        3 => vec![0, 2, 2],
        _ => vec![0, 0, 0],
    }
}

/// Picks source and destination ports out of `maps`.
///
/// Explicit options win over `qos.yml` ids, which win over defaults.
/// Options and defaults are positions in the test port list; `qos.yml`
/// ids are used as is. The chosen source and destination ids must not
/// overlap.
pub fn build_test_ports<R: Rng + ?Sized>(
    maps: &PortMaps,
    selection: &ResolvedTopology,
    src: &Device,
    options: &HarnessOptions,
    overrides: &PortIdOverrides,
    rng: &mut R,
) -> QosResult<TestPortBundle> {
    let port_ids = if options.dual_tor {
        &maps.dual_tor_port_indexes
    } else {
        &maps.test_port_ids
    };
    let empty = Vec::new();
    let src_test_ids = per_asic_get(port_ids, selection.src_device, selection.src_asic).unwrap_or(&empty);
    let dst_test_ids = per_asic_get(port_ids, selection.dst_device, selection.dst_asic).unwrap_or(&empty);
    if src_test_ids.is_empty() || dst_test_ids.is_empty() {
        return Err(QosError::port_selection(format!(
            "Provide at least 2 test ports (src {}, dst {})",
            src_test_ids.len(),
            dst_test_ids.len()
        )));
    }

    let mut dst_pick = match (&options.dst_ports, &overrides.dst_port_ids) {
        (Some(ports), _) => PortPick::Positions(ports.clone()),
        (None, Some(ids)) if !ids.is_empty() => {
            let ids = to_ids(ids, "dst")?;
            require_subset(&ids, dst_test_ids, "dst")?;
            PortPick::Ids(ids)
        }
        _ => PortPick::Positions(default_dst_positions(dst_test_ids.len(), src)),
    };
    let mut src_pick = match (&options.src_ports, &overrides.src_port_ids) {
        (Some(ports), _) => PortPick::Positions(ports.clone()),
        (None, Some(ids)) if !ids.is_empty() => {
            let ids = to_ids(ids, "src")?;
            require_subset(&ids, src_test_ids, "src")?;
            // randomized to cover every speed and cable length over time
            let choice = ids.choose(rng).copied().ok_or_else(|| {
                QosError::port_selection("empty src_port_ids")
            })?;
            PortPick::Ids(vec![choice])
        }
        _ => PortPick::Positions(vec![1]),
    };

    if CISCO_UPLINK_OVERRIDE_SKUS.contains(&src.hwsku.as_str()) {
        let base = per_asic_get(port_ids, 0, 0).unwrap_or(&empty);
        let position = |id: &u32| {
            base.iter().position(|x| x == id).ok_or_else(|| {
                QosError::port_selection(format!("uplink port {} is not a test port", id))
            })
        };
        let uplinks = &maps.uplinks.ids;
        if uplinks.len() < 4 {
            return Err(QosError::port_selection(format!(
                "{} needs 4 uplink ports, found {}",
                src.hwsku,
                uplinks.len()
            )));
        }
        src_pick = PortPick::Positions(vec![position(&uplinks[0])?]);
        dst_pick = PortPick::Positions(uplinks[1..4].iter().map(position).collect::<QosResult<_>>()?);
    }

    let src_ids = src_pick.resolve(src_test_ids, "src")?;
    let dst_ids = dst_pick.resolve(dst_test_ids, "dst")?;
    if src_ids.is_empty() || dst_ids.len() < 3 {
        return Err(QosError::port_selection(format!(
            "need 1 source and 3 destination ports, got {:?} and {:?}",
            src_ids, dst_ids
        )));
    }
    let overlap: BTreeSet<u32> = src_ids.iter().filter(|id| dst_ids.contains(id)).copied().collect();
    if !overlap.is_empty() {
        return Err(QosError::port_selection(format!(
            "Duplicate destination and source ports '{:?}'",
            overlap
        )));
    }
    debug!(src = ?src_ids, dst = ?dst_ids, "Chose test ports");

    let src_ips = per_asic_get(&maps.test_port_ips, selection.src_device, selection.src_asic);
    let dst_ips = per_asic_get(&maps.test_port_ips, selection.dst_device, selection.dst_asic);
    let lookup = |ips: Option<&BTreeMap<u32, PortIp>>, id: u32| -> QosResult<PortIp> {
        ips.and_then(|m| m.get(&id))
            .cloned()
            .ok_or_else(|| QosError::port_selection(format!("no peer address for test port {}", id)))
    };
    let dst = lookup(dst_ips, dst_ids[0])?;
    let dst_2 = lookup(dst_ips, dst_ids[1])?;
    let dst_3 = lookup(dst_ips, dst_ids[2])?;
    let src_ip = lookup(src_ips, src_ids[0])?;

    let mut dst_sys_ports = BTreeMap::new();
    if src.is_dnx() {
        if let Some(sys_ports) = per_asic_get(&maps.sys_ports, selection.dst_device, selection.dst_asic) {
            for id in &dst_ids[..3] {
                let Some(sp) = sys_ports.get(id) else {
                    continue;
                };
                if dst_sys_ports.contains_key(id) {
                    continue;
                }
                dst_sys_ports.insert(*id, sp.system_port);
                if sp.port_type.contains("PortChannel") {
                    for (other, peer) in sys_ports {
                        if peer.port_type == sp.port_type && other != id {
                            dst_sys_ports.insert(*other, peer.system_port);
                        }
                    }
                }
            }
        }
    }

    let bundle = TestPortBundle {
        dst_port_id: dst_ids[0],
        dst_port_ip: dst.peer_addr,
        dst_port_vlan: dst.vlan_id,
        dst_port_2_id: dst_ids[1],
        dst_port_2_ip: dst_2.peer_addr,
        dst_port_2_vlan: dst_2.vlan_id,
        dst_port_3_id: dst_ids[2],
        dst_port_3_ip: dst_3.peer_addr,
        dst_port_3_vlan: dst_3.vlan_id,
        src_port_id: src_ids[0],
        src_port_ip: src_ip.peer_addr,
        src_port_vlan: src_ip.vlan_id,
        dst_sys_ports,
        uplink_port_ids: maps.uplinks.ids.clone(),
        uplink_port_ips: maps.uplinks.ips.clone(),
        uplink_port_names: maps.uplinks.names.clone(),
        downlink_port_ids: maps.downlinks.ids.clone(),
        downlink_port_ips: maps.downlinks.ips.clone(),
        downlink_port_names: maps.downlinks.names.clone(),
    };
    info!(
        src = bundle.src_port_id,
        dst = bundle.dst_port_id,
        dst_2 = bundle.dst_port_2_id,
        dst_3 = bundle.dst_port_3_id,
        "Built test ports"
    );
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::classify_testbed_topology;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use sonic_qos_test::{testbed, DeviceBuilder, MemoryStore};
    use std::sync::Arc;

    fn single(device: usize) -> ResolvedTopology {
        ResolvedTopology {
            src_device: device,
            src_asic: 0,
            dst_device: device,
            dst_asic: 0,
            src_long_link: false,
            dst_long_link: false,
        }
    }

    fn t0_device(asic_type: &str) -> Device {
        DeviceBuilder::new("tor", asic_type)
            .port("Ethernet0", 0, 100_000)
            .port("Ethernet4", 1, 100_000)
            .port("Ethernet8", 2, 100_000)
            .port("Ethernet12", 3, 100_000)
            .port("Ethernet16", 4, 100_000)
            .port("Ethernet-BP0", 5, 100_000)
            .portchannel("PortChannel1", &["Ethernet8"])
            .vlan("Vlan1000", 1000, &["Ethernet0", "Ethernet4", "PortChannel1"], false)
            .vlan_interface("Vlan1000", "192.168.0.1/21")
            .build()
    }

    fn run_collect(
        tb: &Testbed,
        selection: &ResolvedTopology,
        dualtor: &BTreeSet<String>,
        cable_lengths: &FieldValues,
        active: &PerAsic<BTreeMap<String, ActiveIpInterface>>,
    ) -> QosResult<PortMaps> {
        collect_port_maps(&PortMapInputs {
            testbed: tb,
            selection,
            class: classify_testbed_topology(&tb.topology.name),
            dualtor_ports: dualtor,
            separated_dscp_tc_map: false,
            cable_lengths,
            active_ip_interfaces: active,
        })
    }

    fn active(entries: &[(u32, &str, &str)]) -> PerAsic<BTreeMap<String, ActiveIpInterface>> {
        let mut map = PerAsic::new();
        for (asic, iface, peer) in entries {
            map.entry(0)
                .or_insert_with(BTreeMap::new)
                .entry(*asic)
                .or_insert_with(BTreeMap::new)
                .insert(
                    iface.to_string(),
                    ActiveIpInterface {
                        addr: "10.0.0.0".to_string(),
                        peer_ipv4: peer.to_string(),
                    },
                );
        }
        map
    }

    #[tokio::test]
    async fn test_separated_dscp_map_detection() {
        let store = Arc::new(MemoryStore::new("dut"));
        let client = ConfigDbClient::new(store.clone());
        assert!(!uses_separated_dscp_tc_map(&client).await.unwrap());

        store.set_hash(DbId::ConfigDb, "DSCP_TO_TC_MAP|AZURE_UPLINK", [("8", "0")]);
        assert!(uses_separated_dscp_tc_map(&client).await.unwrap());
    }

    #[test]
    fn test_vlan_members_skip_lag_and_offset_from_vlan_ip() {
        let tb = testbed("t0", "t0", vec![t0_device("broadcom")]);
        let maps = run_collect(&tb, &single(0), &BTreeSet::new(), &FieldValues::new(), &PerAsic::new())
            .unwrap();

        assert_eq!(maps.test_port_ids[&0][&0], vec![0, 1, 3, 4]);
        let ips = &maps.test_port_ips[&0][&0];
        assert_eq!(ips.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(ips[&0].peer_addr, "192.168.0.2");
        assert_eq!(ips[&1].peer_addr, "192.168.0.3");
        assert_eq!(ips[&0].vlan_id, None);
        assert!(!maps.dut_interfaces.values().any(|p| p.starts_with("Ethernet-BP")));
    }

    #[test]
    fn test_po2vlan_uses_next_vlan_and_drops_lag() {
        let dut = DeviceBuilder::new("tor", "broadcom")
            .port("Ethernet0", 0, 100_000)
            .port("Ethernet4", 1, 100_000)
            .vlan("Vlan1000", 1000, &["PortChannel1"], false)
            .vlan("Vlan2000", 2000, &["PortChannel2", "Ethernet0", "Ethernet4"], true)
            .vlan_interface("Vlan2000", "fc02:1000::1/64")
            .vlan_interface("Vlan2000", "192.168.128.1/21")
            .build();
        let ips = assign_vlan_port_ips(&dut.facts, "t0-56-po2vlan", false, &dut).unwrap();
        assert_eq!(ips.len(), 2);
        assert_eq!(ips[&1].peer_addr, "192.168.128.3");
        assert_eq!(ips[&1].vlan_id, Some(VlanId::new(2000).unwrap()));
    }

    #[test]
    fn test_dualtor_peer_from_mux_cable() {
        let upper = t0_device("mellanox");
        let lower = DeviceBuilder::new("lower", "mellanox")
            .mux_cable("Ethernet0", "192.168.0.100/32")
            .mux_cable("Ethernet4", "192.168.0.101/32")
            .build();
        let ips = assign_vlan_port_ips(&upper.facts, "dualtor-56", true, &lower).unwrap();
        assert_eq!(ips[&0].peer_addr, "192.168.0.100");
        assert_eq!(ips[&1].peer_addr, "192.168.0.101");
    }

    #[test]
    fn test_missing_vlan_ip_is_contract_violation() {
        let dut = DeviceBuilder::new("tor", "broadcom")
            .port("Ethernet0", 0, 100_000)
            .vlan("Vlan1000", 1000, &["Ethernet0"], false)
            .build();
        let err = assign_vlan_port_ips(&dut.facts, "t0", false, &dut).unwrap_err();
        assert!(matches!(err, QosError::ConfigContract { .. }));
    }

    #[test]
    fn test_t0_multi_asic_is_unsupported() {
        let dut = DeviceBuilder::new("tor", "broadcom").asics(2).build();
        let tb = testbed("t0", "t0", vec![dut]);
        let err = run_collect(&tb, &single(0), &BTreeSet::new(), &FieldValues::new(), &PerAsic::new())
            .unwrap_err();
        assert!(err.is_skip());
    }

    #[test]
    fn test_mellanox_groups_by_cable_and_speed() {
        let dut = DeviceBuilder::new("tor", "mellanox")
            .port("Ethernet0", 0, 100_000)
            .port("Ethernet4", 1, 100_000)
            .port("Ethernet8", 2, 400_000)
            .port("Ethernet12", 3, 100_000)
            .port("Ethernet16", 4, 100_000)
            .build();
        let cable: FieldValues = [
            ("Ethernet0", "5m"),
            ("Ethernet4", "40m"),
            ("Ethernet8", "5m"),
            ("Ethernet12", "5m"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let ids = select_mellanox_port_group(&dut.facts, &[0, 1, 2, 3], &cable, None);
        assert_eq!(ids, vec![0, 3]);

        let only: BTreeSet<String> = ["Ethernet4".to_string()].into();
        assert_eq!(select_mellanox_port_group(&dut.facts, &[0, 1, 2, 3], &cable, Some(&only)), vec![1]);
    }

    #[test]
    fn test_routed_lag_indexed_by_first_member() {
        let dut = DeviceBuilder::new("leaf", "broadcom")
            .port("Ethernet0", 0, 100_000)
            .port("Ethernet4", 1, 100_000)
            .port("Ethernet8", 2, 100_000)
            .port("Ethernet12", 3, 100_000)
            .portchannel("PortChannel101", &["Ethernet8", "Ethernet12"])
            .neighbor("Ethernet0", "ARISTA01T2")
            .neighbor("Ethernet4", "ARISTA01T0")
            .build();
        let tb = testbed("t1-lag", "t1", vec![dut]);
        let active = active(&[
            (0, "Ethernet0", "10.0.0.1"),
            (0, "Ethernet4.10", "10.0.0.3"),
            (0, "PortChannel101", "10.0.0.5"),
            (0, "Loopback0", ""),
        ]);
        let maps = run_collect(&tb, &single(0), &BTreeSet::new(), &FieldValues::new(), &active).unwrap();
        assert_eq!(maps.test_port_ids[&0][&0], vec![0, 1, 2]);
        let ips = &maps.test_port_ips[&0][&0];
        assert_eq!(ips[&2].peer_addr, "10.0.0.5");
        assert_eq!(ips[&1].vlan_id, Some(VlanId::new(10).unwrap()));
        // no split without separated DSCP maps
        assert!(maps.uplinks.ids.is_empty());
    }

    #[test]
    fn test_system_ports_fan_out_lag_members() {
        let dut = DeviceBuilder::new("lc1", "broadcom")
            .dnx()
            .voq()
            .asics(2)
            .port("Ethernet0", 0, 400_000)
            .port("Ethernet8", 1, 400_000)
            .port("Ethernet16", 2, 400_000)
            .port("Ethernet24", 3, 400_000)
            .portchannel("PortChannel102", &["Ethernet16", "Ethernet24"])
            .system_port("asic0|Ethernet0", 10)
            .system_port("asic0|Ethernet8", 11)
            .system_port("asic0|Ethernet16", 12)
            .system_port("asic0|Ethernet24", 13)
            .build();
        let tb = testbed("t2", "t2", vec![dut.clone()]);
        let active = active(&[
            (0, "Ethernet0", "10.0.0.1"),
            (0, "Ethernet8", "10.0.0.3"),
            (0, "Ethernet-Rec0", "10.0.0.7"),
            (0, "PortChannel102", "10.0.0.5"),
        ]);
        let maps = run_collect(&tb, &single(0), &BTreeSet::new(), &FieldValues::new(), &active).unwrap();
        assert_eq!(maps.test_port_ids[&0][&0], vec![0, 1, 2]);
        assert_eq!(maps.dut_interfaces.get(&2).map(String::as_str), Some("Ethernet16"));
        let sys = &maps.sys_ports[&0][&0];
        assert_eq!(sys[&3].port_type, "PortChannel102");

        let options = HarnessOptions {
            src_ports: Some(vec![1]),
            dst_ports: Some(vec![2, 0, 0]),
            ..Default::default()
        };
        let bundle = build_test_ports(
            &maps,
            &single(0),
            &dut,
            &options,
            &PortIdOverrides::default(),
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();
        assert_eq!(bundle.dst_port_id, 2);
        let expected: BTreeMap<u32, u32> = [(0, 10), (2, 12), (3, 13)].into();
        assert_eq!(bundle.dst_sys_ports, expected);
    }

    fn simple_maps(ids: &[u32]) -> PortMaps {
        let mut maps = PortMaps::default();
        let ips = ids
            .iter()
            .map(|id| (*id, PortIp::new(format!("10.0.0.{}", id * 2 + 1))))
            .collect();
        per_asic_insert(&mut maps.test_port_ids, 0, 0, ids.to_vec());
        per_asic_insert(&mut maps.test_port_ips, 0, 0, ips);
        maps
    }

    fn build(maps: &PortMaps, options: &HarnessOptions, overrides: &PortIdOverrides) -> QosResult<TestPortBundle> {
        let dut = DeviceBuilder::new("dut", "broadcom").build();
        build_test_ports(maps, &single(0), &dut, options, overrides, &mut StdRng::seed_from_u64(7))
    }

    #[test]
    fn test_default_port_positions() {
        let bundle = build(&simple_maps(&[4, 8, 12, 16, 20]), &HarnessOptions::default(), &Default::default()).unwrap();
        assert_eq!(
            (bundle.src_port_id, bundle.dst_port_id, bundle.dst_port_2_id, bundle.dst_port_3_id),
            (8, 4, 12, 16)
        );
        assert_eq!(bundle.src_port_ip, "10.0.0.17");

        let bundle = build(&simple_maps(&[4, 8, 12]), &HarnessOptions::default(), &Default::default()).unwrap();
        assert_eq!((bundle.dst_port_id, bundle.dst_port_2_id, bundle.dst_port_3_id), (4, 12, 12));

        let bundle = build(&simple_maps(&[4, 8]), &HarnessOptions::default(), &Default::default()).unwrap();
        assert_eq!((bundle.src_port_id, bundle.dst_port_id), (8, 4));
    }

    #[test]
    fn test_single_port_cannot_provide_source() {
        let err = build(&simple_maps(&[4]), &HarnessOptions::default(), &Default::default()).unwrap_err();
        assert!(matches!(err, QosError::PortSelection(_)));
    }

    #[test]
    fn test_overlapping_ports_rejected() {
        let options = HarnessOptions {
            src_ports: Some(vec![0]),
            dst_ports: Some(vec![0, 2, 3]),
            ..Default::default()
        };
        let err = build(&simple_maps(&[4, 8, 12, 16]), &options, &Default::default()).unwrap_err();
        assert!(matches!(err, QosError::PortSelection(_)));
    }

    #[test]
    fn test_qos_yml_ids_are_raw_and_validated() {
        let overrides = PortIdOverrides {
            src_port_ids: Some(vec![16]),
            dst_port_ids: Some(vec![4, 8, 12]),
        };
        let bundle = build(&simple_maps(&[4, 8, 12, 16]), &HarnessOptions::default(), &overrides).unwrap();
        assert_eq!((bundle.src_port_id, bundle.dst_port_id, bundle.dst_port_3_id), (16, 4, 12));

        let bad = PortIdOverrides {
            src_port_ids: None,
            dst_port_ids: Some(vec![4, 99, 12]),
        };
        let err = build(&simple_maps(&[4, 8, 12, 16]), &HarnessOptions::default(), &bad).unwrap_err();
        assert!(matches!(err, QosError::PortSelection(_)));
    }

    #[test]
    fn test_dual_tor_option_requires_indexes() {
        let options = HarnessOptions {
            dual_tor: true,
            ..Default::default()
        };
        let err = build(&simple_maps(&[4, 8, 12, 16]), &options, &Default::default()).unwrap_err();
        assert!(matches!(err, QosError::PortSelection(_)));
    }

    #[test]
    fn test_cisco_uplink_override() {
        let mut maps = simple_maps(&[0, 1, 2, 3, 4, 5]);
        for (id, name) in [(5, "Ethernet40"), (3, "Ethernet24"), (4, "Ethernet32"), (2, "Ethernet16")] {
            maps.uplinks.push(id, "10.0.0.1", name);
        }
        let dut = DeviceBuilder::new("dut", "cisco-8000").hwsku("Cisco-8101-O8C48").build();
        let bundle = build_test_ports(
            &maps,
            &single(0),
            &dut,
            &HarnessOptions::default(),
            &PortIdOverrides::default(),
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap();
        assert_eq!(bundle.src_port_id, 5);
        assert_eq!((bundle.dst_port_id, bundle.dst_port_2_id, bundle.dst_port_3_id), (3, 4, 2));
        assert_eq!(bundle.uplink_port_names[0], "Ethernet40");
    }
}
