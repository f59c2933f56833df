//! Testbed inventory for one test session.

use crate::device::Device;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Topology of the testbed (`tbinfo["topo"]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyInfo {
    /// Topology name (`t0`, `t1-lag`, `t2`, `dualtor-56`, ...).
    pub name: String,
    /// Topology type (`t0`, `t1`, `t2`, `ptf`).
    #[serde(rename = "type", default)]
    pub topo_type: String,
}

impl TopologyInfo {
    pub fn is_dualtor(&self) -> bool {
        self.name.contains("dualtor")
    }

    pub fn is_backend(&self) -> bool {
        self.name.contains("backend")
    }
}

/// Everything the harness knows about the testbed before touching a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Testbed {
    pub topology: TopologyInfo,
    /// Frontend devices, in inventory order.
    pub devices: Vec<Device>,
    /// Index into `devices` of the lower ToR on dual-ToR testbeds.
    #[serde(default)]
    pub lower_tor_index: Option<usize>,
    /// Inventory host variables of the form `{vendor}_{asic}_hwskus`.
    #[serde(default)]
    pub hwsku_inventory: BTreeMap<String, Vec<String>>,
}

impl Testbed {
    pub fn device(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }
}
