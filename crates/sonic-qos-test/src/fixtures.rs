//! Test fixtures for buffer tables and testbeds
//!
//! Provides reusable builders so tests describe a scenario in a few lines
//! instead of spelling out raw store keys.

use sonic_qos_common::DbId;
use sonic_qos_types::{
    ActiveIpInterface, AsicInstance, Device, IpInterfaceFacts, MuxCableFacts, NeighborFacts,
    PortChannelFacts, PortFacts, SwitchType, SystemPortFacts, Testbed, TopologyInfo, VlanFacts,
};

use crate::MemoryStore;

/// Where buffer tables live on the fixture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferModel {
    /// `buffer_model` set; tables read from APPL_DB (`TABLE:key`).
    Applied,
    /// No `buffer_model`; tables read from CONFIG_DB (`TABLE|key`).
    Config,
}

type Hash = (DbId, String, Vec<(String, String)>);

/// Builder for a device's buffer pool/profile/PG/queue tables.
pub struct BufferTables {
    model: BufferModel,
    hashes: Vec<Hash>,
}

impl BufferTables {
    /// Traditional buffer model, applied tables in APPL_DB.
    pub fn applied() -> Self {
        Self {
            model: BufferModel::Applied,
            hashes: vec![(
                DbId::ConfigDb,
                "DEVICE_METADATA|localhost".to_string(),
                vec![("buffer_model".to_string(), "traditional".to_string())],
            )],
        }
    }

    /// Legacy images: everything lives in CONFIG_DB.
    pub fn config() -> Self {
        Self {
            model: BufferModel::Config,
            hashes: Vec::new(),
        }
    }

    fn db(&self) -> DbId {
        match self.model {
            BufferModel::Applied => DbId::ApplDb,
            BufferModel::Config => DbId::ConfigDb,
        }
    }

    fn table(&self, config_name: &str) -> String {
        match self.model {
            BufferModel::Applied => format!("{}_TABLE", config_name),
            BufferModel::Config => config_name.to_string(),
        }
    }

    fn push<I, K, V>(mut self, db: DbId, key: String, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.hashes.push((db, key, fields));
        self
    }

    /// Pool with a `size` field.
    pub fn pool(self, name: &str, size: u64) -> Self {
        self.pool_with(name, [("size", size.to_string())])
    }

    pub fn pool_with<I, K, V>(self, name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let db = self.db();
        let key = db.key(&self.table("BUFFER_POOL"), &[name]);
        self.push(db, key, fields)
    }

    pub fn profile<I, K, V>(self, name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let db = self.db();
        let key = db.key(&self.table("BUFFER_PROFILE"), &[name]);
        self.push(db, key, fields)
    }

    /// Binds `profile` to `port`/`pgs`.
    ///
    /// With the applied model the binding is mirrored into CONFIG_DB, the
    /// way buffermgrd leaves it in the traditional model.
    pub fn pg(self, port: &str, pgs: &str, profile: &str) -> Self {
        let db = self.db();
        let key = db.key(&self.table("BUFFER_PG"), &[port, pgs]);
        let this = self.push(db, key, [("profile", profile)]);
        if this.model == BufferModel::Applied {
            let cfg_key = DbId::ConfigDb.key("BUFFER_PG", &[port, pgs]);
            this.push(DbId::ConfigDb, cfg_key, [("profile", profile)])
        } else {
            this
        }
    }

    pub fn queue(self, port: &str, queues: &str, profile: &str) -> Self {
        let db = self.db();
        let key = db.key(&self.table("BUFFER_QUEUE"), &[port, queues]);
        self.push(db, key, [("profile", profile)])
    }

    /// Arbitrary hash, for tables the builder has no helper for.
    pub fn raw<I, K, V>(self, db: DbId, key: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.push(db, key.to_string(), fields)
    }

    pub fn install(&self, store: &MemoryStore) {
        for (db, key, fields) in &self.hashes {
            store.set_hash(*db, key, fields.iter().cloned());
        }
    }

    pub fn into_store(self, label: &str) -> MemoryStore {
        let store = MemoryStore::new(label);
        self.install(&store);
        store
    }
}

/// Field set of a lossless PG profile.
pub fn lossless_profile_fields(
    size: u64,
    xon: u64,
    xoff: u64,
    dynamic_th: &str,
) -> Vec<(String, String)> {
    vec![
        ("pool".to_string(), "ingress_lossless_pool".to_string()),
        ("size".to_string(), size.to_string()),
        ("xon".to_string(), xon.to_string()),
        ("xoff".to_string(), xoff.to_string()),
        ("dynamic_th".to_string(), dynamic_th.to_string()),
    ]
}

/// Field set of a dynamic-threshold profile without headroom.
pub fn dynamic_profile_fields(pool: &str, size: u64, dynamic_th: &str) -> Vec<(String, String)> {
    vec![
        ("pool".to_string(), pool.to_string()),
        ("size".to_string(), size.to_string()),
        ("dynamic_th".to_string(), dynamic_th.to_string()),
    ]
}

/// Builder for [`Device`] facts.
pub struct DeviceBuilder {
    device: Device,
}

impl DeviceBuilder {
    pub fn new(hostname: &str, asic_type: &str) -> Self {
        Self {
            device: Device {
                hostname: hostname.to_string(),
                asic_type: asic_type.to_string(),
                platform: String::new(),
                hwsku: String::new(),
                switch_type: SwitchType::Npu,
                platform_asic: None,
                os_version: "20230531.01".to_string(),
                asics: vec![AsicInstance::new(0, None)],
                facts: Default::default(),
            },
        }
    }

    pub fn hwsku(mut self, hwsku: &str) -> Self {
        self.device.hwsku = hwsku.to_string();
        self
    }

    pub fn platform(mut self, platform: &str) -> Self {
        self.device.platform = platform.to_string();
        self
    }

    pub fn os_version(mut self, version: &str) -> Self {
        self.device.os_version = version.to_string();
        self
    }

    pub fn voq(mut self) -> Self {
        self.device.switch_type = SwitchType::Voq;
        self
    }

    pub fn dnx(mut self) -> Self {
        self.device.platform_asic = Some("broadcom-dnx".to_string());
        self
    }

    /// Replaces the ASIC list with `count` namespaced ASICs.
    pub fn asics(mut self, count: u32) -> Self {
        self.device.asics = (0..count)
            .map(|i| AsicInstance::new(i, Some(format!("asic{}", i))))
            .collect();
        self
    }

    pub fn port(mut self, name: &str, ptf_index: u32, speed: u64) -> Self {
        let facts = &mut self.device.facts;
        facts.ptf_indices.insert(name.to_string(), ptf_index);
        facts
            .ports
            .insert(name.to_string(), PortFacts { speed: Some(speed) });
        self
    }

    pub fn portchannel(mut self, name: &str, members: &[&str]) -> Self {
        self.device.facts.portchannels.insert(
            name.to_string(),
            PortChannelFacts {
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
        self
    }

    pub fn vlan(mut self, name: &str, vlanid: u16, members: &[&str], tagged: bool) -> Self {
        self.device.facts.vlans.push(VlanFacts {
            name: name.to_string(),
            vlanid: Some(vlanid),
            members: members.iter().map(|m| m.to_string()).collect(),
            vlan_type: Some(if tagged { "Tagged" } else { "Untagged" }.to_string()),
        });
        self
    }

    pub fn vlan_interface(mut self, attachto: &str, addr: &str) -> Self {
        self.device.facts.vlan_interfaces.push(IpInterfaceFacts {
            attachto: attachto.to_string(),
            addr: addr.to_string(),
            peer_addr: String::new(),
            vlan: None,
        });
        self
    }

    pub fn interface(mut self, attachto: &str, addr: &str, peer_addr: &str) -> Self {
        self.device.facts.interfaces.push(IpInterfaceFacts {
            attachto: attachto.to_string(),
            addr: addr.to_string(),
            peer_addr: peer_addr.to_string(),
            vlan: None,
        });
        self
    }

    pub fn sub_interface(mut self, attachto: &str, peer_addr: &str, vlan: &str) -> Self {
        self.device.facts.vlan_sub_interfaces.push(IpInterfaceFacts {
            attachto: attachto.to_string(),
            addr: String::new(),
            peer_addr: peer_addr.to_string(),
            vlan: Some(vlan.to_string()),
        });
        self
    }

    pub fn neighbor(mut self, port: &str, name: &str) -> Self {
        self.device.facts.neighbors.insert(
            port.to_string(),
            NeighborFacts {
                name: name.to_string(),
            },
        );
        self
    }

    pub fn mux_cable(mut self, port: &str, server_ipv4: &str) -> Self {
        self.device.facts.mux_cable.insert(
            port.to_string(),
            MuxCableFacts {
                server_ipv4: server_ipv4.to_string(),
            },
        );
        self
    }

    pub fn active_ip(mut self, asic: u32, iface: &str, addr: &str, peer_ipv4: &str) -> Self {
        self.device
            .facts
            .active_ip_interfaces
            .entry(asic)
            .or_default()
            .insert(
                iface.to_string(),
                ActiveIpInterface {
                    addr: addr.to_string(),
                    peer_ipv4: peer_ipv4.to_string(),
                },
            );
        self
    }

    pub fn system_port(mut self, key: &str, system_port_id: u32) -> Self {
        self.device
            .facts
            .system_ports
            .insert(key.to_string(), SystemPortFacts { system_port_id });
        self
    }

    pub fn build(self) -> Device {
        self.device
    }
}

/// Testbed over `devices` with the given topology.
pub fn testbed(name: &str, topo_type: &str, devices: Vec<Device>) -> Testbed {
    Testbed {
        topology: TopologyInfo {
            name: name.to_string(),
            topo_type: topo_type.to_string(),
        },
        devices,
        lower_tor_index: None,
        hwsku_inventory: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_applied_tables_keys() {
        let store = BufferTables::applied()
            .pool("ingress_lossless_pool", 1_000_000)
            .profile("pg_lossless_100000_5m_profile", lossless_profile_fields(0, 18432, 50000, "0"))
            .pg("Ethernet0", "3-4", "pg_lossless_100000_5m_profile")
            .into_store("dut");

        assert_eq!(
            store.peek(DbId::ApplDb, "BUFFER_POOL_TABLE:ingress_lossless_pool", "size"),
            Some("1000000".to_string())
        );
        assert_eq!(
            store.peek(DbId::ApplDb, "BUFFER_PG_TABLE:Ethernet0:3-4", "profile"),
            Some("pg_lossless_100000_5m_profile".to_string())
        );
        assert_eq!(
            store.peek(DbId::ConfigDb, "BUFFER_PG|Ethernet0|3-4", "profile"),
            Some("pg_lossless_100000_5m_profile".to_string())
        );
        assert_eq!(
            store.peek(DbId::ConfigDb, "DEVICE_METADATA|localhost", "buffer_model"),
            Some("traditional".to_string())
        );
    }

    #[test]
    fn test_config_tables_keys() {
        let store = BufferTables::config()
            .queue("Ethernet0", "0-2", "egress_lossy_profile")
            .into_store("dut");
        assert_eq!(
            store.peek(DbId::ConfigDb, "BUFFER_QUEUE|Ethernet0|0-2", "profile"),
            Some("egress_lossy_profile".to_string())
        );
    }

    #[test]
    fn test_device_builder() {
        let device = DeviceBuilder::new("dut", "broadcom")
            .asics(2)
            .port("Ethernet0", 0, 100000)
            .portchannel("PortChannel1", &["Ethernet0"])
            .active_ip(1, "PortChannel1", "10.0.0.0", "10.0.0.1")
            .build();
        assert!(device.is_multi_asic());
        assert_eq!(device.asics[1].namespace.as_deref(), Some("asic1"));
        assert_eq!(device.facts.first_lag_member("PortChannel1"), Some("Ethernet0"));
        assert_eq!(device.facts.active_ip_interfaces[&1]["PortChannel1"].peer_ipv4, "10.0.0.1");
    }
}
