//! QoS parameter table selection.
//!
//! Baseline parameters come from `qos.yml`, keyed by ASIC family and
//! topology tag. How the table is picked and what it is combined with
//! depends on the vendor; each vendor maps to one [`ParamStrategy`],
//! chosen once per source device.

use crate::client::ConfigDbClient;
use crate::config::QosParamFile;
use crate::dualtor::is_tunnel_qos_remap_enabled;
use crate::error::{QosError, QosResult};
use crate::scheduler::WrrWeights;
use crate::tables;
use serde::Serialize;
use serde_yaml::Value;
use sonic_qos_common::{DbId, FieldValues};
use sonic_qos_types::{Device, Testbed, Vendor};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// ASIC families in lookup order.
pub const SUPPORTED_ASIC_FAMILIES: &[&str] = &[
    "pac", "gr", "gr2", "gb", "td2", "th", "th2", "spc1", "spc2", "spc3", "spc4", "spc5", "td3",
    "th3", "j2c+", "jr2", "th5",
];

/// Generic topology entry of a parameter table.
pub const TOPO_ANY: &str = "topo-any";

/// Parameter section shared by all Nvidia ASIC families.
const MELLANOX_SECTION: &str = "mellanox";

/// Identifies the ASIC family of `device` from the inventory hwsku lists.
pub fn identify_asic_family(testbed: &Testbed, device: &Device) -> QosResult<String> {
    SUPPORTED_ASIC_FAMILIES
        .iter()
        .find(|asic| {
            let var = format!("{}_{}_hwskus", device.asic_type, asic);
            testbed
                .hwsku_inventory
                .get(&var)
                .is_some_and(|skus| skus.contains(&device.hwsku))
        })
        .map(|asic| asic.to_string())
        .ok_or_else(|| {
            QosError::params(format!(
                "Cannot identify ASIC type of {} (hwsku {})",
                device.hostname, device.hwsku
            ))
        })
}

/// Picks the `topo-*` entry of the parameter table.
///
/// `same_asic` is true when source and destination are the same ASIC.
pub fn select_topology_tag(
    params: &QosParamFile,
    asic_family: &str,
    topology_name: &str,
    same_asic: bool,
) -> String {
    let exact = format!("topo-{}", topology_name);
    if asic_family == "gb" && topology_name.contains("t2") {
        return if same_asic { TOPO_ANY.to_string() } else { exact };
    }
    let present = params
        .section(asic_family)
        .and_then(|s| s.get(exact.as_str()))
        .is_some();
    if present {
        exact
    } else {
        TOPO_ANY.to_string()
    }
}

/// Source/destination port ids pinned by the parameter table.
///
/// Some ASICs spread ports across buffer pipes and need the test to stay
/// on specific ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortIdOverrides {
    pub src_port_ids: Option<Vec<usize>>,
    pub dst_port_ids: Option<Vec<usize>>,
}

pub fn port_id_overrides(
    params: &QosParamFile,
    asic_family: &str,
    topo_tag: &str,
) -> QosResult<PortIdOverrides> {
    let Some(entry) = params.section(asic_family).and_then(|s| s.get(topo_tag)) else {
        return Ok(PortIdOverrides::default());
    };
    let ids = |field: &str| -> QosResult<Option<Vec<usize>>> {
        entry
            .get(field)
            .map(|v| {
                serde_yaml::from_value::<Vec<usize>>(v.clone()).map_err(|e| {
                    QosError::params(format!("{}.{}.{}: {}", asic_family, topo_tag, field, e))
                })
            })
            .transpose()
    };
    Ok(PortIdOverrides {
        src_port_ids: ids("src_port_ids")?,
        dst_port_ids: ids("dst_port_ids")?,
    })
}

/// Buffer tables of one ASIC, keyed by CONFIG_DB table name then object name.
pub type BufferConfig = BTreeMap<String, BTreeMap<String, FieldValues>>;

/// Reads pools, profiles, queue and PG bindings from the active buffer model.
///
/// Tables with no entries are left out.
pub async fn fetch_buffer_config(client: &ConfigDbClient) -> QosResult<BufferConfig> {
    let scheme = client.buffer_scheme().await?;
    let sep = scheme.db.separator();
    let sources = [
        (tables::CFG_BUFFER_POOL_TABLE, scheme.pool_table),
        (tables::CFG_BUFFER_PROFILE_TABLE, scheme.profile_table),
        (tables::CFG_BUFFER_QUEUE_TABLE, scheme.queue_table),
        (tables::CFG_BUFFER_PG_TABLE, scheme.pg_table),
    ];

    let mut config = BufferConfig::new();
    for (name, table) in sources {
        let prefix = format!("{}{}", table, sep);
        let mut entries = BTreeMap::new();
        for key in client.keys(scheme.db, &format!("{}*", prefix)).await? {
            let Some(object) = key.strip_prefix(&prefix) else {
                continue;
            };
            entries.insert(object.to_string(), client.hgetall(scheme.db, &key).await?);
        }
        if !entries.is_empty() {
            config.insert(name.to_string(), entries);
        }
    }
    debug!(asic = %client.label(), tables = config.len(), "Fetched buffer config");
    Ok(config)
}

fn require_complete(config: &BufferConfig) -> QosResult<()> {
    for table in [
        tables::CFG_BUFFER_POOL_TABLE,
        tables::CFG_BUFFER_PROFILE_TABLE,
        tables::CFG_BUFFER_QUEUE_TABLE,
        tables::CFG_BUFFER_PG_TABLE,
    ] {
        if !config.contains_key(table) {
            return Err(QosError::config_contract(
                table,
                "buffer config is incomplete",
            ));
        }
    }
    Ok(())
}

/// How baseline parameters are obtained for a vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamStrategy {
    /// Nvidia: one shared `mellanox` section, dual-ToR aware.
    Mellanox,
    /// The `qos.yml` entry as is.
    StaticTable,
    /// The `qos.yml` entry together with a snapshot of the live buffer
    /// tables, which must be complete.
    BufferConfigDriven { vendor_defaults: bool },
}

impl ParamStrategy {
    pub fn for_device(device: &Device, asic_family: &str) -> Self {
        match device.vendor() {
            Vendor::Mellanox => ParamStrategy::Mellanox,
            Vendor::Broadcom if device.is_dnx() || asic_family == "th5" => {
                ParamStrategy::StaticTable
            }
            Vendor::Broadcom => ParamStrategy::BufferConfigDriven {
                vendor_defaults: false,
            },
            Vendor::Cisco8000 => ParamStrategy::BufferConfigDriven {
                vendor_defaults: true,
            },
            _ => ParamStrategy::StaticTable,
        }
    }
}

/// Everything a strategy needs besides the store.
#[derive(Debug, Clone)]
pub struct ParamInputs<'a> {
    pub params: &'a QosParamFile,
    pub asic_family: &'a str,
    pub topo_tag: &'a str,
    pub topology_name: &'a str,
    /// `<speed>_<cable>m` of the source port.
    pub speed_cable: &'a str,
    /// Source and destination are the same ASIC of the same device.
    pub same_asic: bool,
    pub dual_tor: bool,
}

/// Baseline parameters for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QosParamSet {
    pub strategy: ParamStrategy,
    #[serde(rename = "dutTopo")]
    pub topo_tag: String,
    pub param: Value,
    #[serde(rename = "portSpeedCableLength")]
    pub speed_cable: String,
    #[serde(rename = "dualTor")]
    pub dual_tor: bool,
    #[serde(rename = "bufferConfig", skip_serializing_if = "Option::is_none")]
    pub buffer_config: Option<BufferConfig>,
}

impl QosParamSet {
    /// Test weights of a WRR scenario; the per-speed section wins.
    pub fn wrr_weights(&self) -> QosResult<WrrWeights> {
        let wrr = self
            .param
            .get(self.speed_cable.as_str())
            .and_then(|s| s.get("wrr_chg"))
            .or_else(|| self.param.get("wrr_chg"))
            .ok_or_else(|| QosError::params(format!("no wrr_chg for {}", self.speed_cable)))?;
        let weight = |field: &str| -> QosResult<u32> {
            wrr.get(field)
                .and_then(Value::as_u64)
                .and_then(|w| u32::try_from(w).ok())
                .ok_or_else(|| QosError::params(format!("wrr_chg.{} is not a weight", field)))
        };
        Ok(WrrWeights {
            lossless: weight("lossless_weight")?,
            lossy: weight("lossy_weight")?,
        })
    }
}

impl ParamStrategy {
    /// Produces the parameter set for the source ASIC behind `client`.
    pub async fn compute(
        &self,
        inputs: &ParamInputs<'_>,
        client: &ConfigDbClient,
    ) -> QosResult<QosParamSet> {
        let mut topo_tag = inputs.topo_tag.to_string();
        let mut dual_tor = inputs.dual_tor;
        let mut buffer_config = None;

        let param = match self {
            ParamStrategy::Mellanox => {
                if inputs.topology_name.contains("t1") && is_tunnel_qos_remap_enabled(client).await? {
                    dual_tor = true;
                }
                let section = inputs
                    .params
                    .section(MELLANOX_SECTION)
                    .ok_or_else(|| QosError::params("no mellanox parameter section"))?;
                if section.get(topo_tag.as_str()).is_none() {
                    topo_tag = TOPO_ANY.to_string();
                }
                section
                    .get(topo_tag.as_str())
                    .cloned()
                    .ok_or_else(|| QosError::params(format!("mellanox.{} missing", topo_tag)))?
            }
            ParamStrategy::StaticTable => static_entry(inputs.params, inputs.asic_family, &topo_tag)?,
            ParamStrategy::BufferConfigDriven { vendor_defaults } => {
                let config = fetch_buffer_config(client).await?;
                require_complete(&config)?;
                buffer_config = Some(config);
                if *vendor_defaults {
                    if inputs.same_asic {
                        topo_tag = TOPO_ANY.to_string();
                    }
                    inputs
                        .params
                        .section(inputs.asic_family)
                        .and_then(|s| s.get(topo_tag.as_str()))
                        .cloned()
                        .unwrap_or_else(|| Value::Mapping(Default::default()))
                } else {
                    static_entry(inputs.params, inputs.asic_family, &topo_tag)?
                }
            }
        };

        info!(
            strategy = ?self,
            asic = %inputs.asic_family,
            topo = %topo_tag,
            speed_cable = %inputs.speed_cable,
            dual_tor,
            "Selected QoS parameters"
        );
        Ok(QosParamSet {
            strategy: *self,
            topo_tag,
            param,
            speed_cable: inputs.speed_cable.to_string(),
            dual_tor,
            buffer_config,
        })
    }
}

fn static_entry(params: &QosParamFile, asic_family: &str, topo_tag: &str) -> QosResult<Value> {
    params
        .section(asic_family)
        .and_then(|s| s.get(topo_tag))
        .cloned()
        .ok_or_else(|| QosError::params(format!("qos_params.{}.{} missing", asic_family, topo_tag)))
}
