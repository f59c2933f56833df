//! Scenario resolution.
//!
//! [`QosResolver`] owns the testbed, the parameter file and a handle to
//! every ASIC's store. [`QosResolver::resolve_scenario`] runs the whole
//! chain for one selection criterion:
//!
//! 1. classify devices and pick the source and destination ASICs
//! 2. build the test port maps and choose the test ports
//! 3. resolve buffer profiles, schedulers and shared headroom on the source port
//! 4. pick the baseline parameter table
//!
//! and returns a [`ParameterBundle`] for the traffic runner.

use crate::buffer::{resolve_buffer_profile, BufferProfile};
use crate::client::{AsicContext, BufferTableKind, ConfigDbClient, DutHandles};
use crate::config::{HarnessOptions, QosParamFile};
use crate::dualtor::fetch_dualtor_ports;
use crate::error::{QosError, QosResult};
use crate::headroom::resolve_shared_headroom;
use crate::interfaces::discover_active_ip_interfaces;
use crate::params::{
    identify_asic_family, port_id_overrides, select_topology_tag, ParamInputs, ParamStrategy,
    QosParamSet,
};
use crate::scheduler::{resolve_scheduler, SchedulerProfile, WrrOverride, LOSSLESS_QUEUE, LOSSY_QUEUE};
use crate::selector::{
    DeviceLinkFacts, PortAsicSelector, ResolvedTopology, SelectionCriterion, TopologyFacts,
};
use crate::services::{DualTorPair, ServiceController, ServiceTarget};
use crate::tables;
use crate::test_ports::{
    build_test_ports, collect_port_maps, uses_separated_dscp_tc_map, PerAsic, PortMapInputs,
    PortMaps, TestPortBundle,
};
use crate::topology::{
    asic_families_differ, classify_testbed_topology, is_long_link, should_skip_400g_longlink,
    should_skip_long_link, speed_cable_token, TopologyClass,
};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;
use sonic_qos_common::{DbId, HarnessError};
use sonic_qos_types::{ActiveIpInterface, Device, Testbed};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Queue ranges of an ordinary port.
const LOSSLESS_RANGE: &str = "3-4";
const LOSSY_PG: &str = "0";
const LOSSY_QUEUES: &str = "0-2";

/// Queue ranges of a dual-ToR facing port.
const DUALTOR_LOSSLESS_RANGE: &str = "2-4";
const DUALTOR_LOSSY_QUEUES: &str = "0-1";

/// Nvidia ports with a `0m` cable carry lossy queues only; one of them is
/// tested per run. Queues 4 and 5 have their own thresholds and are drawn
/// as often as 0 to 3 together.
const LOSSY_ONLY_QUEUE_WEIGHTS: [u32; 6] = [1, 1, 1, 1, 4, 4];
const LOSSY_ONLY_QUEUE_DSCP: [&str; 6] = ["0", "1", "3", "5", "11", "31"];
const LOSSY_ONLY_CABLE_LENGTH: &str = "0m";

/// Everything the traffic runner needs for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterBundle {
    pub criterion: SelectionCriterion,
    pub topology: ResolvedTopology,
    pub test_ports: TestPortBundle,
    #[serde(flatten)]
    pub port_maps: PortMaps,
    /// Source port name, used for every buffer lookup.
    pub src_port: String,
    pub dut_asic: String,
    pub dst_dut_asic: String,
    pub dual_tor_scenario: bool,
    pub ingress_lossless_profile: BufferProfile,
    pub ingress_lossy_profile: BufferProfile,
    pub egress_lossless_profile: BufferProfile,
    pub egress_lossy_profile: BufferProfile,
    #[serde(rename = "losslessSchedProfile")]
    pub lossless_sched: SchedulerProfile,
    #[serde(rename = "lossySchedProfile")]
    pub lossy_sched: SchedulerProfile,
    pub shared_headroom_pool_size: Option<String>,
    pub qos_params: QosParamSet,
}

impl ParameterBundle {
    /// `<speed>_<cable>m` of the source port.
    pub fn speed_cable(&self) -> &str {
        &self.qos_params.speed_cable
    }

    /// PG drop scenarios do not run on 400G long links.
    pub fn skip_400g_longlink(&self) -> QosResult<bool> {
        should_skip_400g_longlink(self.speed_cable())
    }

    pub fn skip_long_link(&self) -> bool {
        should_skip_long_link(self.speed_cable())
    }

    /// Scenarios comparing ingress and egress behavior need one ASIC family.
    pub fn asic_families_differ(&self) -> bool {
        asic_families_differ(&self.dut_asic, &self.dst_dut_asic)
    }

    /// Flat parameter map handed to the traffic runner.
    pub fn to_ptf_params(&self) -> QosResult<Value> {
        let internal = |e: serde_json::Error| QosError::from(HarnessError::internal(e.to_string()));
        let mut params = match serde_json::to_value(&self.test_ports).map_err(internal)? {
            Value::Object(map) => map,
            _ => return Err(HarnessError::internal("test ports did not serialize to a map").into()),
        };
        params.insert(
            "testPortIds".to_string(),
            serde_json::to_value(&self.port_maps.test_port_ids).map_err(internal)?,
        );
        params.insert(
            "testPortIps".to_string(),
            serde_json::to_value(&self.port_maps.test_port_ips).map_err(internal)?,
        );
        params.insert("dualTor".to_string(), Value::Bool(self.qos_params.dual_tor));
        params.insert(
            "portSpeedCableLength".to_string(),
            Value::String(self.qos_params.speed_cable.clone()),
        );
        params.insert("sonic_asic_type".to_string(), Value::String(self.dut_asic.clone()));
        Ok(Value::Object(params))
    }
}

fn device_at(testbed: &Testbed, index: usize) -> QosResult<&Device> {
    testbed
        .device(index)
        .ok_or_else(|| HarnessError::internal(format!("no device at index {}", index)).into())
}

/// Resolves scenarios against one testbed.
pub struct QosResolver {
    testbed: Testbed,
    params: QosParamFile,
    options: HarnessOptions,
    handles: DutHandles,
    selector: PortAsicSelector,
    rng: StdRng,
}

impl QosResolver {
    /// Every random choice derives from `options.rng_seed` when it is set.
    pub fn new(
        testbed: Testbed,
        params: QosParamFile,
        options: HarnessOptions,
        handles: DutHandles,
    ) -> Self {
        let (selector, rng) = match options.rng_seed {
            Some(seed) => (
                PortAsicSelector::seeded(seed),
                StdRng::seed_from_u64(seed.wrapping_add(1)),
            ),
            None => (PortAsicSelector::from_entropy(), StdRng::from_entropy()),
        };
        Self {
            testbed,
            params,
            options,
            handles,
            selector,
            rng,
        }
    }

    pub fn testbed(&self) -> &Testbed {
        &self.testbed
    }

    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    fn device(&self, index: usize) -> QosResult<&Device> {
        device_at(&self.testbed, index)
    }

    fn client(&self, device: usize, asic: u32) -> QosResult<Arc<ConfigDbClient>> {
        self.handles.client(&self.device(device)?.hostname, asic)
    }

    /// (device, ASIC) pairs a scenario touches, source first.
    fn involved_asics(selection: &ResolvedTopology) -> Vec<(usize, u32)> {
        let mut asics = vec![(selection.src_device, selection.src_asic)];
        if !selection.is_single_asic() {
            asics.push((selection.dst_device, selection.dst_asic));
        }
        asics
    }

    /// Selector inputs. Link length only matters off T0/T1, so devices are
    /// only classified there.
    pub async fn topology_facts(&self) -> QosResult<TopologyFacts> {
        let class = classify_testbed_topology(&self.testbed.topology.name);
        let classify = !class.is_t0() && !class.is_t1();
        let mut devices = Vec::with_capacity(self.testbed.devices.len());
        for device in &self.testbed.devices {
            let long_link = if classify {
                let client = self.handles.client(&device.hostname, 0)?;
                is_long_link(&device.hostname, &client).await?
            } else {
                false
            };
            devices.push(DeviceLinkFacts {
                hostname: device.hostname.clone(),
                is_multi_asic: device.is_multi_asic(),
                is_mellanox: device.vendor().is_mellanox(),
                long_link,
            });
        }
        Ok(TopologyFacts {
            topology_name: self.testbed.topology.name.clone(),
            class,
            devices,
            lower_tor_index: self.testbed.lower_tor_index,
        })
    }

    pub async fn resolve_topology(
        &mut self,
        criterion: SelectionCriterion,
    ) -> QosResult<ResolvedTopology> {
        let facts = self.topology_facts().await?;
        self.selector.select(criterion, &facts)
    }

    /// Active IP interfaces of the involved ASICs, from the facts when they
    /// carry them and from `show ip interface` otherwise.
    async fn active_ip_interfaces(
        &self,
        selection: &ResolvedTopology,
    ) -> QosResult<PerAsic<BTreeMap<String, ActiveIpInterface>>> {
        let mut active = PerAsic::new();
        for (dev_idx, asic_idx) in Self::involved_asics(selection) {
            let device = self.device(dev_idx)?;
            let interfaces = match device.facts.active_ip_interfaces.get(&asic_idx) {
                Some(known) if !known.is_empty() => known.clone(),
                _ => {
                    let ctx = AsicContext::lookup(device, asic_idx)?;
                    let runner = self.handles.runner(&device.hostname)?;
                    discover_active_ip_interfaces(runner.as_ref(), ctx.asic).await?
                }
            };
            active
                .entry(dev_idx)
                .or_insert_with(BTreeMap::new)
                .insert(asic_idx, interfaces);
        }
        Ok(active)
    }

    /// Resolves everything the traffic runner needs for `criterion`.
    ///
    /// [`QosError::Unsupported`] means the scenario does not apply to this
    /// testbed.
    pub async fn resolve_scenario(
        &mut self,
        criterion: SelectionCriterion,
    ) -> QosResult<ParameterBundle> {
        let selection = self.resolve_topology(criterion).await?;
        // borrow the testbed field alone so the rng stays free
        let src = device_at(&self.testbed, selection.src_device)?;
        let dst = device_at(&self.testbed, selection.dst_device)?;
        let src_ctx = AsicContext::lookup(src, selection.src_asic)?;
        let src_client = self.client(selection.src_device, selection.src_asic)?;
        let class = classify_testbed_topology(&self.testbed.topology.name);

        let dualtor_ports = match &self.options.dual_tor_ports {
            Some(ports) => ports.clone(),
            None => fetch_dualtor_ports(&src_client).await?,
        };
        let separated_dscp_tc_map = uses_separated_dscp_tc_map(&src_client).await?;
        let cable_key = DbId::ConfigDb.key(tables::CFG_CABLE_LENGTH_TABLE, &[tables::CABLE_LENGTH_KEY]);
        let cable_lengths = src_client.hgetall(DbId::ConfigDb, &cable_key).await?;
        let vlan_addressed =
            class == TopologyClass::T0Like || (class.is_ptf() && src.vendor().is_mellanox());
        let active_ip_interfaces = if vlan_addressed {
            PerAsic::new()
        } else {
            self.active_ip_interfaces(&selection).await?
        };

        let dut_asic = identify_asic_family(&self.testbed, src)?;
        let dst_dut_asic = if selection.dst_device == selection.src_device {
            dut_asic.clone()
        } else {
            identify_asic_family(&self.testbed, dst)?
        };
        let same_asic = selection.is_single_asic();
        let topo_tag =
            select_topology_tag(&self.params, &dut_asic, &self.testbed.topology.name, same_asic);
        let overrides = port_id_overrides(&self.params, &dut_asic, &topo_tag)?;

        let port_maps = collect_port_maps(&PortMapInputs {
            testbed: &self.testbed,
            selection: &selection,
            class,
            dualtor_ports: &dualtor_ports,
            separated_dscp_tc_map,
            cable_lengths: &cable_lengths,
            active_ip_interfaces: &active_ip_interfaces,
        })?;
        let test_ports = build_test_ports(
            &port_maps,
            &selection,
            src,
            &self.options,
            &overrides,
            &mut self.rng,
        )?;
        let src_port = port_maps
            .dut_interfaces
            .get(&test_ports.src_port_id)
            .cloned()
            .ok_or_else(|| {
                QosError::port_selection(format!(
                    "source test port {} has no DUT interface",
                    test_ports.src_port_id
                ))
            })?;

        let dualtor_port = dualtor_ports.contains(&src_port);
        let lossless_range = if dualtor_port {
            DUALTOR_LOSSLESS_RANGE
        } else {
            LOSSLESS_RANGE
        };
        let ingress_lossless_profile = resolve_buffer_profile(
            &src_client,
            src_ctx,
            &src_port,
            lossless_range,
            BufferTableKind::PriorityGroup,
        )
        .await?;
        let ingress_lossy_profile = resolve_buffer_profile(
            &src_client,
            src_ctx,
            &src_port,
            LOSSY_PG,
            BufferTableKind::PriorityGroup,
        )
        .await?;
        let egress_lossless_profile = resolve_buffer_profile(
            &src_client,
            src_ctx,
            &src_port,
            lossless_range,
            BufferTableKind::Queue,
        )
        .await?;

        let lossy_only = !dualtor_port
            && src.vendor().is_mellanox()
            && cable_lengths.get(&src_port).map(String::as_str) == Some(LOSSY_ONLY_CABLE_LENGTH);
        let lossy_only_queue = if lossy_only {
            let weights = WeightedIndex::new(LOSSY_ONLY_QUEUE_WEIGHTS)
                .map_err(|e| QosError::from(HarnessError::internal(e.to_string())))?;
            let queue = weights.sample(&mut self.rng);
            info!(port = %src_port, queue, "Port has only lossy queues");
            Some(queue)
        } else {
            None
        };
        let lossy_queues = match lossy_only_queue {
            Some(queue) => queue.to_string(),
            None if dualtor_port => DUALTOR_LOSSY_QUEUES.to_string(),
            None => LOSSY_QUEUES.to_string(),
        };
        let mut egress_lossy_profile = resolve_buffer_profile(
            &src_client,
            src_ctx,
            &src_port,
            &lossy_queues,
            BufferTableKind::Queue,
        )
        .await?;
        if let Some(queue) = lossy_only_queue {
            egress_lossy_profile.lossy_queue = Some(queue.to_string());
            egress_lossy_profile.lossy_dscp = Some(LOSSY_ONLY_QUEUE_DSCP[queue].to_string());
        }

        let applied = src_client.is_buffer_in_applied_state().await?;
        let speed_cable = speed_cable_token(&ingress_lossless_profile.profile_name, applied)
            .ok_or_else(|| {
                QosError::config_contract(
                    &ingress_lossless_profile.profile_name,
                    "Cannot find port speed/cable length",
                )
            })?;

        let lossless_sched = resolve_scheduler(&src_client, src_ctx, &src_port, LOSSLESS_QUEUE).await?;
        let lossy_sched = resolve_scheduler(&src_client, src_ctx, &src_port, LOSSY_QUEUE).await?;
        let shared_headroom_pool_size = resolve_shared_headroom(&src_client).await?;

        let strategy = ParamStrategy::for_device(src, &dut_asic);
        let qos_params = strategy
            .compute(
                &ParamInputs {
                    params: &self.params,
                    asic_family: &dut_asic,
                    topo_tag: &topo_tag,
                    topology_name: &self.testbed.topology.name,
                    speed_cable: &speed_cable,
                    same_asic,
                    dual_tor: self.options.dual_tor,
                },
                &src_client,
            )
            .await?;

        info!(
            criterion = %criterion,
            src_port = %src_port,
            dut_asic = %dut_asic,
            topo = %qos_params.topo_tag,
            speed_cable = %speed_cable,
            "Resolved scenario"
        );
        Ok(ParameterBundle {
            criterion,
            topology: selection,
            test_ports,
            port_maps,
            src_port,
            dut_asic,
            dst_dut_asic,
            dual_tor_scenario: !dualtor_ports.is_empty(),
            ingress_lossless_profile,
            ingress_lossy_profile,
            egress_lossless_profile,
            egress_lossy_profile,
            lossless_sched,
            lossy_sched,
            shared_headroom_pool_size,
            qos_params,
        })
    }

    /// Stores of every ASIC the scenario touches.
    pub fn scenario_clients(&self, bundle: &ParameterBundle) -> QosResult<Vec<Arc<ConfigDbClient>>> {
        Self::involved_asics(&bundle.topology)
            .into_iter()
            .map(|(dev, asic)| self.client(dev, asic))
            .collect()
    }

    /// Writes the scenario's WRR test weights. The returned override puts
    /// the baseline weights back.
    pub async fn apply_wrr_weights(&self, bundle: &ParameterBundle) -> QosResult<WrrOverride> {
        let weights = bundle.qos_params.wrr_weights()?;
        let clients = self.scenario_clients(bundle)?;
        let wrr = WrrOverride::new(bundle.lossless_sched.clone(), bundle.lossy_sched.clone());
        wrr.apply(&clients, weights).await?;
        Ok(wrr)
    }

    pub async fn restore_wrr_weights(&self, bundle: &ParameterBundle, wrr: &WrrOverride) -> QosResult<()> {
        let clients = self.scenario_clients(bundle)?;
        wrr.restore(&clients).await
    }

    /// Service controller for this testbed, covering both ToRs on dual ToR.
    pub fn service_controller(&self) -> QosResult<ServiceController> {
        let controller = ServiceController::new(self.options.max_workers);
        if !self.testbed.topology.is_dualtor() {
            return Ok(controller);
        }
        let lower_idx = self
            .testbed
            .lower_tor_index
            .ok_or_else(|| QosError::params("dual ToR testbed does not name its lower ToR"))?;
        let upper_idx = (0..self.testbed.devices.len())
            .find(|&idx| idx != lower_idx)
            .ok_or_else(|| QosError::params("dual ToR testbed has no upper ToR"))?;
        let lower = self.device(lower_idx)?;
        let upper = self.device(upper_idx)?;
        debug!(upper = %upper.hostname, lower = %lower.hostname, "Dual ToR pair");
        let pair = DualTorPair::new(
            self.handles.runner(&upper.hostname)?,
            self.handles.runner(&lower.hostname)?,
        );
        Ok(controller.with_dual_tor(pair))
    }

    /// Targets for quiescing services on every ASIC the scenario touches.
    pub fn service_targets(&self, selection: &ResolvedTopology) -> QosResult<Vec<ServiceTarget>> {
        let mut seen = BTreeSet::new();
        let mut targets = Vec::new();
        for (dev_idx, asic_idx) in Self::involved_asics(selection) {
            if !seen.insert((dev_idx, asic_idx)) {
                continue;
            }
            let device = self.device(dev_idx)?;
            let ctx = AsicContext::lookup(device, asic_idx)?;
            let runner = self.handles.runner(&device.hostname)?;
            debug!(host = %device.hostname, asic = asic_idx, "Service target");
            targets.push(ServiceTarget::new(runner, ctx.asic.clone()));
        }
        Ok(targets)
    }
}
