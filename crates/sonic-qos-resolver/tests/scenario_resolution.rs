//! Scenario resolution integration tests
//!
//! Drives `QosResolver` end to end over in-memory stores and scripted
//! runners, the way a test run would against a live testbed.

use pretty_assertions::assert_eq;
use sonic_qos_common::{CommandRunner, ConfigStore, DbId};
use sonic_qos_resolver::{
    DutHandles, HarnessOptions, ParamStrategy, QosError, QosParamFile, QosResolver,
    SelectionCriterion, ServiceTarget,
};
use sonic_qos_test::{
    dynamic_profile_fields, lossless_profile_fields, testbed, BufferTables, DeviceBuilder,
    MemoryStore, ScriptedRunner, StoreVerifier,
};
use sonic_qos_types::{AsicInstance, Testbed};
use std::sync::Arc;

const T1_HWSKU: &str = "Arista-7060CX-32S-C32";
const SPC3_HWSKU: &str = "Mellanox-SN4700-O8C48";

fn options(seed: u64) -> HarnessOptions {
    HarnessOptions {
        rng_seed: Some(seed),
        ..HarnessOptions::default()
    }
}

fn params() -> QosParamFile {
    serde_yaml::from_str(
        r#"
qos_params:
  th:
    topo-any:
      100000_5m:
        pkts_num_leak_out: 0
        wrr_chg:
          lossless_weight: 30
          lossy_weight: 8
      hdrm_pool_size:
        dscps: [3, 4]
  mellanox:
    topo-any:
      0_0m:
        pkts_num_leak_out: 0
      wrr_chg:
        lossless_weight: 20
        lossy_weight: 6
"#,
    )
    .unwrap()
}

/// Broadcom leaf with four routed ports; Ethernet4 is ptf port 1.
fn t1_testbed() -> Testbed {
    let mut device = DeviceBuilder::new("leaf", "broadcom").hwsku(T1_HWSKU);
    for (i, peer) in ["10.0.0.1", "10.0.0.3", "10.0.0.5", "10.0.0.7"].iter().enumerate() {
        let port = format!("Ethernet{}", i * 4);
        let addr = format!("10.0.0.{}", i * 2);
        device = device
            .port(&port, i as u32, 100_000)
            .active_ip(0, &port, &addr, peer);
    }
    let mut tb = testbed("t1-lag", "t1", vec![device.build()]);
    tb.hwsku_inventory
        .insert("broadcom_th_hwskus".to_string(), vec![T1_HWSKU.to_string()]);
    tb
}

fn t1_store() -> MemoryStore {
    let store = BufferTables::applied()
        .pool("ingress_lossless_pool", 1_000_000)
        .pool("egress_lossy_pool", 2_000_000)
        .profile(
            "pg_lossless_100000_5m_profile",
            lossless_profile_fields(0, 18432, 50000, "3"),
        )
        .profile("ingress_lossy_profile", dynamic_profile_fields("ingress_lossless_pool", 0, "3"))
        .profile(
            "egress_lossless_profile",
            [("pool", "egress_lossless_pool"), ("size", "0"), ("static_th", "3995680")],
        )
        .profile("egress_lossy_profile", dynamic_profile_fields("egress_lossy_pool", 1518, "3"))
        .pg("Ethernet4", "3-4", "pg_lossless_100000_5m_profile")
        .pg("Ethernet4", "0", "ingress_lossy_profile")
        .queue("Ethernet4", "3-4", "egress_lossless_profile")
        .queue("Ethernet4", "0-2", "egress_lossy_profile")
        .into_store("leaf");
    store.set_hash(DbId::ConfigDb, "QUEUE|Ethernet4|3", [("scheduler", "scheduler.1")]);
    store.set_hash(DbId::ConfigDb, "QUEUE|Ethernet4|0", [("scheduler", "scheduler.0")]);
    store.set_hash(DbId::ConfigDb, "SCHEDULER|scheduler.1", [("type", "DWRR"), ("weight", "15")]);
    store.set_hash(DbId::ConfigDb, "SCHEDULER|scheduler.0", [("type", "DWRR"), ("weight", "14")]);
    store.set_hash(DbId::ConfigDb, "CABLE_LENGTH|AZURE", [("Ethernet4", "5m")]);
    store
}

fn handles(hostname: &str, store: Arc<MemoryStore>, runner: Arc<ScriptedRunner>) -> DutHandles {
    let mut handles = DutHandles::new();
    handles.insert_asic(hostname, 0, store as Arc<dyn ConfigStore>);
    handles.insert_runner(hostname, runner as Arc<dyn CommandRunner>);
    handles
}

#[tokio::test]
async fn test_t1_single_asic_scenario() {
    let store = Arc::new(t1_store());
    let runner = Arc::new(ScriptedRunner::new("leaf"));
    let mut resolver = QosResolver::new(
        t1_testbed(),
        params(),
        options(7),
        handles("leaf", store.clone(), runner),
    );

    let bundle = resolver
        .resolve_scenario(SelectionCriterion::SingleAsic)
        .await
        .unwrap();

    assert_eq!(bundle.src_port, "Ethernet4");
    assert_eq!(bundle.test_ports.src_port_id, 1);
    assert_eq!(bundle.test_ports.src_port_ip, "10.0.0.3");
    assert_eq!(
        [
            bundle.test_ports.dst_port_id,
            bundle.test_ports.dst_port_2_id,
            bundle.test_ports.dst_port_3_id
        ],
        [0, 2, 3]
    );
    assert_eq!(bundle.test_ports.dst_port_3_ip, "10.0.0.7");
    assert_eq!(bundle.dut_asic, "th");
    assert!(!bundle.dual_tor_scenario);

    assert_eq!(
        bundle.ingress_lossless_profile.profile_name,
        "BUFFER_PROFILE_TABLE:pg_lossless_100000_5m_profile"
    );
    assert_eq!(bundle.ingress_lossless_profile.static_th, Some(888_888));
    assert_eq!(bundle.egress_lossless_profile.static_th, Some(3_995_680));
    assert_eq!(bundle.egress_lossy_profile.static_th, Some(1_779_295));
    assert_eq!(bundle.lossless_sched.profile, "SCHEDULER|scheduler.1");
    assert_eq!(bundle.lossless_sched.weight, Some(15));
    assert_eq!(bundle.lossy_sched.weight, Some(14));
    assert_eq!(bundle.shared_headroom_pool_size, None);

    assert_eq!(bundle.speed_cable(), "100000_5m");
    assert!(!bundle.skip_long_link());
    assert_eq!(
        bundle.qos_params.strategy,
        ParamStrategy::BufferConfigDriven {
            vendor_defaults: false
        }
    );
    assert_eq!(bundle.qos_params.topo_tag, "topo-any");
    let buffer_config = bundle.qos_params.buffer_config.as_ref().unwrap();
    assert_eq!(buffer_config.len(), 4);
    assert!(buffer_config["BUFFER_PROFILE"].contains_key("egress_lossy_profile"));

    let ptf = bundle.to_ptf_params().unwrap();
    assert_eq!(ptf["src_port_id"], serde_json::json!(1));
    assert_eq!(ptf["sonic_asic_type"], serde_json::json!("th"));
}

#[tokio::test]
async fn test_wrr_weights_applied_and_restored() {
    let store = Arc::new(t1_store());
    let runner = Arc::new(ScriptedRunner::new("leaf"));
    let mut resolver = QosResolver::new(
        t1_testbed(),
        params(),
        options(7),
        handles("leaf", store.clone(), runner),
    );
    let bundle = resolver
        .resolve_scenario(SelectionCriterion::SingleAsic)
        .await
        .unwrap();

    let wrr = resolver.apply_wrr_weights(&bundle).await.unwrap();
    let verifier = StoreVerifier::new(store.as_ref());
    verifier
        .assert_field_value(DbId::ConfigDb, "SCHEDULER|scheduler.1", "weight", "30")
        .await
        .unwrap();
    verifier
        .assert_field_value(DbId::ConfigDb, "SCHEDULER|scheduler.0", "weight", "8")
        .await
        .unwrap();

    resolver.restore_wrr_weights(&bundle, &wrr).await.unwrap();
    assert_eq!(
        store.peek(DbId::ConfigDb, "SCHEDULER|scheduler.1", "weight").as_deref(),
        Some("15")
    );
    assert_eq!(
        store.peek(DbId::ConfigDb, "SCHEDULER|scheduler.0", "weight").as_deref(),
        Some("14")
    );
}

#[tokio::test]
async fn test_services_quiesced_on_source_asic() {
    let store = Arc::new(t1_store());
    let runner = Arc::new(ScriptedRunner::new("leaf"));
    let mut resolver = QosResolver::new(
        t1_testbed(),
        params(),
        options(7),
        handles("leaf", store, runner.clone()),
    );
    let selection = resolver
        .resolve_topology(SelectionCriterion::SingleAsic)
        .await
        .unwrap();

    let targets = resolver.service_targets(&selection).unwrap();
    assert_eq!(targets.len(), 1);

    let controller = resolver.service_controller().unwrap();
    controller.quiesce(&targets).await.unwrap();
    assert!(runner.ran("sudo config bgp shutdown all"));
    assert!(runner.ran("docker exec swss supervisorctl stop arp_update"));

    controller.restore(&targets).await.unwrap();
    assert!(runner.ran("sudo config bgp start all"));
}

#[tokio::test]
async fn test_dual_tor_services_cover_both_tors() {
    let upper = Arc::new(ScriptedRunner::new("tor-upper"));
    let lower = Arc::new(ScriptedRunner::new("tor-lower"));
    let mut handles = DutHandles::new();
    handles.insert_runner("tor-upper", upper.clone() as Arc<dyn CommandRunner>);
    handles.insert_runner("tor-lower", lower.clone() as Arc<dyn CommandRunner>);

    let mut tb = testbed(
        "dualtor-56",
        "t0",
        vec![
            DeviceBuilder::new("tor-upper", "mellanox").build(),
            DeviceBuilder::new("tor-lower", "mellanox").build(),
        ],
    );
    tb.lower_tor_index = Some(1);
    let resolver = QosResolver::new(tb, params(), options(5), handles);

    let controller = resolver.service_controller().unwrap();
    let targets = [ServiceTarget::new(lower.clone(), AsicInstance::new(0, None))];
    controller.quiesce(&targets).await.unwrap();

    assert!(lower.ran("sudo touch /usr/local/bin/write_standby.py"));
    assert!(lower.ran("sudo config bgp shutdown all"));
    assert!(upper.ran("sudo config feature state mux disabled"));
    assert!(upper.ran("sudo config feature autorestart syncd disabled"));
    assert!(!upper.ran("sudo config bgp shutdown all"));

    controller.restore(&targets).await.unwrap();
    assert!(lower.ran("sudo cp /usr/local/bin/write_standby.py.bkup /usr/local/bin/write_standby.py"));
    assert!(upper.ran("sudo config feature state mux enabled"));
    assert!(upper.ran("sudo config feature autorestart syncd enabled"));
}

#[test]
fn test_dual_tor_without_lower_tor_is_rejected() {
    let tb = testbed(
        "dualtor",
        "t0",
        vec![
            DeviceBuilder::new("tor-upper", "mellanox").build(),
            DeviceBuilder::new("tor-lower", "mellanox").build(),
        ],
    );
    let resolver = QosResolver::new(tb, params(), options(5), DutHandles::new());
    assert!(matches!(resolver.service_controller(), Err(QosError::Params(_))));
}

#[tokio::test]
async fn test_multi_asic_scenario_skipped_on_t0() {
    let device = DeviceBuilder::new("tor", "broadcom")
        .port("Ethernet0", 0, 100_000)
        .build();
    let mut resolver = QosResolver::new(
        testbed("t0", "t0", vec![device]),
        params(),
        options(1),
        DutHandles::new(),
    );

    let err = resolver
        .resolve_scenario(SelectionCriterion::SingleDutMultiAsic)
        .await
        .unwrap_err();
    assert!(err.is_skip());
    assert!(matches!(err, QosError::Unsupported(_)));
}

#[tokio::test]
async fn test_multi_dut_long_link_classification() {
    let long = DeviceBuilder::new("lc-long", "broadcom").asics(2).build();
    let short = DeviceBuilder::new("lc-short", "broadcom").asics(2).build();
    let long_store = MemoryStore::new("lc-long").with_hash(
        DbId::ConfigDb,
        "BUFFER_PG|Ethernet0|3-4",
        [("profile", "pg_lossless_400000_120000m_profile")],
    );
    let short_store = MemoryStore::new("lc-short").with_hash(
        DbId::ConfigDb,
        "BUFFER_PG|Ethernet0|3-4",
        [("profile", "pg_lossless_400000_5m_profile")],
    );
    let mut handles = DutHandles::new();
    handles.insert_asic("lc-long", 0, Arc::new(long_store));
    handles.insert_asic("lc-short", 0, Arc::new(short_store));

    let mut resolver = QosResolver::new(
        testbed("t2", "t2", vec![long, short]),
        params(),
        options(3),
        handles,
    );

    let selection = resolver
        .resolve_topology(SelectionCriterion::MultiDutShortlinkToLonglink)
        .await
        .unwrap();
    assert_eq!((selection.src_device, selection.dst_device), (1, 0));
    assert!(selection.dst_long_link);
    assert!(!selection.src_long_link);

    let selection = resolver
        .resolve_topology(SelectionCriterion::MultiDutLonglinkToShortlink)
        .await
        .unwrap();
    assert_eq!((selection.src_device, selection.dst_device), (0, 1));
    assert!(selection.src_long_link);
}

/// Nvidia ToR whose ports all carry `0m` cables, so only lossy queues exist.
fn spc3_testbed() -> Testbed {
    let members = ["Ethernet0", "Ethernet4", "Ethernet8", "Ethernet12", "Ethernet16"];
    let mut device = DeviceBuilder::new("tor", "mellanox").hwsku(SPC3_HWSKU);
    for (i, port) in members.iter().enumerate() {
        device = device.port(port, i as u32, 100_000);
    }
    let device = device
        .vlan("Vlan1000", 1000, &members[..4], false)
        .vlan_interface("Vlan1000", "192.168.0.1/21")
        .build();
    let mut tb = testbed("t0", "t0", vec![device]);
    tb.hwsku_inventory
        .insert("mellanox_spc3_hwskus".to_string(), vec![SPC3_HWSKU.to_string()]);
    tb
}

fn spc3_store() -> MemoryStore {
    let mut tables = BufferTables::applied()
        .pool("ingress_lossless_pool", 1_000_000)
        .pool("egress_lossy_pool", 1_000_000)
        .profile("ingress_lossy_profile", dynamic_profile_fields("ingress_lossless_pool", 0, "0"))
        .profile("egress_lossy_profile", dynamic_profile_fields("egress_lossy_pool", 0, "0"))
        .pg("Ethernet4", "0", "ingress_lossy_profile");
    for queue in 0..6 {
        tables = tables.queue("Ethernet4", &queue.to_string(), "egress_lossy_profile");
    }
    let store = tables.into_store("tor");
    let cables: Vec<(String, String)> = (0..5)
        .map(|i| (format!("Ethernet{}", i * 4), "0m".to_string()))
        .collect();
    store.set_hash(DbId::ConfigDb, "CABLE_LENGTH|AZURE", cables);
    store.set_hash(DbId::ConfigDb, "QUEUE|Ethernet4|3", [("scheduler", "scheduler.0")]);
    store.set_hash(DbId::ConfigDb, "QUEUE|Ethernet4|0", [("scheduler", "scheduler.0")]);
    store.set_hash(DbId::ConfigDb, "SCHEDULER|scheduler.0", [("type", "DWRR"), ("weight", "14")]);
    store
}

#[tokio::test]
async fn test_mellanox_lossy_only_port() {
    let store = Arc::new(spc3_store());
    let runner = Arc::new(ScriptedRunner::new("tor"));
    let mut resolver = QosResolver::new(
        spc3_testbed(),
        params(),
        options(11),
        handles("tor", store, runner),
    );

    let bundle = resolver
        .resolve_scenario(SelectionCriterion::SingleAsic)
        .await
        .unwrap();

    // the fanout uplink (last ptf index) never becomes a test port
    assert_eq!(bundle.port_maps.test_port_ids[&0][&0], vec![0, 1, 2, 3]);
    assert_eq!(bundle.src_port, "Ethernet4");
    assert_eq!(bundle.test_ports.src_port_ip, "192.168.0.3");
    assert_eq!(bundle.test_ports.dst_port_vlan, None);

    // nothing lossless is bound on a 0m port
    assert_eq!(
        bundle.ingress_lossless_profile.profile_name,
        "BUFFER_PROFILE_TABLE:pg_lossless_0_0m_profile"
    );
    assert_eq!(bundle.speed_cable(), "0_0m");
    assert_eq!(bundle.ingress_lossy_profile.static_th, Some(500_000));

    let queue: usize = bundle
        .egress_lossy_profile
        .lossy_queue
        .as_deref()
        .unwrap()
        .parse()
        .unwrap();
    assert!(queue < 6);
    let dscp = bundle.egress_lossy_profile.lossy_dscp.as_deref().unwrap();
    assert_eq!(dscp, ["0", "1", "3", "5", "11", "31"][queue]);
    assert_eq!(bundle.egress_lossy_profile.static_th, Some(500_000));

    assert_eq!(bundle.qos_params.strategy, ParamStrategy::Mellanox);
    assert_eq!(bundle.qos_params.topo_tag, "topo-any");
    assert_eq!(bundle.qos_params.wrr_weights().unwrap().lossless, 20);
}

#[tokio::test]
async fn test_same_seed_same_lossy_queue() {
    let mut queues = Vec::new();
    for _ in 0..2 {
        let mut resolver = QosResolver::new(
            spc3_testbed(),
            params(),
            options(42),
            handles("tor", Arc::new(spc3_store()), Arc::new(ScriptedRunner::new("tor"))),
        );
        let bundle = resolver
            .resolve_scenario(SelectionCriterion::SingleAsic)
            .await
            .unwrap();
        queues.push(bundle.egress_lossy_profile.lossy_queue);
    }
    assert_eq!(queues[0], queues[1]);
}

#[tokio::test]
async fn test_unbound_scheduler_is_fatal() {
    let store = t1_store();
    store.set_field(DbId::ConfigDb, "QUEUE|Ethernet4|3", "scheduler", "");
    let mut resolver = QosResolver::new(
        t1_testbed(),
        params(),
        options(7),
        handles("leaf", Arc::new(store), Arc::new(ScriptedRunner::new("leaf"))),
    );

    let err = resolver
        .resolve_scenario(SelectionCriterion::SingleAsic)
        .await
        .unwrap_err();
    assert!(!err.is_skip());
    assert!(err.to_string().contains("QUEUE|Ethernet4|3"));
}
