//! Testbed topology and link classification
//!
//! Topologies are classified by name against static sets. Devices are
//! classified short-link or long-link from the cable length encoded in the
//! names of their bound lossless PG profiles.

use crate::client::{bare_reference, ConfigDbClient};
use crate::error::{QosError, QosResult};
use crate::tables::{self, buffer_binding_fields};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sonic_qos_common::DbId;
use std::fmt;
use tracing::{debug, info};

pub const T0_TOPOLOGIES: &[&str] = &[
    "t0",
    "t0-56",
    "t0-56-po2vlan",
    "t0-64",
    "t0-116",
    "t0-118",
    "t0-35",
    "dualtor-56",
    "dualtor-64",
    "dualtor-120",
    "dualtor",
    "dualtor-64-breakout",
    "dualtor-aa",
    "dualtor-aa-56",
    "dualtor-aa-64-breakout",
    "t0-120",
    "t0-80",
    "t0-backend",
    "t0-56-o8v48",
    "t0-8-lag",
    "t0-standalone-32",
    "t0-standalone-64",
    "t0-standalone-128",
    "t0-standalone-256",
    "t0-28",
    "t0-isolated-d16u16s1",
    "t0-isolated-d16u16s2",
    "t0-88-o8c80",
];

pub const T1_TOPOLOGIES: &[&str] = &[
    "t1-lag",
    "t1-64-lag",
    "t1-56-lag",
    "t1-backend",
    "t1-28-lag",
    "t1-32-lag",
    "t1-48-lag",
    "t1-isolated-d28u1",
    "t1-isolated-v6-d28u1",
    "t1-isolated-d56u2",
    "t1-isolated-v6-d56u2",
    "t1-isolated-d56u1-lag",
    "t1-isolated-v6-d56u1-lag",
    "t1-isolated-d448u15-lag",
    "t1-isolated-v6-d448u15-lag",
];

pub const PTF_TOPOLOGIES: &[&str] = &["ptf32", "ptf64"];

/// Cable length (meters) at and above which a link counts as long.
pub const LONG_LINK_THRESHOLD: u64 = 120_000;

/// Cable length above which long-link-sensitive scenarios are skipped.
pub const LONG_LINK_SKIP_THRESHOLD: u64 = 2_000;

static LOSSLESS_CABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^pg_lossless_[0-9]+_([0-9]+)m_profile").unwrap());

static APPLIED_SPEED_CABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^BUFFER_PROFILE_TABLE:pg_lossless_(.*)_profile$").unwrap());

static CONFIGURED_SPEED_CABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^BUFFER_PROFILE\|pg_lossless_(.*)_profile").unwrap());

static SPEED_CABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([0-9]+)_([0-9]+)m").unwrap());

static CABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_([0-9]*)m").unwrap());

/// Shape of the testbed as far as port addressing goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopologyClass {
    /// VLAN-addressed ToR topologies.
    T0Like,
    /// Routed leaf topologies.
    T1Like,
    /// Chassis and anything not listed elsewhere.
    T2Like,
    /// Traffic-generator-only topologies.
    PtfLike,
}

impl TopologyClass {
    pub fn is_t0(&self) -> bool {
        *self == TopologyClass::T0Like
    }

    pub fn is_t1(&self) -> bool {
        *self == TopologyClass::T1Like
    }

    pub fn is_ptf(&self) -> bool {
        *self == TopologyClass::PtfLike
    }
}

impl fmt::Display for TopologyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TopologyClass::T0Like => "t0-like",
            TopologyClass::T1Like => "t1-like",
            TopologyClass::T2Like => "t2-like",
            TopologyClass::PtfLike => "ptf-like",
        };
        write!(f, "{}", s)
    }
}

/// Classifies a topology by name. Unknown names are treated as T2-like.
pub fn classify_testbed_topology(name: &str) -> TopologyClass {
    if T0_TOPOLOGIES.contains(&name) {
        TopologyClass::T0Like
    } else if T1_TOPOLOGIES.contains(&name) {
        TopologyClass::T1Like
    } else if PTF_TOPOLOGIES.contains(&name) {
        TopologyClass::PtfLike
    } else {
        TopologyClass::T2Like
    }
}

/// Cable length in meters encoded in a lossless profile name.
///
/// `pg_lossless_100000_300m_profile` yields `Some(300)`.
pub fn parse_cable_length(profile_name: &str) -> Option<u64> {
    LOSSLESS_CABLE_RE
        .captures(profile_name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Returns true if any lossless PG profile bound on the device encodes a
/// cable length of at least [`LONG_LINK_THRESHOLD`].
///
/// Bindings are read from CONFIG_DB `BUFFER_PG` on the given ASIC. A bound
/// lossless profile without a cable-length token is a classification error.
pub async fn is_long_link(hostname: &str, client: &ConfigDbClient) -> QosResult<bool> {
    let pattern = format!("{}|*", tables::CFG_BUFFER_PG_TABLE);
    let prefix = format!("{}|", tables::CFG_BUFFER_PROFILE_TABLE);
    let mut long_link = false;

    for key in client.keys(DbId::ConfigDb, &pattern).await? {
        let Some(profile) = client
            .get(DbId::ConfigDb, &key, buffer_binding_fields::PROFILE)
            .await?
        else {
            continue;
        };
        let name = bare_reference(&profile, &[&prefix]);
        if !name.contains("pg_lossless") {
            continue;
        }
        let cable = parse_cable_length(name).ok_or_else(|| {
            QosError::classification(
                hostname,
                format!("lossless profile '{}' bound at {} has no cable length", name, key),
            )
        })?;
        debug!(hostname = %hostname, profile = %name, cable, "Lossless profile cable length");
        if cable >= LONG_LINK_THRESHOLD {
            long_link = true;
        }
    }

    info!(hostname = %hostname, long_link, "Classified device link length");
    Ok(long_link)
}

/// `<speed>_<cable>m` token of a resolved lossless profile key.
///
/// `BUFFER_PROFILE_TABLE:pg_lossless_100000_5m_profile` yields `100000_5m`.
pub fn speed_cable_token(profile_name: &str, applied: bool) -> Option<String> {
    let re = if applied {
        &*APPLIED_SPEED_CABLE_RE
    } else {
        &*CONFIGURED_SPEED_CABLE_RE
    };
    re.captures(profile_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
}

/// Port speed and cable length decoded from a speed/cable token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedCableLength {
    pub speed: u64,
    pub cable_m: u64,
}

impl SpeedCableLength {
    pub fn parse(token: &str) -> QosResult<Self> {
        let caps = SPEED_CABLE_RE.captures(token).ok_or_else(|| {
            QosError::config_contract(token, "format error in port speed/cable length")
        })?;
        let speed = caps[1]
            .parse()
            .map_err(|_| QosError::config_contract(token, "speed out of range"))?;
        let cable_m = caps[2]
            .parse()
            .map_err(|_| QosError::config_contract(token, "cable length out of range"))?;
        Ok(Self { speed, cable_m })
    }
}

/// PG drop scenarios are not run on 400G long links.
pub fn should_skip_400g_longlink(token: &str) -> QosResult<bool> {
    let sc = SpeedCableLength::parse(token)?;
    Ok(sc.speed >= 400_000 && sc.cable_m >= LONG_LINK_THRESHOLD)
}

/// Long-link-sensitive scenarios are not run beyond 2 km.
pub fn should_skip_long_link(token: &str) -> bool {
    CABLE_RE
        .captures(token)
        .and_then(|c| c[1].parse::<u64>().ok())
        .is_some_and(|cable| cable > LONG_LINK_SKIP_THRESHOLD)
}

/// Scenarios that need identical ingress and egress ASICs.
pub fn asic_families_differ(src: &str, dst: &str) -> bool {
    src != dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_qos_test::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_classify_topology() {
        assert_eq!(classify_testbed_topology("t0-64"), TopologyClass::T0Like);
        assert_eq!(classify_testbed_topology("dualtor-aa"), TopologyClass::T0Like);
        assert_eq!(classify_testbed_topology("t1-lag"), TopologyClass::T1Like);
        assert_eq!(classify_testbed_topology("ptf64"), TopologyClass::PtfLike);
        assert_eq!(classify_testbed_topology("t2"), TopologyClass::T2Like);
        assert_eq!(classify_testbed_topology("not-a-topo"), TopologyClass::T2Like);
    }

    #[test]
    fn test_parse_cable_length() {
        assert_eq!(parse_cable_length("pg_lossless_100000_300m_profile"), Some(300));
        assert_eq!(parse_cable_length("pg_lossless_400000_150000m_profile"), Some(150000));
        assert_eq!(parse_cable_length("pg_lossless_profile"), None);
    }

    #[test]
    fn test_speed_cable_token() {
        assert_eq!(
            speed_cable_token("BUFFER_PROFILE_TABLE:pg_lossless_100000_5m_profile", true),
            Some("100000_5m".to_string())
        );
        assert_eq!(
            speed_cable_token("BUFFER_PROFILE|pg_lossless_40000_300m_profile", false),
            Some("40000_300m".to_string())
        );
        assert_eq!(speed_cable_token("BUFFER_PROFILE|ingress_lossy_profile", false), None);
    }

    #[test]
    fn test_skip_predicates() {
        assert!(should_skip_400g_longlink("400000_120000m").unwrap());
        assert!(!should_skip_400g_longlink("400000_300m").unwrap());
        assert!(!should_skip_400g_longlink("100000_120000m").unwrap());
        assert!(should_skip_400g_longlink("garbage").is_err());

        assert!(should_skip_long_link("100000_40000m"));
        assert!(!should_skip_long_link("100000_2000m"));
        assert!(!should_skip_long_link("100000_5m"));

        assert!(asic_families_differ("gb", "gr"));
        assert!(!asic_families_differ("th3", "th3"));
    }

    fn store_with_pg(profile: &str) -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::new("dut")
                .with_hash(DbId::ConfigDb, "BUFFER_PG|Ethernet0|0", [("profile", "ingress_lossy_profile")])
                .with_hash(DbId::ConfigDb, "BUFFER_PG|Ethernet0|3-4", [("profile", profile)]),
        )
    }

    #[tokio::test]
    async fn test_short_link_device() {
        let client = ConfigDbClient::new(store_with_pg("pg_lossless_100000_300m_profile"));
        assert!(!is_long_link("dut", &client).await.unwrap());
    }

    #[tokio::test]
    async fn test_long_link_device_with_legacy_reference() {
        let client = ConfigDbClient::new(store_with_pg(
            "[BUFFER_PROFILE|pg_lossless_100000_150000m_profile]",
        ));
        assert!(is_long_link("dut", &client).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_lossless_name_is_fatal() {
        let client = ConfigDbClient::new(store_with_pg("pg_lossless_custom_profile"));
        let err = is_long_link("dut", &client).await.unwrap_err();
        assert!(matches!(err, QosError::Classification { .. }));
        assert!(!err.is_skip());
    }
}
