//! Port/ASIC selection per test scenario.
//!
//! Selection is a pure function of already-fetched device facts and an
//! injected random source. Infeasible scenarios return
//! [`QosError::Unsupported`] so callers can skip instead of failing.

use crate::error::{QosError, QosResult};
use crate::topology::TopologyClass;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Test scenario tag driving source/destination selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionCriterion {
    SingleAsic,
    SingleDutMultiAsic,
    MultiDutLonglinkToShortlink,
    MultiDutShortlinkToShortlink,
    MultiDutShortlinkToLonglink,
}

impl SelectionCriterion {
    pub const ALL: [SelectionCriterion; 5] = [
        SelectionCriterion::SingleAsic,
        SelectionCriterion::SingleDutMultiAsic,
        SelectionCriterion::MultiDutLonglinkToShortlink,
        SelectionCriterion::MultiDutShortlinkToShortlink,
        SelectionCriterion::MultiDutShortlinkToLonglink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionCriterion::SingleAsic => "single_asic",
            SelectionCriterion::SingleDutMultiAsic => "single_dut_multi_asic",
            SelectionCriterion::MultiDutLonglinkToShortlink => "multi_dut_longlink_to_shortlink",
            SelectionCriterion::MultiDutShortlinkToShortlink => "multi_dut_shortlink_to_shortlink",
            SelectionCriterion::MultiDutShortlinkToLonglink => "multi_dut_shortlink_to_longlink",
        }
    }

    pub fn is_multi_dut(&self) -> bool {
        !matches!(
            self,
            SelectionCriterion::SingleAsic | SelectionCriterion::SingleDutMultiAsic
        )
    }
}

impl fmt::Display for SelectionCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionCriterion {
    type Err = QosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| QosError::params(format!("unknown selection criterion '{}'", s)))
    }
}

/// What the selector needs to know about one frontend device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLinkFacts {
    pub hostname: String,
    pub is_multi_asic: bool,
    pub is_mellanox: bool,
    pub long_link: bool,
}

/// Testbed-level inputs to selection.
#[derive(Debug, Clone)]
pub struct TopologyFacts {
    pub topology_name: String,
    pub class: TopologyClass,
    /// Frontend devices in inventory order.
    pub devices: Vec<DeviceLinkFacts>,
    /// Index of the lower ToR on dual-ToR testbeds.
    pub lower_tor_index: Option<usize>,
}

impl TopologyFacts {
    pub fn is_dualtor(&self) -> bool {
        self.topology_name.contains("dualtor")
    }

    fn shortlink_indices(&self) -> Vec<usize> {
        self.devices
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.long_link)
            .map(|(i, _)| i)
            .collect()
    }

    fn first_matching(&self, long_link: bool, from: usize) -> Option<usize> {
        self.devices
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, d)| d.long_link == long_link)
            .map(|(i, _)| i)
    }
}

/// Device/ASIC pair chosen for source and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTopology {
    pub src_device: usize,
    pub src_asic: u32,
    pub dst_device: usize,
    pub dst_asic: u32,
    pub src_long_link: bool,
    pub dst_long_link: bool,
}

impl ResolvedTopology {
    fn same_device(device: usize, src_asic: u32, dst_asic: u32) -> Self {
        Self {
            src_device: device,
            src_asic,
            dst_device: device,
            dst_asic,
            src_long_link: false,
            dst_long_link: false,
        }
    }

    pub fn is_single_asic(&self) -> bool {
        self.src_device == self.dst_device && self.src_asic == self.dst_asic
    }
}

/// Chooses source and destination (device, ASIC) pairs.
pub struct PortAsicSelector {
    rng: StdRng,
}

impl PortAsicSelector {
    pub fn new(rng: StdRng) -> Self {
        Self { rng }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    pub fn select(
        &mut self,
        criterion: SelectionCriterion,
        facts: &TopologyFacts,
    ) -> QosResult<ResolvedTopology> {
        info!(criterion = %criterion, topology = %facts.topology_name, "Selecting src/dst");
        if facts.devices.is_empty() {
            return Err(QosError::unsupported("testbed has no frontend devices"));
        }
        let selected = match criterion {
            SelectionCriterion::SingleAsic => self.select_single_asic(facts)?,
            SelectionCriterion::SingleDutMultiAsic => self.select_single_dut_multi_asic(facts)?,
            _ => Self::select_multi_dut(criterion, facts)?,
        };
        info!(
            src = %facts.devices[selected.src_device].hostname,
            src_asic = selected.src_asic,
            dst = %facts.devices[selected.dst_device].hostname,
            dst_asic = selected.dst_asic,
            "Selected src/dst"
        );
        Ok(selected)
    }

    fn select_single_asic(&mut self, facts: &TopologyFacts) -> QosResult<ResolvedTopology> {
        let shortlinks = facts.shortlink_indices();
        let device = if facts.is_dualtor() {
            facts.lower_tor_index.ok_or_else(|| {
                QosError::params("dual ToR testbed does not name its lower ToR")
            })?
        } else if !facts.class.is_t0() && !facts.class.is_t1() && !shortlinks.is_empty() {
            *shortlinks.choose(&mut self.rng).unwrap_or(&0)
        } else {
            0
        };
        Ok(ResolvedTopology::same_device(device, 0, 0))
    }

    fn select_single_dut_multi_asic(
        &mut self,
        facts: &TopologyFacts,
    ) -> QosResult<ResolvedTopology> {
        if facts.class.is_t0() || facts.devices[0].is_mellanox {
            return Err(QosError::unsupported(
                "single_dut_multi_asic is not supported on T0 topologies",
            ));
        }
        let mut shortlinks = facts.shortlink_indices();
        let candidates = if !facts.class.is_t1() && !shortlinks.is_empty() {
            shortlinks.shuffle(&mut self.rng);
            shortlinks
        } else {
            (0..facts.devices.len()).collect()
        };
        let device = candidates
            .into_iter()
            .find(|&i| facts.devices[i].is_multi_asic)
            .ok_or_else(|| {
                QosError::unsupported("did not find any frontend node that is multi-asic")
            })?;
        Ok(ResolvedTopology::same_device(device, 0, 1))
    }

    fn select_multi_dut(
        criterion: SelectionCriterion,
        facts: &TopologyFacts,
    ) -> QosResult<ResolvedTopology> {
        if facts.class.is_t0() || facts.devices[0].is_mellanox {
            return Err(QosError::unsupported("multi-dut is not supported on T0 topologies"));
        }
        if facts.class.is_t1() {
            return Err(QosError::unsupported("multi-dut is not supported on T1 topologies"));
        }
        if facts.devices.len() < 2 {
            return Err(QosError::unsupported("fewer than 2 frontend nodes"));
        }

        let mut selected = ResolvedTopology::same_device(0, 0, 0);
        if criterion == SelectionCriterion::MultiDutShortlinkToShortlink {
            let shortlinks = facts.shortlink_indices();
            if shortlinks.len() < 2 {
                return Err(QosError::unsupported(format!(
                    "fewer than 2 shortlink frontend nodes for {}",
                    criterion
                )));
            }
            selected.src_device = shortlinks[0];
            selected.dst_device = shortlinks[1];
            return Ok(selected);
        }

        let (Some(first_long), Some(first_short)) =
            (facts.first_matching(true, 0), facts.first_matching(false, 0))
        else {
            return Err(QosError::unsupported(format!(
                "no longlink or no shortlink frontend node for {}",
                criterion
            )));
        };
        if criterion == SelectionCriterion::MultiDutLonglinkToShortlink {
            selected.src_device = first_long;
            selected.dst_device = first_short;
            selected.src_long_link = true;
        } else {
            selected.src_device = first_short;
            selected.dst_device = first_long;
            selected.dst_long_link = true;
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn device(name: &str, multi_asic: bool, long_link: bool) -> DeviceLinkFacts {
        DeviceLinkFacts {
            hostname: name.to_string(),
            is_multi_asic: multi_asic,
            is_mellanox: false,
            long_link,
        }
    }

    fn facts(name: &str, class: TopologyClass, devices: Vec<DeviceLinkFacts>) -> TopologyFacts {
        TopologyFacts {
            topology_name: name.to_string(),
            class,
            devices,
            lower_tor_index: None,
        }
    }

    #[test]
    fn test_criterion_round_trip() {
        for c in SelectionCriterion::ALL {
            assert_eq!(c.as_str().parse::<SelectionCriterion>().unwrap(), c);
        }
        assert!("multi_asic".parse::<SelectionCriterion>().is_err());
    }

    #[test]
    fn test_single_asic_t1_uses_first_device() {
        let f = facts("t1-lag", TopologyClass::T1Like, vec![device("a", false, true), device("b", false, false)]);
        let sel = PortAsicSelector::seeded(1).select(SelectionCriterion::SingleAsic, &f).unwrap();
        assert_eq!(sel, ResolvedTopology::same_device(0, 0, 0));
    }

    #[test]
    fn test_single_asic_t2_picks_shortlink_device() {
        let f = facts(
            "t2",
            TopologyClass::T2Like,
            vec![device("a", true, true), device("b", true, false), device("c", true, true)],
        );
        for seed in 0..16 {
            let sel = PortAsicSelector::seeded(seed)
                .select(SelectionCriterion::SingleAsic, &f)
                .unwrap();
            assert_eq!(sel.src_device, 1);
            assert_eq!(sel.src_device, sel.dst_device);
        }
    }

    #[test]
    fn test_single_asic_dualtor_uses_lower_tor() {
        let mut f = facts("dualtor", TopologyClass::T0Like, vec![device("upper", false, false), device("lower", false, false)]);
        f.lower_tor_index = Some(1);
        let sel = PortAsicSelector::seeded(0).select(SelectionCriterion::SingleAsic, &f).unwrap();
        assert_eq!(sel.src_device, 1);
    }

    #[test]
    fn test_single_dut_multi_asic_on_t0_is_skip() {
        let f = facts("t0", TopologyClass::T0Like, vec![device("a", true, false)]);
        let err = PortAsicSelector::seeded(0)
            .select(SelectionCriterion::SingleDutMultiAsic, &f)
            .unwrap_err();
        assert!(err.is_skip());
    }

    #[test]
    fn test_single_dut_multi_asic_on_mellanox_is_skip() {
        let mut dut = device("a", true, false);
        dut.is_mellanox = true;
        let f = facts("t1-lag", TopologyClass::T1Like, vec![dut]);
        assert!(PortAsicSelector::seeded(0)
            .select(SelectionCriterion::SingleDutMultiAsic, &f)
            .unwrap_err()
            .is_skip());
    }

    #[test]
    fn test_single_dut_multi_asic_finds_multi_asic_device() {
        let f = facts("t1-lag", TopologyClass::T1Like, vec![device("a", false, false), device("b", true, false)]);
        let sel = PortAsicSelector::seeded(0)
            .select(SelectionCriterion::SingleDutMultiAsic, &f)
            .unwrap();
        assert_eq!(sel, ResolvedTopology::same_device(1, 0, 1));
    }

    #[test]
    fn test_single_dut_multi_asic_t2_only_considers_shortlink() {
        let f = facts("t2", TopologyClass::T2Like, vec![device("a", true, true), device("b", false, false)]);
        let err = PortAsicSelector::seeded(0)
            .select(SelectionCriterion::SingleDutMultiAsic, &f)
            .unwrap_err();
        assert!(err.is_skip());
    }

    #[test]
    fn test_multi_dut_requires_t2() {
        let two = vec![device("a", true, false), device("b", true, false)];
        for (name, class) in [("t0", TopologyClass::T0Like), ("t1-lag", TopologyClass::T1Like)] {
            let f = facts(name, class, two.clone());
            for c in [
                SelectionCriterion::MultiDutShortlinkToShortlink,
                SelectionCriterion::MultiDutLonglinkToShortlink,
            ] {
                assert!(PortAsicSelector::seeded(0).select(c, &f).unwrap_err().is_skip());
            }
        }
        let single = facts("t2", TopologyClass::T2Like, vec![device("a", true, false)]);
        assert!(PortAsicSelector::seeded(0)
            .select(SelectionCriterion::MultiDutShortlinkToShortlink, &single)
            .unwrap_err()
            .is_skip());
    }

    #[test]
    fn test_shortlink_to_shortlink_picks_first_two() {
        let f = facts(
            "t2",
            TopologyClass::T2Like,
            vec![device("a", true, true), device("b", true, false), device("c", true, false), device("d", true, false)],
        );
        let sel = PortAsicSelector::seeded(0)
            .select(SelectionCriterion::MultiDutShortlinkToShortlink, &f)
            .unwrap();
        assert_eq!((sel.src_device, sel.dst_device), (1, 2));
        assert!(!sel.src_long_link && !sel.dst_long_link);
    }

    #[test]
    fn test_long_and_short_link_pairs() {
        let f = facts(
            "t2",
            TopologyClass::T2Like,
            vec![device("a", true, false), device("b", true, true)],
        );
        let l2s = PortAsicSelector::seeded(0)
            .select(SelectionCriterion::MultiDutLonglinkToShortlink, &f)
            .unwrap();
        assert_eq!((l2s.src_device, l2s.dst_device), (1, 0));
        assert!(l2s.src_long_link && !l2s.dst_long_link);

        let s2l = PortAsicSelector::seeded(0)
            .select(SelectionCriterion::MultiDutShortlinkToLonglink, &f)
            .unwrap();
        assert_eq!((s2l.src_device, s2l.dst_device), (0, 1));
        assert!(!s2l.src_long_link && s2l.dst_long_link);

        let all_short = facts("t2", TopologyClass::T2Like, vec![device("a", true, false), device("b", true, false)]);
        assert!(PortAsicSelector::seeded(0)
            .select(SelectionCriterion::MultiDutLonglinkToShortlink, &all_short)
            .unwrap_err()
            .is_skip());
    }
}
