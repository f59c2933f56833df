//! Devices under test and their ASIC instances.

use crate::facts::MinigraphFacts;
use serde::{Deserialize, Serialize};
use std::fmt;

/// ASIC vendor, derived from the device's `asic_type` fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Vendor {
    Mellanox,
    Broadcom,
    Cisco8000,
    Barefoot,
    Vs,
    Other(String),
}

impl Vendor {
    /// Parses the `asic_type` fact (`mellanox`, `broadcom`, `cisco-8000`, ...).
    pub fn from_asic_type(asic_type: &str) -> Self {
        match asic_type.to_ascii_lowercase().as_str() {
            "mellanox" => Vendor::Mellanox,
            "broadcom" => Vendor::Broadcom,
            "cisco-8000" => Vendor::Cisco8000,
            "barefoot" => Vendor::Barefoot,
            "vs" => Vendor::Vs,
            _ => Vendor::Other(asic_type.to_string()),
        }
    }

    pub fn is_mellanox(&self) -> bool {
        matches!(self, Vendor::Mellanox)
    }

    pub fn is_cisco(&self) -> bool {
        matches!(self, Vendor::Cisco8000)
    }

    pub fn is_broadcom(&self) -> bool {
        matches!(self, Vendor::Broadcom)
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Mellanox => write!(f, "mellanox"),
            Vendor::Broadcom => write!(f, "broadcom"),
            Vendor::Cisco8000 => write!(f, "cisco-8000"),
            Vendor::Barefoot => write!(f, "barefoot"),
            Vendor::Vs => write!(f, "vs"),
            Vendor::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Switch architecture class (`switch_type` in DEVICE_METADATA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchType {
    /// Regular single-pipeline switch.
    #[default]
    Npu,
    /// Virtual output queue chassis line card.
    Voq,
    /// Packet chassis line card.
    ChassisPacket,
    /// Fabric card.
    Fabric,
    #[serde(other)]
    Other,
}

/// Where to reach the Redis instance of one ASIC directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisEndpoint {
    pub host: String,
    #[serde(default = "RedisEndpoint::default_port")]
    pub port: u16,
}

impl RedisEndpoint {
    fn default_port() -> u16 {
        6379
    }
}

/// One forwarding-plane instance within a [`Device`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsicInstance {
    pub index: u32,
    /// Linux network namespace (`asic0`); absent on single-ASIC devices.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub redis: Option<RedisEndpoint>,
}

impl AsicInstance {
    pub fn new(index: u32, namespace: Option<String>) -> Self {
        Self {
            index,
            namespace,
            redis: None,
        }
    }

    /// Returns the container name of `service` for this ASIC.
    ///
    /// Per-ASIC containers carry the ASIC index as a suffix on multi-ASIC
    /// devices (`swss0`, `radv1`); single-ASIC devices use the bare name.
    pub fn docker_name(&self, service: &str) -> String {
        match self.namespace {
            Some(_) => format!("{}{}", service, self.index),
            None => service.to_string(),
        }
    }

    /// Returns the namespace, or `Asic<N>` when the ASIC has none.
    ///
    /// This is the second component of VOQ system-port keys.
    pub fn namespace_or_asic(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => ns.clone(),
            _ => format!("Asic{}", self.index),
        }
    }
}

fn default_asics() -> Vec<AsicInstance> {
    vec![AsicInstance::new(0, None)]
}

/// A chassis member running one or more ASIC instances.
///
/// Devices are discovered once per session from the inventory and are
/// immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub hostname: String,
    /// Vendor tag (`asic_type` fact).
    pub asic_type: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub hwsku: String,
    #[serde(default)]
    pub switch_type: SwitchType,
    /// Finer ASIC classification (`broadcom-dnx`).
    #[serde(default)]
    pub platform_asic: Option<String>,
    #[serde(default)]
    pub os_version: String,
    #[serde(default = "default_asics")]
    pub asics: Vec<AsicInstance>,
    #[serde(default)]
    pub facts: MinigraphFacts,
}

impl Device {
    pub fn vendor(&self) -> Vendor {
        Vendor::from_asic_type(&self.asic_type)
    }

    pub fn is_multi_asic(&self) -> bool {
        self.asics.len() > 1
    }

    pub fn is_voq(&self) -> bool {
        self.switch_type == SwitchType::Voq
    }

    /// Returns true on Broadcom DNX (Jericho) line cards.
    pub fn is_dnx(&self) -> bool {
        self.platform_asic.as_deref() == Some("broadcom-dnx")
    }

    pub fn asic(&self, index: u32) -> Option<&AsicInstance> {
        self.asics.iter().find(|a| a.index == index)
    }
}
