//! Harness options and input files.
//!
//! Three inputs drive a resolution run: the testbed inventory, the per-vendor
//! QoS parameter file (`qos.yml`), and optional harness options overriding
//! port choice and randomness. All are YAML.

use crate::error::{QosError, QosResult};
use serde::{Deserialize, Serialize};
use sonic_qos_common::{HarnessError, LocalShell, DEFAULT_MAX_WORKERS};
use sonic_qos_types::Testbed;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Knobs a test run may set on top of the testbed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessOptions {
    /// Source port ids, replacing the default choice.
    #[serde(default)]
    pub src_ports: Option<Vec<usize>>,

    /// Destination port ids, replacing the default choice.
    #[serde(default)]
    pub dst_ports: Option<Vec<usize>>,

    /// Restrict test ports to dual-ToR facing ports.
    #[serde(default)]
    pub dual_tor: bool,

    /// Seed for every random choice; entropy when unset.
    #[serde(default)]
    pub rng_seed: Option<u64>,

    /// Concurrency of per-device setup and teardown.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Dual-ToR facing port names, when discovered out of band.
    #[serde(default)]
    pub dual_tor_ports: Option<BTreeSet<String>>,

    /// Name of the host the harness runs on; detected when unset.
    #[serde(default)]
    pub local_host: Option<String>,

    /// Command prefix reaching each remote device, keyed by hostname,
    /// e.g. `ssh -o BatchMode=yes admin@10.64.246.1`.
    #[serde(default)]
    pub remote_shells: BTreeMap<String, String>,
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            src_ports: None,
            dst_ports: None,
            dual_tor: false,
            rng_seed: None,
            max_workers: default_max_workers(),
            dual_tor_ports: None,
            local_host: None,
            remote_shells: BTreeMap::new(),
        }
    }
}

impl HarnessOptions {
    /// Loads options, falling back to defaults when `path` does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> QosResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Options file not found, using defaults");
            return Ok(Self::default());
        }
        let options: Self = load_yaml(path)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> QosResult<()> {
        if self.max_workers == 0 {
            return Err(QosError::params("max_workers must be at least 1"));
        }
        for (side, ports) in [("src_ports", &self.src_ports), ("dst_ports", &self.dst_ports)] {
            if matches!(ports, Some(p) if p.is_empty()) {
                return Err(QosError::port_selection(format!("{} is empty", side)));
            }
        }
        if let Some((host, _)) = self.remote_shells.iter().find(|(_, p)| p.trim().is_empty()) {
            return Err(QosError::params(format!("remote_shells.{} is empty", host)));
        }
        Ok(())
    }

    /// Shell that reaches `hostname` from `local_host`.
    ///
    /// A device is run locally only when it is the harness host. Any other
    /// device needs a `remote_shells` entry; a Redis endpoint alone does not
    /// cover the service and interface commands run on it.
    pub fn device_shell(&self, hostname: &str, local_host: &str) -> QosResult<LocalShell> {
        if let Some(prefix) = self.remote_shells.get(hostname) {
            return Ok(LocalShell::via(hostname, prefix.trim()));
        }
        let local = self.local_host.as_deref().unwrap_or(local_host);
        if hostname.eq_ignore_ascii_case(local) || hostname.eq_ignore_ascii_case("localhost") {
            return Ok(LocalShell::new(hostname));
        }
        Err(QosError::config_contract(
            hostname,
            format!("not the local host '{}' and has no remote_shells entry", local),
        ))
    }
}

/// `qos.yml`: `qos_params.<asic>.<topo-tag>` parameter trees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QosParamFile {
    #[serde(default)]
    pub qos_params: BTreeMap<String, serde_yaml::Value>,
}

impl QosParamFile {
    pub fn load(path: impl AsRef<Path>) -> QosResult<Self> {
        load_yaml(path.as_ref())
    }

    /// Parameter tree of one ASIC family or vendor section.
    pub fn section(&self, name: &str) -> Option<&serde_yaml::Value> {
        self.qos_params.get(name)
    }
}

pub fn load_testbed(path: impl AsRef<Path>) -> QosResult<Testbed> {
    load_yaml(path.as_ref())
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> QosResult<T> {
    let source = path.display().to_string();
    let content = fs::read_to_string(path)
        .map_err(|e| HarnessError::invalid_data(&source, format!("cannot read: {}", e)))?;
    serde_yaml::from_str(&content)
        .map_err(|e| QosError::from(HarnessError::invalid_data(&source, format!("cannot parse: {}", e))))
}
