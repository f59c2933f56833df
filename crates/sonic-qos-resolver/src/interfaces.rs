//! Active IP interface discovery from `show ip interface`.

use crate::error::QosResult;
use once_cell::sync::Lazy;
use regex::Regex;
use sonic_qos_common::CommandRunner;
use sonic_qos_types::{ActiveIpInterface, AsicInstance};
use std::collections::BTreeMap;
use tracing::debug;

static SHOW_IP_INTERFACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^ ]*) [ ]*([0-9\.]*)/[0-9]*  *[^ ]*  *[^ ]*  *([0-9\.]*)").unwrap()
});

/// Parses `show ip interface` output into interface -> addresses.
///
/// Lines that do not describe an IPv4 interface (headers, separators) are
/// ignored.
pub fn parse_ip_interfaces(output: &str) -> BTreeMap<String, ActiveIpInterface> {
    output
        .lines()
        .filter_map(|line| SHOW_IP_INTERFACE_RE.captures(line))
        .map(|caps| {
            (
                caps[1].to_string(),
                ActiveIpInterface {
                    addr: caps[2].to_string(),
                    peer_ipv4: caps[3].to_string(),
                },
            )
        })
        .collect()
}

pub fn show_ip_interface_command(asic: &AsicInstance) -> String {
    format!("show ip interface -n asic{} -d all", asic.index)
}

/// Runs `show ip interface` for `asic` and parses the result.
pub async fn discover_active_ip_interfaces(
    runner: &dyn CommandRunner,
    asic: &AsicInstance,
) -> QosResult<BTreeMap<String, ActiveIpInterface>> {
    let output = runner.run_or_fail(&show_ip_interface_command(asic)).await?;
    let interfaces = parse_ip_interfaces(&output);
    debug!(
        host = %runner.host(),
        asic = asic.index,
        count = interfaces.len(),
        "Discovered active IP interfaces"
    );
    Ok(interfaces)
}
