//! Dual-ToR port discovery.
//!
//! With tunnel QoS remapping enabled, ports facing the other tier of a
//! dual-ToR pair use the extended `2-4` lossless PG/queue range. A leaf
//! router looks for `*T0` neighbors of type `ToRRouter`; a dual ToR looks
//! for `*T1` neighbors of type `LeafRouter`.

use crate::client::ConfigDbClient;
use crate::error::QosResult;
use crate::tables::{self, metadata_fields, neighbor_fields};
use sonic_qos_common::DbId;
use std::collections::BTreeSet;
use tracing::info;

/// Returns true if `SYSTEM_DEFAULTS|tunnel_qos_remap` is enabled.
pub async fn is_tunnel_qos_remap_enabled(client: &ConfigDbClient) -> QosResult<bool> {
    let key = DbId::ConfigDb.key(
        tables::CFG_SYSTEM_DEFAULTS_TABLE,
        &[tables::TUNNEL_QOS_REMAP_KEY],
    );
    Ok(client
        .get(DbId::ConfigDb, &key, neighbor_fields::STATUS)
        .await?
        .as_deref()
        == Some("enabled"))
}

/// Ports whose neighbor is the expected peer tier of a dual-ToR pair.
pub async fn fetch_dualtor_ports(client: &ConfigDbClient) -> QosResult<BTreeSet<String>> {
    let mut ports = BTreeSet::new();
    if !is_tunnel_qos_remap_enabled(client).await? {
        return Ok(ports);
    }

    let metadata_key =
        DbId::ConfigDb.key(tables::CFG_DEVICE_METADATA_TABLE, &[tables::LOCALHOST_KEY]);
    let device_type = client
        .get(DbId::ConfigDb, &metadata_key, metadata_fields::TYPE)
        .await?;
    let expected = match device_type.as_deref() {
        Some("LeafRouter") => Some(("ToRRouter", "T0")),
        Some("ToRRouter") => {
            let subtype = client
                .get(DbId::ConfigDb, &metadata_key, metadata_fields::SUBTYPE)
                .await?;
            (subtype.as_deref() == Some("DualToR")).then_some(("LeafRouter", "T1"))
        }
        _ => None,
    };
    let Some((neighbor_type, suffix)) = expected else {
        return Ok(ports);
    };

    let prefix = format!("{}|", tables::CFG_DEVICE_NEIGHBOR_TABLE);
    for key in client.keys(DbId::ConfigDb, &format!("{}*", prefix)).await? {
        let Some(neighbor) = client.get(DbId::ConfigDb, &key, neighbor_fields::NAME).await? else {
            continue;
        };
        if !neighbor.ends_with(suffix) {
            continue;
        }
        let meta_key = DbId::ConfigDb.key(tables::CFG_DEVICE_NEIGHBOR_METADATA_TABLE, &[&neighbor]);
        let peer_type = client
            .get(DbId::ConfigDb, &meta_key, neighbor_fields::TYPE)
            .await?;
        if peer_type.as_deref() == Some(neighbor_type) {
            if let Some(port) = key.strip_prefix(&prefix) {
                ports.insert(port.to_string());
            }
        }
    }

    info!(asic = %client.label(), ?ports, "Fetched dual ToR ports");
    Ok(ports)
}
