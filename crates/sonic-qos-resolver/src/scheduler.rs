//! Scheduler profile lookup and weighted-round-robin overrides.
//!
//! Queue scheduler bindings always live in CONFIG_DB, whatever the buffer
//! model. WRR scenarios temporarily rewrite the weights of the lossless and
//! lossy scheduler profiles on every involved ASIC and put the baseline
//! back once the traffic run is over.

use crate::client::{qualify_reference, AsicContext, ConfigDbClient};
use crate::error::{QosError, QosResult};
use crate::tables::{self, scheduler_fields};
use serde::Serialize;
use sonic_qos_common::DbId;
use std::sync::Arc;
use tracing::{info, warn};

/// Queue carrying lossless test traffic.
pub const LOSSLESS_QUEUE: &str = "3";
/// Queue carrying lossy test traffic.
pub const LOSSY_QUEUE: &str = "0";

/// Scheduler profile bound to a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerProfile {
    /// Full key (`SCHEDULER|scheduler.0`).
    #[serde(rename = "schedProfile")]
    pub profile: String,
    /// DWRR weight; strict-priority schedulers carry none.
    #[serde(rename = "schedWeight", skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

/// Resolves the scheduler bound to `port`/`queue`.
pub async fn resolve_scheduler(
    client: &ConfigDbClient,
    ctx: AsicContext<'_>,
    port: &str,
    queue: &str,
) -> QosResult<SchedulerProfile> {
    let sep = DbId::ConfigDb.separator();
    let port_key = ctx.queue_port_key(sep, port);
    let binding = DbId::ConfigDb.key(tables::CFG_QUEUE_TABLE, &[&port_key, queue]);

    let value = client
        .get(DbId::ConfigDb, &binding, scheduler_fields::SCHEDULER)
        .await?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| QosError::config_contract(&binding, "no scheduler bound"))?;
    let profile = qualify_reference(
        &value,
        &format!("{}{}", tables::CFG_SCHEDULER_TABLE, sep),
    );

    let weight = match client
        .get(DbId::ConfigDb, &profile, scheduler_fields::WEIGHT)
        .await?
    {
        Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| {
            QosError::config_contract(&profile, format!("weight '{}' is not an integer", raw))
        })?),
        None => None,
    };

    info!(queue = %binding, profile = %profile, ?weight, "Resolved scheduler profile");
    Ok(SchedulerProfile { profile, weight })
}

/// Test weights of a WRR scenario (`wrr_chg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WrrWeights {
    pub lossless: u32,
    pub lossy: u32,
}

/// Baseline lossless/lossy schedulers, to override and then restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrrOverride {
    pub lossless: SchedulerProfile,
    pub lossy: SchedulerProfile,
}

impl WrrOverride {
    pub fn new(lossless: SchedulerProfile, lossy: SchedulerProfile) -> Self {
        Self { lossless, lossy }
    }

    /// Writes the test weights on every ASIC in `clients`.
    pub async fn apply(&self, clients: &[Arc<ConfigDbClient>], weights: WrrWeights) -> QosResult<()> {
        for client in clients {
            write_weight(client, &self.lossless.profile, weights.lossless).await?;
            write_weight(client, &self.lossy.profile, weights.lossy).await?;
        }
        info!(?weights, asics = clients.len(), "Applied WRR test weights");
        Ok(())
    }

    /// Puts the baseline weights back on every ASIC in `clients`.
    ///
    /// Every ASIC is attempted; the first failure is returned afterwards.
    pub async fn restore(&self, clients: &[Arc<ConfigDbClient>]) -> QosResult<()> {
        let mut first_error = None;
        for client in clients {
            for sched in [&self.lossless, &self.lossy] {
                let Some(weight) = sched.weight else {
                    continue;
                };
                if let Err(e) = write_weight(client, &sched.profile, weight).await {
                    warn!(asic = %client.label(), profile = %sched.profile, error = %e, "Failed to restore weight");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn write_weight(client: &ConfigDbClient, profile: &str, weight: u32) -> QosResult<()> {
    client
        .hset(DbId::ConfigDb, profile, scheduler_fields::WEIGHT, &weight.to_string())
        .await
}
