//! Quiescing control-plane services around a traffic run.
//!
//! Neighbor discovery, ARP refresh and BGP keepalives would otherwise inject
//! packets into the queues under test. Quiescing disables container
//! autorestart, turns LLDP off, stops `radvd` and `arp_update` inside their
//! per-ASIC containers, and shuts all BGP sessions. Restoring reverses it.
//!
//! On a dual-ToR pair the mux feature is also disabled on both ToRs, the
//! upper ToR keeps its containers from restarting, and the lower ToR's
//! `write_standby.py` is swapped for an empty script so nothing toggles the
//! mux cables while traffic runs.

use crate::error::{QosError, QosResult};
use sonic_qos_common::{run_bounded, CommandRunner, HarnessError};
use sonic_qos_types::AsicInstance;
use std::sync::Arc;
use tracing::{info, warn};

/// Features whose containers must not be restarted mid-test.
pub const AUTORESTART_FEATURES: &[&str] = &["lldp", "bgp", "syncd", "swss"];

/// `(container service, supervisord program)` pairs stopped per ASIC.
pub const QUIESCED_PROGRAMS: &[(&str, &str)] = &[("radv", "radvd"), ("swss", "arp_update")];

/// Script the lower ToR runs to force its mux ports to standby.
pub const WRITE_STANDBY: &str = "/usr/local/bin/write_standby.py";

/// Where [`WRITE_STANDBY`] is kept while stubbed out.
pub const WRITE_STANDBY_BACKUP: &str = "/usr/local/bin/write_standby.py.bkup";

/// Runners of the two ToRs of a dual-ToR testbed.
#[derive(Clone)]
pub struct DualTorPair {
    pub upper: Arc<dyn CommandRunner>,
    pub lower: Arc<dyn CommandRunner>,
}

impl DualTorPair {
    pub fn new(upper: Arc<dyn CommandRunner>, lower: Arc<dyn CommandRunner>) -> Self {
        Self { upper, lower }
    }

    fn both(&self) -> [&dyn CommandRunner; 2] {
        [self.upper.as_ref(), self.lower.as_ref()]
    }
}

/// One ASIC whose services are quiesced, with the runner of its host.
#[derive(Clone)]
pub struct ServiceTarget {
    pub runner: Arc<dyn CommandRunner>,
    pub asic: AsicInstance,
}

impl ServiceTarget {
    pub fn new(runner: Arc<dyn CommandRunner>, asic: AsicInstance) -> Self {
        Self { runner, asic }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Quiesce,
    Restore,
}

impl Phase {
    fn feature_state(self) -> &'static str {
        match self {
            Phase::Quiesce => "disabled",
            Phase::Restore => "enabled",
        }
    }

    fn supervisor_action(self) -> &'static str {
        match self {
            Phase::Quiesce => "stop",
            Phase::Restore => "start",
        }
    }

    fn bgp_command(self) -> &'static str {
        match self {
            Phase::Quiesce => "sudo config bgp shutdown all",
            Phase::Restore => "sudo config bgp start all",
        }
    }
}

/// Runs the quiesce and restore sequences.
#[derive(Clone)]
pub struct ServiceController {
    max_workers: usize,
    dual_tor: Option<DualTorPair>,
}

impl ServiceController {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            dual_tor: None,
        }
    }

    /// Also handles the mux side of a dual-ToR pair.
    pub fn with_dual_tor(mut self, pair: DualTorPair) -> Self {
        self.dual_tor = Some(pair);
        self
    }

    /// Quiesces every target in order.
    ///
    /// A lower ToR without `write_standby.py` cannot be pinned to standby,
    /// which makes the scenario unsupported.
    pub async fn quiesce(&self, targets: &[ServiceTarget]) -> QosResult<()> {
        if let Some(pair) = &self.dual_tor {
            stub_write_standby(pair.lower.as_ref()).await?;
            for runner in pair.both() {
                run_tolerant(runner, "sudo config feature state mux disabled").await;
            }
            set_autorestart(pair.upper.as_ref(), Phase::Quiesce).await;
        }
        for target in targets {
            set_autorestart(target.runner.as_ref(), Phase::Quiesce).await;
            self.run_phase(target, Phase::Quiesce).await?;
        }
        Ok(())
    }

    /// Restores every target; all of them are attempted before the first
    /// failure is returned.
    pub async fn restore(&self, targets: &[ServiceTarget]) -> QosResult<()> {
        let mut first_error = None;
        for target in targets {
            if let Err(e) = self.run_phase(target, Phase::Restore).await {
                warn!(host = %target.runner.host(), error = %e, "Failed to restore services");
                first_error.get_or_insert(e);
            }
        }
        if let Some(pair) = &self.dual_tor {
            if let Err(e) = restore_write_standby(pair.lower.as_ref()).await {
                warn!(host = %pair.lower.host(), error = %e, "Failed to restore write_standby.py");
                first_error.get_or_insert(e);
            }
            for runner in pair.both() {
                run_tolerant(runner, "sudo config feature state mux enabled").await;
            }
            info!(
                upper = %pair.upper.host(),
                lower = %pair.lower.host(),
                "Re-enabled mux on dual ToR"
            );
        }
        for target in targets {
            set_autorestart(target.runner.as_ref(), Phase::Restore).await;
        }
        if let Some(pair) = &self.dual_tor {
            set_autorestart(pair.upper.as_ref(), Phase::Restore).await;
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_phase(&self, target: &ServiceTarget, phase: Phase) -> QosResult<()> {
        let runner = target.runner.as_ref();
        run_tolerant(
            runner,
            &format!("sudo config feature state lldp {}", phase.feature_state()),
        )
        .await;

        let units = QUIESCED_PROGRAMS
            .iter()
            .map(|(service, program)| {
                let runner = Arc::clone(&target.runner);
                let cmd = format!(
                    "docker exec {} supervisorctl {} {}",
                    target.asic.docker_name(service),
                    phase.supervisor_action(),
                    program
                );
                async move {
                    run_tolerant(runner.as_ref(), &cmd).await;
                    Ok::<(), HarnessError>(())
                }
            })
            .collect();
        run_bounded(self.max_workers, units).await?;

        runner.run_or_fail(phase.bgp_command()).await?;
        info!(
            host = %runner.host(),
            asic = target.asic.index,
            state = phase.feature_state(),
            "Updated control-plane services"
        );
        Ok(())
    }
}

async fn set_autorestart(runner: &dyn CommandRunner, phase: Phase) {
    for feature in AUTORESTART_FEATURES {
        run_tolerant(
            runner,
            &format!("sudo config feature autorestart {} {}", feature, phase.feature_state()),
        )
        .await;
    }
}

/// Moves `write_standby.py` aside and leaves an empty executable in its place.
async fn stub_write_standby(runner: &dyn CommandRunner) -> QosResult<()> {
    if !runner.run(&format!("ls {}", WRITE_STANDBY)).await?.success() {
        return Err(QosError::unsupported(format!(
            "{} not found on {}",
            WRITE_STANDBY,
            runner.host()
        )));
    }
    for cmd in [
        format!("sudo cp {} {}", WRITE_STANDBY, WRITE_STANDBY_BACKUP),
        format!("sudo rm {}", WRITE_STANDBY),
        format!("sudo touch {}", WRITE_STANDBY),
        format!("sudo chmod +x {}", WRITE_STANDBY),
    ] {
        runner.run_or_fail(&cmd).await?;
    }
    info!(host = %runner.host(), "Stubbed out write_standby.py");
    Ok(())
}

async fn restore_write_standby(runner: &dyn CommandRunner) -> QosResult<()> {
    if !runner.run(&format!("ls {}", WRITE_STANDBY_BACKUP)).await?.success() {
        return Err(QosError::unsupported(format!(
            "{} not found on {}",
            WRITE_STANDBY_BACKUP,
            runner.host()
        )));
    }
    for cmd in [
        format!("sudo cp {} {}", WRITE_STANDBY_BACKUP, WRITE_STANDBY),
        format!("sudo chmod +x {}", WRITE_STANDBY),
        format!("sudo rm {}", WRITE_STANDBY_BACKUP),
    ] {
        runner.run_or_fail(&cmd).await?;
    }
    Ok(())
}

/// Runs a command whose failure does not abort the sequence.
async fn run_tolerant(runner: &dyn CommandRunner, cmd: &str) {
    match runner.run(cmd).await {
        Ok(result) if result.success() => {}
        Ok(result) => warn!(
            host = %runner.host(),
            command = %cmd,
            exit_code = result.exit_code,
            "Command failed, continuing"
        ),
        Err(e) => warn!(host = %runner.host(), command = %cmd, error = %e, "Command failed, continuing"),
    }
}
