//! qos-resolve entry point.
//!
//! Resolves one QoS test scenario against a testbed and prints the
//! parameter bundle as JSON. Scenarios that do not apply to the testbed
//! exit successfully after logging why.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sonic_qos_common::{CliStore, CommandRunner, ConfigStore, RedisConfig, RedisStore};
use sonic_qos_resolver::{
    load_testbed, DutHandles, HarnessOptions, QosParamFile, QosResolver, SelectionCriterion,
};
use sonic_qos_types::Testbed;

/// Resolve test ports and buffer thresholds for a SONiC QoS scenario
#[derive(Parser, Debug)]
#[command(name = "qos-resolve")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Testbed inventory (YAML)
    #[arg(short = 't', long)]
    testbed: PathBuf,

    /// QoS parameter file (qos.yml)
    #[arg(short = 'q', long)]
    qos_params: PathBuf,

    /// Harness options (YAML); defaults when absent
    #[arg(short = 'o', long)]
    options: Option<PathBuf>,

    /// Selection criterion
    #[arg(short = 'c', long, default_value = "single_asic", value_parser = parse_criterion)]
    criterion: SelectionCriterion,

    /// Seed for random choices, overriding the options file
    #[arg(long)]
    seed: Option<u64>,

    /// Print the flat traffic runner parameters instead of the full bundle
    #[arg(long)]
    ptf: bool,

    /// Log level when RUST_LOG is unset
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

fn parse_criterion(s: &str) -> Result<SelectionCriterion, String> {
    s.parse().map_err(|e: sonic_qos_resolver::QosError| e.to_string())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Name of this host, for telling local devices from remote ones.
fn local_hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// One command runner per device and one store per ASIC.
///
/// ASICs with a Redis endpoint are read directly; the rest through
/// `redis-cli` on the device's own shell.
async fn connect(testbed: &Testbed, options: &HarnessOptions) -> anyhow::Result<DutHandles> {
    let local_host = local_hostname();
    let mut handles = DutHandles::new();
    for device in &testbed.devices {
        let shell = options.device_shell(&device.hostname, &local_host)?;
        info!(
            host = %device.hostname,
            via = shell.prefix().unwrap_or("local"),
            "Device shell"
        );
        let runner: Arc<dyn CommandRunner> = Arc::new(shell);
        handles.insert_runner(&device.hostname, runner.clone());
        for asic in &device.asics {
            let store: Arc<dyn ConfigStore> = match &asic.redis {
                Some(endpoint) => {
                    let label = format!("{}/asic{}", device.hostname, asic.index);
                    let config = RedisConfig::new(endpoint.host.clone(), endpoint.port);
                    Arc::new(
                        RedisStore::connect(label, &config)
                            .await
                            .with_context(|| format!("connecting to {}:{}", endpoint.host, endpoint.port))?,
                    )
                }
                None => Arc::new(CliStore::new(runner.clone(), asic.namespace.clone())),
            };
            handles.insert_asic(&device.hostname, asic.index, store);
        }
    }
    Ok(handles)
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let testbed = load_testbed(&args.testbed)
        .with_context(|| format!("loading testbed {}", args.testbed.display()))?;
    let params = QosParamFile::load(&args.qos_params)
        .with_context(|| format!("loading {}", args.qos_params.display()))?;
    let mut options = match &args.options {
        Some(path) => HarnessOptions::load_or_default(path)?,
        None => HarnessOptions::default(),
    };
    if args.seed.is_some() {
        options.rng_seed = args.seed;
    }
    options.validate()?;

    info!(
        topology = %testbed.topology.name,
        devices = testbed.devices.len(),
        criterion = %args.criterion,
        "Resolving scenario"
    );
    let handles = connect(&testbed, &options).await?;
    let mut resolver = QosResolver::new(testbed, params, options, handles);

    let bundle = match resolver.resolve_scenario(args.criterion).await {
        Ok(bundle) => bundle,
        Err(e) if e.is_skip() => {
            warn!("Skipping {}: {}", args.criterion, e);
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e.into()),
    };

    let output = if args.ptf {
        serde_json::to_string_pretty(&bundle.to_ptf_params()?)?
    } else {
        serde_json::to_string_pretty(&bundle)?
    };
    println!("{}", output);
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("qos-resolve failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
