//! Command-line interface for IQMESH network operations.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iqmesh_dpa::DpaService;
use iqmesh_services::{
    FrcResponseTimeParams, NetworkOperation, NetworkService, OperationRequest, RestoreParams,
    ServiceConfig, TestRfParams,
};
use iqmesh_testing::{NetworkSpec, SimulatedNetwork};

/// Run one network operation against a simulated IQMESH network.
#[derive(Parser, Debug)]
#[command(name = "iqmesh")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Network description (TOML).
    #[arg(short, long)]
    network: PathBuf,

    /// Service configuration (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Attach the transaction trail to the result.
    #[arg(short, long)]
    verbose: bool,

    /// Extra attempts per transaction.
    #[arg(short, long)]
    repeat: Option<u8>,

    /// Message id echoed in the result.
    #[arg(long)]
    msg_id: Option<String>,

    /// Operation to run.
    #[command(subcommand)]
    command: Command,
}

/// Available operations.
#[derive(Subcommand, Debug)]
enum Command {
    /// Ping every bonded node.
    Ping {
        /// Hardware profile filter.
        #[arg(long, default_value = "0xffff", value_parser = parse_u16)]
        hwpid: u16,
    },
    /// Restart every bonded node.
    Restart {
        /// Hardware profile filter.
        #[arg(long, default_value = "0xffff", value_parser = parse_u16)]
        hwpid: u16,
    },
    /// Test RF signal at the coordinator (0) or every bonded node (255).
    TestRf {
        #[arg(long, default_value_t = 255)]
        device_addr: u16,
        #[arg(long)]
        rf_channel: u16,
        #[arg(long, default_value_t = 255)]
        rx_filter: u16,
        /// Measurement window in ms.
        #[arg(long, default_value_t = 360)]
        measurement_time: u32,
    },
    /// Read the transceiver configuration of one device.
    ReadConfig {
        #[arg(long, default_value_t = 0)]
        device_addr: u16,
        #[arg(long, default_value = "0xffff", value_parser = parse_u16)]
        hwpid: u16,
    },
    /// Repair coordinator MID records that differ from the devices.
    ResolveMids,
    /// Make nodes holding a duplicated address drop their bond.
    ResolveDuplicates,
    /// Make nodes on the temporary address drop their bond.
    UnbondTemporary,
    /// Ask every bonded node for its FRC handler time.
    MeasureFrcTime {
        /// FRC command class, e.g. 0x90.
        #[arg(long, value_parser = parse_u8)]
        command: u8,
    },
    /// Restore the coordinator from a backup.
    Restore {
        #[arg(long, default_value_t = 0)]
        device_addr: u16,
        /// File holding the hex-encoded backup.
        #[arg(long)]
        backup: PathBuf,
        /// DPA version the backup was taken from, e.g. 0x0414.
        #[arg(long, value_parser = parse_u16)]
        dpa_version: u16,
        /// Leave the coordinator running after the restore.
        #[arg(long)]
        no_restart: bool,
    },
}

/// Decimal or `0x` prefixed hex.
fn parse_u16(value: &str) -> std::result::Result<u16, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid value {}: {}", value, e))
}

fn parse_u8(value: &str) -> std::result::Result<u8, String> {
    let parsed = parse_u16(value)?;
    u8::try_from(parsed).map_err(|_| format!("invalid value {}: above 255", value))
}

fn init_logging() {
    // Check if JSON logging is requested (for production/container environments)
    let json_logging = std::env::var("IQMESH_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("iqmesh=info"));

    // stdout carries the result
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn operation(command: Command) -> Result<NetworkOperation> {
    Ok(match command {
        Command::Ping { hwpid } => NetworkOperation::Ping { hwpid },
        Command::Restart { hwpid } => NetworkOperation::Restart { hwpid },
        Command::TestRf {
            device_addr,
            rf_channel,
            rx_filter,
            measurement_time,
        } => NetworkOperation::TestRfSignal(TestRfParams {
            device_addr,
            rf_channel,
            rx_filter,
            measurement_time_ms: measurement_time,
        }),
        Command::ReadConfig { device_addr, hwpid } => {
            NetworkOperation::ReadConfig { device_addr, hwpid }
        }
        Command::ResolveMids => NetworkOperation::ResolveInconsistentMids,
        Command::ResolveDuplicates => NetworkOperation::ResolveDuplicatedAddresses,
        Command::UnbondTemporary => NetworkOperation::UnbondTemporaryAddress,
        Command::MeasureFrcTime { command } => {
            NetworkOperation::MeasureFrcResponseTime(FrcResponseTimeParams { command })
        }
        Command::Restore {
            device_addr,
            backup,
            dpa_version,
            no_restart,
        } => {
            let backup = std::fs::read_to_string(&backup)
                .with_context(|| format!("Failed to read backup {}", backup.display()))?;
            NetworkOperation::Restore(RestoreParams {
                device_addr,
                backup: backup.trim().to_string(),
                dpa_version,
                restart_coordinator: !no_restart,
            })
        }
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging();

    let spec = NetworkSpec::load(&args.network)
        .with_context(|| format!("Failed to load network {}", args.network.display()))?;
    tracing::info!(
        path = %args.network.display(),
        nodes = spec.nodes.len(),
        dpa_version = %format!("{:04x}", spec.dpa_version),
        "Network loaded"
    );
    let config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    }
    .with_env_overrides();

    let network = Arc::new(SimulatedNetwork::new(spec)?);
    let dpa = Arc::new(DpaService::new(network, config.dpa.clone()));
    let service = NetworkService::new(dpa, config);

    let mut request = OperationRequest::new(operation(args.command)?);
    request.msg_id = args.msg_id;
    request.repeat = args.repeat;
    request.verbose = args.verbose;

    let result = service.execute(request).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
