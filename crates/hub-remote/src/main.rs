//! Hub remote entry point.
//!
//! Wires together configuration, the Bluetooth adapter, the protocol session
//! and the keyboard, then runs the drive loop (or the probe subcommand).
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config() + CLI overrides + validate()
//!  └─ adapter (btleplug, or the simulated hub with --simulate)
//!  └─ ConnectionManager::connect()          -- bounded attempts
//!  └─ spawn_session()
//!       ├─ protocol task  (owns the transport)
//!       └─ bridge task    (pending reads -> SessionEvent)
//!  └─ drive:  TerminalKeys thread -> CommandDispatcher -> HubSession
//!     probe:  port information requests -> replies
//! ```
//!
//! Returning `Err` from `main` prints the error chain and exits with status 1.

use std::path::PathBuf;
use std::sync::Arc;
#[cfg(feature = "ble")]
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hub_core::{InformationKind, Port};
use hub_remote::application::dispatch_command::{CommandDispatcher, HubLink};
use hub_remote::infrastructure::keyboard::terminal::TerminalKeys;
use hub_remote::infrastructure::keyboard::KeySource;
use hub_remote::infrastructure::network::connection_manager::ConnectionManager;
use hub_remote::infrastructure::network::hub_session::{spawn_session, HubSession, SessionEvent};
use hub_remote::infrastructure::storage::config::{load_config, AppConfig, HubIdentity};
use hub_remote::infrastructure::transport::simulated::{SimulatedAdapter, SimulatedHub};
use hub_remote::infrastructure::transport::HubAdapter;
use hub_remote::runner::{self, ProbeRequest};

/// Keyboard remote control for a Bluetooth LE motor hub.
#[derive(Debug, Parser)]
#[command(name = "hub-remote", version, about)]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hub Bluetooth address, e.g. 90:84:2B:4C:84:8A.
    #[arg(long, env = "HUB_ADDRESS", global = true)]
    address: Option<String>,

    /// GATT characteristic UUID used for every frame.
    #[arg(long, env = "HUB_CHARACTERISTIC", global = true)]
    characteristic: Option<String>,

    /// Talk to an in-memory simulated hub instead of real hardware.
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Drive the vehicle from the keyboard (default).
    Drive,
    /// Query port information and print the hub's replies.
    Probe {
        /// Port to query.
        #[arg(long, default_value_t = 0)]
        port: u8,
        /// Information kind: name, raw, pct, si, symbol, mapping, internal, bias, capability, format.
        #[arg(long, default_value = "name")]
        kind: InformationKind,
        /// Also send a port input format setup for the kind.
        #[arg(long)]
        subscribe: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(address) = &cli.address {
        config.hub.address = address.clone();
    }
    if let Some(characteristic) = &cli.characteristic {
        config.hub.characteristic_uuid = characteristic.clone();
    }

    // Structured logging on stderr. `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("hub-remote starting");

    let identity = config.validate().context("invalid hub configuration")?;
    let adapter = open_adapter(&cli, &config, &identity).await?;

    let manager = ConnectionManager::new(config.connection_config());
    let transport = manager.connect(adapter.as_ref(), identity.address).await?;
    info!("Connected");

    let session_config = config.session_config(identity.characteristic);
    let reply_wait = session_config.reply_timeout
        + session_config
            .io_timeout
            .saturating_mul(session_config.retry.max_retries.saturating_add(1));
    let (session, mut events) = spawn_session(transport, session_config);

    let result = match cli.command.clone().unwrap_or(Command::Drive) {
        Command::Drive => run_drive(&config, &session, &mut events).await,
        Command::Probe {
            port,
            kind,
            subscribe,
        } => {
            let request = ProbeRequest {
                port: Port(port),
                kind,
                subscribe,
            };
            run_probe(&session, &mut events, request, reply_wait).await
        }
    };

    session.shutdown().await;
    info!("hub-remote stopped");
    result
}

async fn open_adapter(
    cli: &Cli,
    config: &AppConfig,
    identity: &HubIdentity,
) -> anyhow::Result<Box<dyn HubAdapter>> {
    if cli.simulate {
        info!("using the simulated hub");
        let hub = SimulatedHub::new(identity.characteristic);
        return Ok(Box::new(SimulatedAdapter::new(hub, 0)));
    }

    #[cfg(feature = "ble")]
    {
        use hub_remote::infrastructure::transport::btle::BtleAdapter;

        let scan_timeout = Duration::from_millis(config.connection.scan_timeout_ms);
        let adapter = BtleAdapter::open(config.hub.adapter.as_deref(), scan_timeout)
            .await
            .context("failed to open the Bluetooth adapter")?;
        Ok(Box::new(adapter))
    }

    #[cfg(not(feature = "ble"))]
    {
        let _ = config;
        anyhow::bail!("built without Bluetooth support; rebuild with `--features ble` or pass --simulate")
    }
}

async fn run_drive(
    config: &AppConfig,
    session: &HubSession,
    events: &mut mpsc::Receiver<SessionEvent>,
) -> anyhow::Result<()> {
    // Dropping `keyboard` restores the terminal mode.
    let keyboard = TerminalKeys::new();
    let mut keys = keyboard.start().context("failed to start keyboard input")?;

    let link: Arc<dyn HubLink> = Arc::new(session.clone());
    let mut dispatcher = CommandDispatcher::new(config.drive_settings(), link);
    info!("ready: w/s speed up/down, a/d steer, b brake, q quit");

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    let end = runner::drive(&mut dispatcher, &mut keys, events, ctrl_c).await?;
    info!("session ended ({end:?}) at speed {}", dispatcher.speed());
    Ok(())
}

async fn run_probe(
    session: &HubSession,
    events: &mut mpsc::Receiver<SessionEvent>,
    request: ProbeRequest,
    wait: std::time::Duration,
) -> anyhow::Result<()> {
    let replies = runner::probe(session, events, request, wait).await?;
    info!(
        "probe of {} ({}) finished with {} reply(ies)",
        request.port,
        request.kind,
        replies.len()
    );
    Ok(())
}
