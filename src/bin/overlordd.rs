//! Overlord daemon - real-time notification core
//!
//! Accepts push channels on a Unix socket, broadcasts periodic heartbeats
//! and published events to every subscriber, and watches peer heartbeats.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! overlordd start
//!
//! # Start with a custom config file and socket path
//! overlordd start --config ./overlord.toml --socket /run/overlord.sock
//!
//! # Check that a daemon answers on its socket
//! overlordd status
//!
//! # Enable debug logging
//! RUST_LOG=overlordd=debug overlordd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use overlord_protocol::{ClientMessage, DaemonMessage};
use overlordd::config::{LogConfig, OverlordConfig};
use overlordd::{Overlord, PushServer};

/// How long `status` waits for the daemon to answer
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Overlord daemon - push channels, broadcast and heartbeat monitoring
#[derive(Parser, Debug)]
#[command(name = "overlordd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon in the foreground
    Start,
    /// Ping a running daemon over its socket
    Status,
}

/// Settings that override the config file and environment.
#[derive(ClapArgs, Debug, Default)]
struct Overrides {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Unix socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Outbound heartbeat period in milliseconds
    #[arg(long, global = true)]
    heartbeat_period_ms: Option<u64>,

    /// Peer heartbeat timeout in milliseconds
    #[arg(long, global = true)]
    heartbeat_timeout_ms: Option<u64>,

    /// Disable the outbound heartbeat
    #[arg(long, global = true)]
    no_heartbeat: bool,
}

impl Overrides {
    /// Defaults, then config file, then environment, then these flags.
    fn resolve(&self) -> Result<OverlordConfig> {
        let mut config = OverlordConfig::discover(self.config.as_deref())
            .context("Failed to load configuration")?;
        config.apply_env();

        if let Some(socket) = &self.socket {
            config.socket_path = socket.clone();
        }
        if let Some(period) = self.heartbeat_period_ms {
            config.heartbeat.period_ms = period;
        }
        if let Some(timeout) = self.heartbeat_timeout_ms {
            config.heartbeat.timeout_ms = timeout;
        }
        if self.no_heartbeat {
            config.heartbeat.enabled = false;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.overrides.resolve()?;

    match args.command.unwrap_or(Command::Start) {
        Command::Start => run_daemon(config),
        Command::Status => {
            if let Err(e) = check_status(&config.socket_path) {
                eprintln!("Daemon is not responding: {e:#}");
                process::exit(1);
            }
            Ok(())
        }
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter when set.
fn init_logging(log: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.filter))
        .context("Invalid log filter")?;

    match &log.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: OverlordConfig) -> Result<()> {
    init_logging(&config.log)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        socket = %config.socket_path.display(),
        "Overlord daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let overlord = Overlord::start(config, cancel_token).context("Failed to start overlord")?;
    let server = PushServer::from_config(overlord.clone());

    let result = server.run().await;
    overlord.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Overlord daemon stopped");
    Ok(())
}

/// Pings the daemon and prints the round trip.
#[tokio::main(flavor = "current_thread")]
async fn check_status(socket_path: &Path) -> Result<()> {
    let started = tokio::time::Instant::now();

    tokio::time::timeout(STATUS_TIMEOUT, ping_daemon(socket_path))
        .await
        .context("Timed out waiting for the daemon")??;

    println!("Socket: {}", socket_path.display());
    println!("Round trip: {:?}", started.elapsed());
    Ok(())
}

/// Connects as a publisher and waits for the pong.
async fn ping_daemon(socket_path: &Path) -> Result<()> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    for request in [
        ClientMessage::connect_publisher(Some("overlordd-status".to_string())),
        ClientMessage::ping(1),
    ] {
        let mut frame = serde_json::to_string(&request)?;
        frame.push('\n');
        writer.write_all(frame.as_bytes()).await?;
    }
    writer.flush().await?;

    let mut connected = false;
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<DaemonMessage>(&line) {
            Ok(DaemonMessage::Connected {
                protocol_version, ..
            }) => {
                println!("Daemon is running (protocol {protocol_version})");
                connected = true;
            }
            Ok(DaemonMessage::Rejected { reason, .. }) => bail!("Handshake rejected: {reason}"),
            Ok(DaemonMessage::Pong { .. }) if connected => return Ok(()),
            _ => {}
        }
    }

    bail!("Connection closed before the daemon answered")
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
