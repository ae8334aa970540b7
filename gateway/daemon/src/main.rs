//! Fluxgate Daemon - Streaming Gateway Server
//!
//! Main entry point for the fluxgate daemon. Clients connect over a Unix
//! socket and multiplex chat and media generation requests through the
//! gateway; engines are resolved from the configured catalog.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (daemonizes, socket at $XDG_RUNTIME_DIR/fluxgate/gateway.sock)
//! fluxgate-daemon
//!
//! # Stay in the terminal
//! fluxgate-daemon --foreground
//!
//! # Custom socket path
//! fluxgate-daemon --socket-path /tmp/my-gateway.sock
//!
//! # With config file
//! fluxgate-daemon --config /etc/fluxgate/gateway.toml
//!
//! # Verbose logging
//! RUST_LOG=debug fluxgate-daemon --foreground
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown (notifies clients, removes the
//!   PID file and socket)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use fluxgate_core::config::{default_config_path, load_config_from_path, ConfigOverrides};
use fluxgate_core::transport::{unix_socket, TransportKind, UnixSocketServer};
use fluxgate_core::{
    Dispatcher, EchoEngine, EngineCatalog, Gateway, GatewayConfig, SessionRegistry, ShutdownSignal,
};

/// Inter-fragment delay for the echo engines, large enough that streaming is
/// visible to a human watching a client
const ECHO_FRAGMENT_DELAY: Duration = Duration::from_millis(25);

/// Fluxgate Daemon - Streaming gateway for chat and media generation
#[derive(Parser, Debug)]
#[command(name = "fluxgate-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Unix socket path for client connections
    #[arg(short = 's', long, env = "FLUXGATE_SOCKET", value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Path of the TOML configuration file
    #[arg(short = 'c', long, env = "FLUXGATE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stay attached to the terminal instead of forking to the background
    #[arg(short = 'f', long)]
    foreground: bool,

    /// PID file path
    #[arg(long, env = "FLUXGATE_PID_FILE", value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Log verbosity (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "FLUXGATE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Default PID file location: `$XDG_RUNTIME_DIR/fluxgate/gateway.pid`, with
/// a per-user /tmp directory as the fallback
fn default_pid_path() -> PathBuf {
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(dir) => Path::new(&dir).join("fluxgate").join("gateway.pid"),
        Err(_) => {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/fluxgate-{uid}")).join("gateway.pid")
        }
    }
}

fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }

    let pid = std::process::id();
    fs::write(path, format!("{pid}\n"))
        .with_context(|| format!("cannot write PID file {}", path.display()))?;

    info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

fn remove_pid_file(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "PID file removed"),
        Err(e) => warn!(error = %e, path = %path.display(), "Could not remove PID file"),
    }
}

/// Refuse to start while a previous daemon still owns the PID file
fn check_existing_daemon(pid_path: &Path) -> Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if !pid_path.exists() {
        return Ok(());
    }

    let contents = fs::read_to_string(pid_path)
        .with_context(|| format!("cannot read PID file {}", pid_path.display()))?;
    let pid: i32 = contents
        .trim()
        .parse()
        .with_context(|| format!("PID file {} holds no PID", pid_path.display()))?;

    // Signal-less kill probes process existence without touching it.
    if kill(Pid::from_raw(pid), None).is_ok() {
        anyhow::bail!(
            "another fluxgate-daemon is already running (PID {pid}); \
             stop it or delete {} if it is stale",
            pid_path.display()
        );
    }

    warn!(pid, "Removing stale PID file");
    fs::remove_file(pid_path)
        .with_context(|| format!("cannot remove stale PID file {}", pid_path.display()))?;
    Ok(())
}

fn init_logging(level: &str) {
    let default_filter = format!("fluxgate_daemon={level},fluxgate_core={level}");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Detach from the terminal with the classic double fork
///
/// Must run before the tokio runtime is built; forking a process that has
/// already spawned runtime threads leaves the child with dead locks.
fn daemonize() -> Result<()> {
    use nix::unistd::setsid;

    fork_into_background("first")?;
    setsid().context("setsid failed")?;
    // The new session leader could still acquire a controlling terminal;
    // the second fork gives that up for good.
    fork_into_background("second")?;

    // stdio stays open; logs keep flowing to whatever the parent attached.
    Ok(())
}

/// Fork and continue in the child; the parent half exits on the spot
fn fork_into_background(stage: &str) -> Result<()> {
    use nix::unistd::{fork, ForkResult};

    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => Ok(()),
        Err(e) => anyhow::bail!("{stage} fork failed: {e}"),
    }
}

/// Build the engine catalog from configuration
///
/// Every configured kind is served by the echo reference engine; real
/// engines are registered by embedders through the library API.
fn build_catalog(config: &GatewayConfig) -> EngineCatalog {
    let mut catalog = EngineCatalog::new();
    for entry in &config.engines {
        let engine = EchoEngine::new(entry.kind.clone()).with_delay(ECHO_FRAGMENT_DELAY);
        catalog.register(entry.descriptor(), Arc::new(engine));
    }
    catalog
}

/// Resolve when SIGTERM or SIGINT arrives, naming the one that did
async fn await_termination() -> &'static str {
    let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler install failed");
    let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler install failed");

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

/// Serve the gateway until a shutdown signal arrives
async fn run(config: GatewayConfig, socket_path: PathBuf) -> Result<()> {
    let catalog = build_catalog(&config);
    for (kind, healthy) in catalog.health_report().await {
        info!(kind = %kind, healthy, "Engine registered");
    }

    let dispatcher = Dispatcher::new(
        SessionRegistry::new(),
        Arc::new(catalog),
        config.dispatcher.clone(),
    );
    let gateway =
        Gateway::new(dispatcher, config.liveness.clone()).with_settings(config.gateway_settings());

    let server = UnixSocketServer::new(socket_path);

    let (handle, shutdown) = ShutdownSignal::new();
    tokio::spawn(async move {
        let which = await_termination().await;
        info!(signal = which, "Shutdown requested");
        handle.shutdown();
    });

    info!("Gateway ready");
    gateway.run(server, shutdown).await?;
    Ok(())
}

/// The server removes its socket on clean shutdown; sweep up after the
/// other exits
fn remove_leftover_socket(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(error = %e, path = %path.display(), "Could not remove socket file");
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "Fluxgate daemon starting"
    );

    // Resolve configuration: file, then environment, then CLI overrides.
    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path)?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ref path) = args.socket_path {
        overrides = overrides.with_socket_path(path.clone());
    }
    overrides.apply(&mut config);
    config.validate()?;

    let socket_path = match &config.transport.kind {
        TransportKind::UnixSocket { path: Some(path) } => path.clone(),
        // The daemon always serves a socket, whatever the configured kind.
        _ => unix_socket::default_socket_path(),
    };
    let pid_path = args.pid_file.clone().unwrap_or_else(default_pid_path);

    info!(socket_path = %socket_path.display(), "Socket path");
    info!(pid_path = %pid_path.display(), "PID file path");
    if let Some(ref path) = config.config_file_path {
        info!(config_path = %path.display(), "Config file");
    }

    check_existing_daemon(&pid_path)?;

    // Forking after the runtime exists would strand its worker threads, so
    // the detach happens first.
    if !args.foreground {
        info!("Detaching to the background");
        daemonize()?;
        info!(pid = std::process::id(), "Running in the background");
    }

    write_pid_file(&pid_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    let outcome = runtime.block_on(run(config, socket_path.clone()));

    info!("Shutting down");
    remove_pid_file(&pid_path);
    remove_leftover_socket(&socket_path);

    match outcome {
        Ok(()) => {
            info!("Fluxgate daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
