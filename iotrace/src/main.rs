mod init;

use anyhow::Context as _;
use clap::Parser;
use iotrace::control::{Controller, DEFAULT_MAX_EVENTS};
use iotrace::ingest::Ingestor;
use iotrace::registry::Registry;
use iotrace::resolve::SysfsResolver;
use iotrace::server;
use log::{error, info};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Keeps a bounded log of the I/O done on selected files.
#[derive(Debug, Parser)]
#[command(name = "iotrace", version)]
struct Args {
    /// Control socket (line commands: add, remove, start, stop, reset, timereset, status, log, list)
    #[arg(long, env = "IOTRACE_CONTROL_SOCKET", default_value = "/run/iotrace/control.sock")]
    control_socket: PathBuf,

    /// Socket receiving binary I/O event frames from instrumentation
    #[arg(long, env = "IOTRACE_EVENT_SOCKET", default_value = "/run/iotrace/events.sock")]
    event_socket: PathBuf,

    /// Events kept per file when `add` gives no count
    #[arg(
        long,
        env = "IOTRACE_MAX_EVENTS",
        default_value_t = DEFAULT_MAX_EVENTS as u32,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    max_events: u32,

    /// sysfs mount point used to name block devices
    #[arg(long, default_value = "/sys")]
    sysfs_root: PathBuf,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "IOTRACE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init::setup_logging();
    init::setup_metrics(args.metrics_addr)?;

    let registry = Arc::new(Registry::new());
    let resolver = Arc::new(SysfsResolver::with_sysfs_root(&args.sysfs_root));
    let controller = Arc::new(Controller::new(
        Arc::clone(&registry),
        Arc::clone(&resolver),
        args.max_events as usize,
    ));
    let ingestor = Arc::new(Ingestor::new(Arc::clone(&registry), resolver));

    let control = server::bind(&args.control_socket).context("control socket")?;
    let events = server::bind(&args.event_socket).context("event socket")?;
    info!(
        "listening: control {}, events {} (default log size {})",
        args.control_socket.display(),
        args.event_socket.display(),
        args.max_events
    );

    let result = tokio::select! {
        res = server::serve_control(control, controller) => res,
        res = server::serve_events(events, ingestor) => res,
        _ = server::shutdown_signal() => Ok(()),
    };
    if let Err(err) = &result {
        error!("{err:#}");
    }

    info!("cleanup: stopped monitoring {} files", registry.teardown());
    for path in [&args.control_socket, &args.event_socket] {
        if let Err(err) = std::fs::remove_file(path) {
            error!("failed to remove {}: {err}", path.display());
        }
    }

    result
}
