//! huddled - the Huddle chat broker
//!
//! This is the main entry point for the broker daemon.
//! It enters the working directory, optionally detaches, installs the
//! shutdown signal handlers, and runs the readiness loop.

use anyhow::{Context, Result};
use huddle::config::{ServerArgs, ServerConfig};
use huddle::server::Server;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

fn main() -> Result<()> {
    let args = ServerArgs::parse_args();

    std::fs::create_dir_all(&args.workdir)
        .with_context(|| format!("Failed to create {}", args.workdir.display()))?;

    // Opened before the chdir (relative paths) and before detaching
    let log_target = args.log_target();
    huddle::init_logging(args.debug, &log_target)
        .with_context(|| format!("Failed to open log target {log_target:?}"))?;

    std::env::set_current_dir(&args.workdir)
        .with_context(|| format!("Failed to enter {}", args.workdir.display()))?;

    if args.daemon {
        info!("Detaching from the terminal");
        daemonize()?;
    }

    // SIGPIPE is already ignored by the Rust runtime
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM, SIGHUP] {
        flag::register(signal, Arc::clone(&shutdown))
            .context("Failed to install signal handler")?;
    }

    let config = ServerConfig::from(&args);
    let mut server = Server::bind(config).context("Failed to start server")?;
    server.set_shutdown_handle(shutdown);

    info!(
        version = huddle::VERSION,
        socket = %server.socket_path().display(),
        "Huddle chat server ready"
    );

    server.run().context("Server stopped")?;

    info!("Server shutdown complete");
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn daemonize() -> Result<()> {
    nix::unistd::daemon(true, false).context("Failed to detach")
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn daemonize() -> Result<()> {
    anyhow::bail!("Daemon mode is not supported on this platform")
}
