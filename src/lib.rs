//! # Huddle - A Local Chat Broker over Unix-Domain Sockets
//!
//! Huddle lets the users of one host talk to each other. A single broker
//! process listens on a Unix-domain socket; every client connection is
//! identified by the peer credentials the kernel attaches to the socket, so
//! nobody has to log in and nobody can pretend to be someone else.
//!
//! ## Features
//!
//! - **Single-threaded**: one `poll(2)` loop owns every descriptor, so the
//!   connection registry needs no locks
//! - **Multiple sessions**: a user may connect from several terminals; join
//!   and leave notices fire only for the first and last of them
//! - **Plain text protocol**: newline-delimited lines, usable from `socat`
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           huddled                                │
//! │                                                                  │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │  Listener   │───>│  Multiplexer │───>│    ChatHandler      │  │
//! │  │ (Unix sock) │    │   (poll)     │    │  parse / dispatch   │  │
//! │  └─────────────┘    └──────┬───────┘    └─────────┬───────────┘  │
//! │                            │                      │              │
//! │                            ▼                      ▼              │
//! │                     ┌──────────────────────────────────────┐     │
//! │                     │            Registry                  │     │
//! │                     │  fd 4: alice  fd 5: bob  fd 7: alice │     │
//! │                     │  Connection + BufferedStream each    │     │
//! │                     └──────────────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use huddle::config::ServerConfig;
//! use huddle::server::Server;
//! use std::path::PathBuf;
//!
//! let config = ServerConfig {
//!     socket_path: PathBuf::from("/tmp/huddle.sock"),
//!     ..ServerConfig::default()
//! };
//! let server = Server::bind(config)?;
//! server.run()?;
//! # Ok::<(), huddle::server::ServerError>(())
//! ```
//!
//! ## Chat Commands
//!
//! - `/who` - list connected users
//! - `/msg <user> <message>` - private message (also `/priv`, `/query`)
//! - `/help`, `/version`, `/quit`
//!
//! Any other line is sent to everyone.

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stream;

use config::LogTarget;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/var/lib/huddle/sock";

/// Default working directory of the broker
pub const DEFAULT_STATE_DIR: &str = "/var/lib/huddle";

/// Version of Huddle
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Installs the global log subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the crate logs at `info`, or at
/// `debug` when `debug` is set. Fails only if a log file cannot be opened.
pub fn init_logging(debug: bool, target: &LogTarget) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("huddle=debug")
        } else {
            EnvFilter::new("huddle=info")
        }
    });
    let registry = tracing_subscriber::registry().with(filter);

    match target {
        LogTarget::Stderr => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(io::stderr),
            )
            .init(),
        LogTarget::File(path) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(open_log_file(path)?),
            )
            .init(),
    }

    Ok(())
}

/// Opens `path` for appending, creating it if needed.
pub fn open_log_file(path: &Path) -> io::Result<Mutex<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Mutex::new(file))
}
