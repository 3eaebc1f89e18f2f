//! Server Module
//!
//! The broker process: a listening Unix-domain socket and the
//! single-threaded readiness loop that owns every connection.
//!
//! ## Lifecycle
//!
//! ```text
//! Server::bind ──> run ──┬──> run_once (poll, accept, dispatch, reap) ─┐
//!                        │          ▲                                  │
//!                        │          └──────────────────────────────────┘
//!                        │
//!                        └──> shutdown flag set: notify, close all,
//!                             remove the socket file
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use huddle::config::ServerConfig;
//! use huddle::server::Server;
//!
//! let server = Server::bind(ServerConfig::default())?;
//! let stop = server.shutdown_handle();
//! // hand `stop` to a signal handler, then:
//! server.run()?;
//! # Ok::<(), huddle::server::ServerError>(())
//! ```

pub mod listener;
pub mod multiplexer;

pub use listener::Listener;
pub use multiplexer::{Server, SHUTDOWN_NOTICE};

use std::io;
use std::path::PathBuf;

/// Failures that stop the server as a whole.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or configuring the listening socket failed
    #[error("Failed to bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A live server already answers on the socket path
    #[error("Another server is already listening on {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("Failed to set permissions on {}: {source}", path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to change ownership of {}: {source}", path.display())]
    Ownership {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    /// The passwd or group database could not be read
    #[error("Account lookup failed: {0}")]
    Lookup(#[source] nix::Error),

    #[error("No such user: {0}")]
    UnknownUser(String),

    #[error("No such group: {0}")]
    UnknownGroup(String),

    /// The readiness wait failed for a reason other than an interrupt
    #[error("Readiness wait failed: {0}")]
    Poll(#[source] nix::Error),
}
