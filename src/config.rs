//! Command-line configuration for the broker and the line client.

use crate::stream::{StreamConfig, DEFAULT_BUFFER_SIZE};
use crate::{DEFAULT_SOCKET_PATH, DEFAULT_STATE_DIR};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable consulted for the socket path by both binaries.
pub const SOCKET_ENV: &str = "HUDDLE_SOCKET";

/// Mode applied to the socket file after binding.
pub const DEFAULT_SOCKET_MODE: u32 = 0o660;

/// Log file name, inside the working directory, used when running detached.
pub const DAEMON_LOG_FILE: &str = "huddled.log";

/// How long one readiness wait may block before the shutdown flag is
/// rechecked.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Broker command line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Local chat broker over a Unix-domain socket")]
pub struct ServerArgs {
    /// Path of the listening socket
    #[arg(short, long, env = SOCKET_ENV, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Working directory, entered before the socket is bound
    #[arg(short, long, default_value = DEFAULT_STATE_DIR)]
    pub workdir: PathBuf,

    /// Detach from the terminal and run in the background
    #[arg(short, long)]
    pub daemon: bool,

    /// Owning user of the socket file
    #[arg(short, long)]
    pub user: Option<String>,

    /// Owning group of the socket file
    #[arg(short, long)]
    pub group: Option<String>,

    /// Size of each connection's input and output buffer, in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Longest single readiness wait, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Append logs to this file instead of standard error
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl ServerArgs {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Where log lines go. A detached server has no standard error, so it
    /// logs to a file in its working directory unless told otherwise.
    pub fn log_target(&self) -> LogTarget {
        match &self.log_file {
            Some(path) => LogTarget::File(path.clone()),
            None if self.daemon => LogTarget::File(self.workdir.join(DAEMON_LOG_FILE)),
            None => LogTarget::Stderr,
        }
    }
}

/// Destination of the log subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Appended to, created if missing
    File(PathBuf),
}

/// Line client command line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Line-mode client for the huddle chat broker")]
pub struct ClientArgs {
    /// Path of the server socket
    #[arg(short, long, env = SOCKET_ENV, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl ClientArgs {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Everything the library needs to run a server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    /// Mode bits applied to the socket file
    pub socket_mode: u32,
    pub user: Option<String>,
    pub group: Option<String>,
    /// Per-connection buffering
    pub stream: StreamConfig,
    /// Upper bound on one readiness wait
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            socket_mode: DEFAULT_SOCKET_MODE,
            user: None,
            group: None,
            stream: StreamConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl From<&ServerArgs> for ServerConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            socket_path: args.socket.clone(),
            user: args.user.clone(),
            group: args.group.clone(),
            stream: StreamConfig {
                capacity: args.buffer_size,
                ..StreamConfig::default()
            },
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            ..Self::default()
        }
    }
}
