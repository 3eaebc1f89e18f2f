//! Connection Handler Module
//!
//! A `Connection` binds one `BufferedStream` to the session state the chat
//! protocol keeps per client: the resolved username and whether the protocol
//! has asked for the connection to be closed.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Multiplexer accepts a descriptor
//!        │
//!        ▼
//! 2. Connection created, registered, on_accept resolves the username
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │  on_readable (per readiness) │
//!    │                              │
//!    │  read_line ─> dispatch ─┐    │
//!    │      ▲                  │    │
//!    │      └──────────────────┘    │
//!    │  until NotReady              │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. EOF, /quit, or a fatal stream error
//!        │
//!        ▼
//! 5. Multiplexer removes it, on_close announces departure if last
//! ```

use bytes::BytesMut;
use crate::protocol::Reply;
use crate::stream::{BufferedStream, FlushStatus, ReadOutcome, Socket, StreamError};
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies a connection by its descriptor number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub RawFd);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total lines dispatched to the chat protocol
    pub lines_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn line_processed(&self) {
        self.lines_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: u64) {
        self.bytes_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: u64) {
        self.bytes_written.fetch_add(count, Ordering::Relaxed);
    }
}

/// One accepted client.
pub struct Connection<S> {
    id: ConnectionId,

    /// The stream this connection owns exclusively
    stream: BufferedStream<S>,

    /// Login name of the peer, once resolved
    username: Option<String>,

    /// The protocol asked for this connection to go away
    closing: bool,

    /// Shared statistics
    stats: Arc<ConnectionStats>,

    /// Stream counters already folded into `stats`
    reported_read: u64,
    reported_written: u64,
}

impl<S: Socket> Connection<S> {
    /// Creates a connection around an accepted stream.
    pub fn new(id: ConnectionId, stream: BufferedStream<S>, stats: Arc<ConnectionStats>) -> Self {
        stats.connection_opened();

        Self {
            id,
            stream,
            username: None,
            closing: false,
            stats,
            reported_read: 0,
            reported_written: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The resolved username, or `None` before `on_accept` has run.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_username(&mut self, name: impl Into<String>) {
        self.username = Some(name.into());
    }

    pub fn stream(&self) -> &BufferedStream<S> {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut BufferedStream<S> {
        &mut self.stream
    }

    /// Reads the next line from the stream.
    pub fn read_line(&mut self) -> Result<ReadOutcome, StreamError> {
        let outcome = self.stream.read_line();
        self.report_traffic();
        outcome
    }

    /// Writes one reply and flushes it.
    pub fn send(&mut self, reply: &Reply) -> Result<FlushStatus, StreamError> {
        self.send_all(std::slice::from_ref(reply))
    }

    /// Writes several replies, then flushes once.
    pub fn send_all(&mut self, replies: &[Reply]) -> Result<FlushStatus, StreamError> {
        let result = self.write_replies(replies);
        self.report_traffic();
        result
    }

    /// Retries output left behind by an earlier would-block.
    pub fn flush_pending(&mut self) -> Result<FlushStatus, StreamError> {
        let result = self.stream.flush();
        self.report_traffic();
        result
    }

    /// Whether there is output waiting for the descriptor to become writable.
    pub fn wants_write(&self) -> bool {
        self.stream.has_pending_output()
    }

    /// Marks the connection for removal at the end of the current pass.
    pub fn request_close(&mut self) {
        self.closing = true;
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Whether the multiplexer should tear this connection down.
    pub fn should_reap(&self) -> bool {
        self.closing || self.stream.is_broken() || !self.stream.is_open()
    }

    /// Flushes and closes the stream. Only the first call has any effect.
    pub fn close(&mut self) {
        if self.stream.is_open() {
            self.stream.close();
            self.report_traffic();
            self.stats.connection_closed();
        }
        self.closing = true;
    }

    fn write_replies(&mut self, replies: &[Reply]) -> Result<FlushStatus, StreamError> {
        let mut encoded = BytesMut::new();
        for reply in replies {
            reply.encode_into(&mut encoded);
        }
        self.stream.write(&encoded)?;
        self.stream.flush()
    }

    fn report_traffic(&mut self) {
        let read = self.stream.bytes_read();
        let written = self.stream.bytes_written();
        self.stats.bytes_read(read - self.reported_read);
        self.stats.bytes_written(written - self.reported_written);
        self.reported_read = read;
        self.reported_written = written;
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("closing", &self.closing)
            .finish()
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Fatal stream failure (I/O error, output overflow, closed stream)
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// The peer's credentials could not be read from the socket
    #[error("Unable to determine connected peer: {0}")]
    PeerCredentials(#[source] nix::Error),

    /// The passwd database lookup failed
    #[error("Unable to determine connected user: {0}")]
    UserLookup(#[source] nix::Error),

    /// The peer's uid has no passwd entry
    #[error("No user entry for uid {0}")]
    UnknownUser(u32),

    /// The connection is not (or no longer) in the registry
    #[error("Connection {0} is not registered")]
    NotRegistered(ConnectionId),
}
