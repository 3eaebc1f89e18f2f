//! The single-threaded readiness loop.
//!
//! Every pass rebuilds the `poll(2)` interest set from the listener and the
//! registry, waits up to the configured interval, then services ready
//! descriptors in ascending order. Connections that finished, failed, or
//! were broken by a fanout write are reaped at the end of the pass.

use super::listener::Listener;
use super::ServerError;
use crate::commands::ChatHandler;
use crate::config::ServerConfig;
use crate::connection::{
    Connection, ConnectionId, ConnectionStats, IdentityResolver, PeerCredentials,
};
use crate::protocol::Reply;
use crate::registry::Registry;
use crate::stream::{BufferedStream, ReadMode};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Sent to every connection before the server goes away.
pub const SHUTDOWN_NOTICE: &str = "Server is shutting down.";

/// How long the listener is left out of the interest set after a failed
/// accept (for example `EMFILE`), which would otherwise stay readable.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What one descriptor reported in a pass.
#[derive(Debug, Clone, Copy)]
struct Ready {
    id: ConnectionId,
    readable: bool,
    writable: bool,
}

/// The chat broker: listener, connections, and the protocol handler.
pub struct Server {
    config: ServerConfig,
    listener: Listener,
    registry: Registry<UnixStream>,
    handler: ChatHandler<UnixStream>,
    stats: Arc<ConnectionStats>,
    shutdown: Arc<AtomicBool>,
    accept_paused_until: Option<Instant>,
    accept_failures: u32,
}

impl Server {
    /// Binds the socket and identifies peers by their credentials.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        Self::with_resolver(config, PeerCredentials)
    }

    /// Binds the socket with a custom identity resolver.
    pub fn with_resolver(
        config: ServerConfig,
        resolver: impl IdentityResolver<UnixStream> + Send + 'static,
    ) -> Result<Self, ServerError> {
        let listener = Listener::bind(&config)?;
        let stats = Arc::new(ConnectionStats::new());

        Ok(Self {
            config,
            listener,
            registry: Registry::new(),
            handler: ChatHandler::new(resolver, Arc::clone(&stats)),
            stats,
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_paused_until: None,
            accept_failures: 0,
        })
    }

    pub fn socket_path(&self) -> &Path {
        self.listener.path()
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// A flag that stops the loop at its next wake-up when set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Uses an existing flag (for example one registered with signal
    /// handlers) as the shutdown flag.
    pub fn set_shutdown_handle(&mut self, flag: Arc<AtomicBool>) {
        self.shutdown = flag;
    }

    /// Runs until the shutdown flag is set or the readiness wait fails.
    ///
    /// Connections are told about the shutdown and closed, and the socket
    /// file is removed, on both paths.
    pub fn run(mut self) -> Result<(), ServerError> {
        let result = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested");
                break Ok(());
            }
            if let Err(e) = self.run_once() {
                error!(error = %e, "Readiness loop failed");
                break Err(e);
            }
        };

        self.shutdown();
        result
    }

    /// One readiness wait plus the dispatch of whatever it reported.
    pub fn run_once(&mut self) -> Result<(), ServerError> {
        let (listener_ready, ready) = self.wait()?;

        // listener first, then connections in ascending descriptor order
        if listener_ready {
            self.accept_pending();
        }
        for event in ready {
            self.service(event);
        }

        self.reap();
        Ok(())
    }

    fn wait(&self) -> Result<(bool, Vec<Ready>), ServerError> {
        let now = Instant::now();
        let timeout = PollTimeout::try_from(self.wait_limit(now)).unwrap_or(PollTimeout::MAX);

        let mut fds = Vec::with_capacity(self.registry.len() + 1);
        fds.push(PollFd::new(self.listener.as_fd(), self.listener_interest(now)));

        let mut polled = Vec::with_capacity(self.registry.len());
        for connection in self.registry.iter() {
            let Some(socket) = connection.stream().get_ref() else {
                continue;
            };
            let mut events = PollFlags::POLLIN;
            if connection.wants_write() {
                events |= PollFlags::POLLOUT;
            }
            fds.push(PollFd::new(socket.as_fd(), events));
            polled.push(connection.id());
        }

        loop {
            match poll(&mut fds, timeout) {
                Ok(0) => return Ok((false, Vec::new())),
                Ok(_) => break,
                Err(Errno::EINTR) => {
                    trace!("Readiness wait interrupted");
                    if self.shutdown.load(Ordering::SeqCst) {
                        return Ok((false, Vec::new()));
                    }
                }
                Err(e) => return Err(ServerError::Poll(e)),
            }
        }

        let listener_ready = fds[0]
            .revents()
            .is_some_and(|r| r.intersects(PollFlags::POLLIN));

        let ready = polled
            .into_iter()
            .zip(&fds[1..])
            .filter_map(|(id, fd)| {
                let revents = fd.revents().filter(|r| !r.is_empty())?;
                Some(Ready {
                    id,
                    readable: revents.intersects(
                        PollFlags::POLLIN
                            | PollFlags::POLLHUP
                            | PollFlags::POLLERR
                            | PollFlags::POLLNVAL,
                    ),
                    writable: revents.contains(PollFlags::POLLOUT),
                })
            })
            .collect();

        Ok((listener_ready, ready))
    }

    /// Listener events to wait for; none while accepts are paused.
    fn listener_interest(&self, now: Instant) -> PollFlags {
        match self.accept_paused_until {
            Some(until) if now < until => PollFlags::empty(),
            _ => PollFlags::POLLIN,
        }
    }

    /// Longest wait for this pass, cut short so a pause ends on time.
    fn wait_limit(&self, now: Instant) -> Duration {
        match self.accept_paused_until {
            Some(until) if now < until => self.config.poll_interval.min(until - now),
            _ => self.config.poll_interval,
        }
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok(Some(stream)) => {
                    self.accept_resumed();
                    self.register(stream);
                }
                Ok(None) => {
                    self.accept_resumed();
                    return;
                }
                Err(e) => {
                    self.accept_failed(&e, Instant::now());
                    return;
                }
            }
        }
    }

    fn accept_failed(&mut self, e: &std::io::Error, now: Instant) {
        self.accept_failures += 1;
        self.accept_paused_until = Some(now + ACCEPT_BACKOFF);
        if self.accept_failures == 1 {
            error!(error = %e, "Failed to accept connection, pausing accepts");
        } else {
            debug!(error = %e, failures = self.accept_failures, "Accept still failing");
        }
    }

    fn accept_resumed(&mut self) {
        if self.accept_failures > 0 {
            info!(failures = self.accept_failures, "Accepting connections again");
        }
        self.accept_failures = 0;
        self.accept_paused_until = None;
    }

    fn register(&mut self, socket: UnixStream) {
        let id = ConnectionId(socket.as_raw_fd());
        let mut stream = BufferedStream::new(socket, self.config.stream);
        if let Err(e) = stream.set_mode(ReadMode::NonBlocking) {
            warn!(conn = %id, error = %e, "Dropping connection");
            return;
        }

        if let Some(mut stale) = self
            .registry
            .insert(Connection::new(id, stream, Arc::clone(&self.stats)))
        {
            stale.close();
        }
        debug!(conn = %id, "Accepted connection");

        if let Err(e) = self.handler.on_accept(&mut self.registry, id) {
            warn!(conn = %id, error = %e, "Rejecting connection");
            if let Some(mut connection) = self.registry.remove(id) {
                connection.close();
            }
        }
    }

    fn service(&mut self, event: Ready) {
        if event.writable {
            if let Some(connection) = self.registry.get_mut(event.id) {
                if let Err(e) = connection.flush_pending() {
                    debug!(conn = %event.id, error = %e, "Flush failed");
                }
            }
        }

        if event.readable {
            if let Err(e) = self.handler.on_readable(&mut self.registry, event.id) {
                debug!(conn = %event.id, error = %e, "Connection failed");
                if let Some(connection) = self.registry.get_mut(event.id) {
                    connection.request_close();
                }
            }
        }
    }

    /// Tears down finished connections. A departure notice can break
    /// further recipients, so this repeats until nothing is left to reap.
    fn reap(&mut self) {
        loop {
            let ids = self.registry.reapable();
            if ids.is_empty() {
                return;
            }
            for id in ids {
                if let Some(connection) = self.registry.remove(id) {
                    self.handler.on_close(&mut self.registry, connection);
                }
            }
        }
    }

    fn shutdown(&mut self) {
        let notified = self.registry.broadcast(&Reply::notice(SHUTDOWN_NOTICE));
        info!(connections = notified, "Closing all connections");

        for id in self.registry.ids() {
            if let Some(mut connection) = self.registry.remove(id) {
                connection.close();
            }
        }
        self.listener.remove();
    }
}
