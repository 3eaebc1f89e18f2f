//! Chat Command Handler
//!
//! This module implements the chat session protocol. It turns each complete
//! input line into a slash-command or a broadcast, and owns the presence
//! rules that fire when a user's connection count crosses between zero and
//! one.
//!
//! ## Supported Commands
//!
//! - `/quit`, `/exit` - Leave the chat (closes this connection only)
//! - `/who` - List connected users: `~ alice bob `
//! - `/help` - Usage text
//! - `/version`, `/about` - Server identification
//! - `/msg`, `/priv`, `/query <username> <message>` - Private message to
//!   every connection of `<username>`, echoed to every connection of the
//!   sender
//!
//! Anything not starting with `/` is broadcast as `sender: text` to every
//! connection, the sender's own included.
//!
//! ## Presence
//!
//! Join and leave notices come only from `on_accept` and `on_close`. A user
//! with three terminals open produces one join notice when the first arrives
//! and one leave notice when the last goes away.

use crate::connection::{
    Connection, ConnectionError, ConnectionId, ConnectionStats, IdentityResolver,
};
use crate::protocol::{Command, Reply, Request};
use crate::registry::Registry;
use crate::stream::{ReadOutcome, Socket, StreamError};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Hint sent to a user's first connection and after unknown commands.
pub const HELP_HINT: &str = "Type '/help' to get a list of chat commands.";

/// Body of the `/help` reply, one `?` line each.
const HELP_TEXT: &[&str] = &[
    "All server commands start with the '/' character.",
    "/help                      - Displays this help dialog.",
    "/who                       - Displays a list of all the users in the chat.",
    "/msg <user> <message>      - Sends a private message to every session of <user>.",
    "                             (/priv and /query work the same way)",
    "/quit or /exit             - Leaves the chat.",
    "/version or /about         - Version information about this server.",
    "",
    "Anything else you type is sent to everyone in the chat.",
];

/// Dispatches client lines and connection lifecycle events.
pub struct ChatHandler<S> {
    /// Turns an accepted socket into a username
    resolver: Box<dyn IdentityResolver<S> + Send>,
    /// Shared statistics
    stats: Arc<ConnectionStats>,
}

impl<S: Socket> ChatHandler<S> {
    /// Creates a handler with the given identity resolver.
    pub fn new(
        resolver: impl IdentityResolver<S> + Send + 'static,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            resolver: Box::new(resolver),
            stats,
        }
    }

    /// Runs once right after a connection is registered.
    ///
    /// Resolves the peer's username. When this is the user's first live
    /// connection, everyone else hears about it and the new connection gets
    /// the help hint.
    pub fn on_accept(
        &mut self,
        registry: &mut Registry<S>,
        id: ConnectionId,
    ) -> Result<(), ConnectionError> {
        let connection = registry
            .get_mut(id)
            .ok_or(ConnectionError::NotRegistered(id))?;
        let socket = connection.stream().get_ref().ok_or(StreamError::Closed)?;

        let name = self.resolver.resolve(id, socket)?;
        connection.set_username(name.as_str());
        info!(conn = %id, user = %name, "Client connected");

        if registry.connection_count(&name) == 1 {
            info!(user = %name, "User joined");
            registry.broadcast_except(id, &Reply::joined(&name));
            registry.send_to(id, &Reply::system(HELP_HINT));
        }

        Ok(())
    }

    /// Runs whenever the connection's descriptor is readable.
    ///
    /// Reads and dispatches lines until the stream has nothing complete
    /// left. End-of-stream marks the connection for closing. A fatal stream
    /// error is returned; the caller closes the connection.
    pub fn on_readable(
        &mut self,
        registry: &mut Registry<S>,
        id: ConnectionId,
    ) -> Result<(), ConnectionError> {
        loop {
            let connection = match registry.get_mut(id) {
                Some(connection) if !connection.is_closing() => connection,
                _ => return Ok(()),
            };

            let outcome = connection.read_line();
            match outcome {
                Ok(ReadOutcome::Line(line)) => {
                    self.stats.line_processed();
                    // Invalid UTF-8 is replaced with U+FFFD; the line is still delivered
                    self.handle_line(registry, id, &String::from_utf8_lossy(&line));
                }
                Ok(ReadOutcome::NotReady) => return Ok(()),
                Ok(ReadOutcome::EndOfStream) => {
                    debug!(conn = %id, "Peer closed the connection");
                    connection.request_close();
                    return Ok(());
                }
                Err(StreamError::LineTooLong { limit }) => {
                    warn!(conn = %id, limit, "Discarded oversized line");
                    registry.send_to(
                        id,
                        &Reply::system(format!(
                            "Message too long (limit {} bytes); it was discarded.",
                            limit
                        )),
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Runs after a connection has been removed from the registry.
    ///
    /// Closes it and, when it was the user's last connection, tells everyone
    /// who is left.
    pub fn on_close(&mut self, registry: &mut Registry<S>, mut connection: Connection<S>) {
        match connection.username() {
            Some(name) => {
                info!(conn = %connection.id(), user = %name, "Client disconnected");
                if registry.connection_count(name) == 0 {
                    info!(user = %name, "User left");
                    registry.broadcast(&Reply::left(name));
                }
            }
            None => debug!(conn = %connection.id(), "Closed unidentified connection"),
        }

        connection.close();
    }

    /// Handles one complete line from `id`.
    pub fn handle_line(&mut self, registry: &mut Registry<S>, id: ConnectionId, line: &str) {
        let Some(sender) = registry
            .get(id)
            .and_then(|c| c.username())
            .map(str::to_string)
        else {
            return;
        };
        trace!(conn = %id, user = %sender, line, "Dispatching line");

        match Request::parse(line) {
            Ok(Request::Empty) => {}
            Ok(Request::Chat(text)) => {
                registry.broadcast(&Reply::public(sender, text));
            }
            Ok(Request::Command(command)) => self.dispatch(registry, id, &sender, command),
            Err(e) => {
                registry.send_to(id, &Reply::system(e.to_string()));
            }
        }
    }

    /// Dispatches a command to its handler.
    fn dispatch(
        &mut self,
        registry: &mut Registry<S>,
        id: ConnectionId,
        sender: &str,
        command: Command,
    ) {
        match command {
            Command::Quit => self.cmd_quit(registry, id),
            Command::Who => self.cmd_who(registry, id),
            Command::Help => self.cmd_help(registry, id),
            Command::Version => self.cmd_version(registry, id),
            Command::Msg { target, message } => {
                self.cmd_msg(registry, sender, &target, &message)
            }
            Command::Unknown(name) => {
                registry.send_all_to(
                    id,
                    &[
                        Reply::system(format!("Unknown chat command '/{}'", name)),
                        Reply::system(HELP_HINT),
                    ],
                );
            }
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// QUIT / EXIT
    ///
    /// The departure notice, if any, is sent by `on_close`.
    fn cmd_quit(&mut self, registry: &mut Registry<S>, id: ConnectionId) {
        if let Some(connection) = registry.get_mut(id) {
            connection.request_close();
        }
    }

    /// WHO
    fn cmd_who(&mut self, registry: &mut Registry<S>, id: ConnectionId) {
        let users = registry.usernames().into_iter().collect();
        registry.send_to(id, &Reply::Who(users));
    }

    /// HELP
    fn cmd_help(&mut self, registry: &mut Registry<S>, id: ConnectionId) {
        let replies: Vec<_> = HELP_TEXT.iter().map(|line| Reply::system(*line)).collect();
        registry.send_all_to(id, &replies);
    }

    /// VERSION / ABOUT
    fn cmd_version(&mut self, registry: &mut Registry<S>, id: ConnectionId) {
        registry.send_all_to(
            id,
            &[
                Reply::notice(format!("Huddle chat server v{}", crate::VERSION)),
                Reply::notice("A local chat broker for users sharing one host."),
                Reply::notice("License MIT. There is NO WARRANTY, to the extent permitted by law."),
            ],
        );
    }

    /// MSG / PRIV / QUERY target message
    fn cmd_msg(&mut self, registry: &mut Registry<S>, sender: &str, target: &str, message: &str) {
        let delivered = registry.send_to_user(target, &Reply::private_received(sender, message));

        if delivered > 0 {
            debug!(from = %sender, to = %target, sessions = delivered, "Private message delivered");
            registry.send_to_user(sender, &Reply::private_sent(target, message));
        } else {
            debug!(from = %sender, to = %target, "Private message target not available");
            registry.send_to_user(sender, &Reply::system(format!("{} is not available.", target)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::mock::MockSocket;
    use crate::stream::{BufferedStream, StreamConfig};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A registry, a handler whose resolver looks names up by descriptor,
    /// and the far end of every mock socket.
    struct Chat {
        registry: Registry<MockSocket>,
        handler: ChatHandler<MockSocket>,
        names: Arc<Mutex<HashMap<i32, String>>>,
        peers: HashMap<i32, MockSocket>,
        stats: Arc<ConnectionStats>,
    }

    impl Chat {
        fn new() -> Self {
            let names: Arc<Mutex<HashMap<i32, String>>> = Arc::default();
            let lookup = Arc::clone(&names);
            let resolver =
                move |id: ConnectionId, _: &MockSocket| -> Result<String, ConnectionError> {
                    lookup
                        .lock()
                        .unwrap()
                        .get(&id.0)
                        .cloned()
                        .ok_or(ConnectionError::UnknownUser(id.0 as u32))
                };
            let stats = Arc::new(ConnectionStats::new());

            Self {
                registry: Registry::new(),
                handler: ChatHandler::new(resolver, Arc::clone(&stats)),
                names,
                peers: HashMap::new(),
                stats,
            }
        }

        fn connect(&mut self, fd: i32, user: &str) -> ConnectionId {
            self.names.lock().unwrap().insert(fd, user.to_string());
            let id = self.register(fd);
            self.handler.on_accept(&mut self.registry, id).unwrap();
            id
        }

        fn register(&mut self, fd: i32) -> ConnectionId {
            let socket = MockSocket::new();
            let stream = BufferedStream::new(socket.clone(), StreamConfig::default());
            let id = ConnectionId(fd);
            self.registry
                .insert(Connection::new(id, stream, Arc::clone(&self.stats)));
            self.peers.insert(fd, socket);
            id
        }

        fn send(&mut self, fd: i32, line: &str) {
            self.peers[&fd].push_read(format!("{}\n", line).as_bytes());
            self.handler
                .on_readable(&mut self.registry, ConnectionId(fd))
                .unwrap();
        }

        fn disconnect(&mut self, fd: i32) {
            let conn = self.registry.remove(ConnectionId(fd)).unwrap();
            self.handler.on_close(&mut self.registry, conn);
        }

        fn reap(&mut self) {
            for id in self.registry.reapable() {
                let conn = self.registry.remove(id).unwrap();
                self.handler.on_close(&mut self.registry, conn);
            }
        }

        fn lines(&self, fd: i32) -> Vec<String> {
            self.peers[&fd].take_lines()
        }

        fn drain_all(&self) {
            for peer in self.peers.values() {
                peer.take_lines();
            }
        }
    }

    fn count(lines: &[String], wanted: &str) -> usize {
        lines.iter().filter(|l| *l == wanted).count()
    }

    #[test]
    fn test_first_connection_announces_and_hints() {
        let mut chat = Chat::new();
        chat.connect(4, "alice");
        assert_eq!(chat.lines(4), vec![format!("? {}", HELP_HINT)]);

        chat.connect(5, "bob");
        assert_eq!(chat.lines(4), vec!["bob has joined the chat."]);
        assert_eq!(chat.lines(5), vec![format!("? {}", HELP_HINT)]);
    }

    #[test]
    fn test_presence_fires_once_per_user() {
        let mut chat = Chat::new();
        chat.connect(4, "bob");
        chat.connect(5, "alice");
        chat.connect(6, "alice");
        chat.connect(7, "alice");

        let watcher = chat.lines(4);
        assert_eq!(count(&watcher, "alice has joined the chat."), 1);
        // later sessions of an existing user get no hint either
        assert!(chat.lines(6).is_empty());

        chat.disconnect(5);
        chat.disconnect(7);
        assert!(chat.lines(4).is_empty());

        chat.disconnect(6);
        assert_eq!(chat.lines(4), vec!["alice has left the chat."]);
    }

    #[test]
    fn test_plain_text_is_broadcast_to_everyone() {
        let mut chat = Chat::new();
        chat.connect(4, "A");
        chat.connect(5, "B");
        chat.drain_all();

        chat.send(4, "hello world");
        assert_eq!(chat.lines(4), vec!["A: hello world"]);
        assert_eq!(chat.lines(5), vec!["A: hello world"]);

        chat.send(5, "/who");
        assert_eq!(chat.lines(5), vec!["~ A B "]);
        assert!(chat.lines(4).is_empty());
    }

    #[test]
    fn test_who_is_deduplicated_and_stable() {
        let mut chat = Chat::new();
        chat.connect(4, "carol");
        chat.connect(5, "alice");
        chat.connect(6, "carol");
        chat.drain_all();

        chat.send(5, "/who");
        chat.send(5, "/who");
        assert_eq!(chat.lines(5), vec!["~ alice carol ", "~ alice carol "]);
    }

    #[test]
    fn test_private_message_reaches_every_session() {
        let mut chat = Chat::new();
        chat.connect(4, "alice");
        chat.connect(5, "bob");
        chat.connect(6, "bob");
        chat.connect(7, "alice");
        chat.connect(8, "carol");
        chat.drain_all();

        chat.send(4, "/msg bob hello");

        assert_eq!(chat.lines(5), vec!["! alice: hello"]);
        assert_eq!(chat.lines(6), vec!["! alice: hello"]);
        assert_eq!(chat.lines(4), vec!["! ^bob: hello"]);
        assert_eq!(chat.lines(7), vec!["! ^bob: hello"]);
        assert!(chat.lines(8).is_empty());
    }

    #[test]
    fn test_private_message_to_missing_user() {
        let mut chat = Chat::new();
        chat.connect(4, "alice");
        chat.connect(5, "alice");
        chat.connect(6, "bob");
        chat.drain_all();

        chat.send(4, "/priv nobody hi");

        assert_eq!(chat.lines(4), vec!["? nobody is not available."]);
        assert_eq!(chat.lines(5), vec!["? nobody is not available."]);
        assert!(chat.lines(6).is_empty());
    }

    #[test]
    fn test_private_message_to_self() {
        let mut chat = Chat::new();
        chat.connect(4, "alice");
        chat.connect(5, "alice");
        chat.drain_all();

        chat.send(4, "/query alice note to self");

        let expected = vec!["! alice: note to self", "! ^alice: note to self"];
        assert_eq!(chat.lines(4), expected);
        assert_eq!(chat.lines(5), expected);
    }

    #[test]
    fn test_private_message_usage() {
        let mut chat = Chat::new();
        chat.connect(4, "alice");
        chat.drain_all();

        chat.send(4, "/msg bob");
        assert_eq!(chat.lines(4), vec!["? Usage: /msg <username> <message>"]);
        assert!(chat.registry.contains(ConnectionId(4)));
    }

    #[test]
    fn test_quit_closes_only_that_session() {
        let mut chat = Chat::new();
        chat.connect(4, "A");
        chat.connect(5, "B");
        chat.drain_all();

        chat.send(4, "/quit");
        chat.reap();

        assert!(!chat.registry.contains(ConnectionId(4)));
        assert_eq!(chat.lines(5), vec!["A has left the chat."]);
    }

    #[test]
    fn test_quit_with_other_sessions_is_silent() {
        let mut chat = Chat::new();
        chat.connect(4, "A");
        chat.connect(5, "A");
        chat.connect(6, "B");
        chat.drain_all();

        chat.send(4, "/exit");
        chat.reap();

        assert!(chat.lines(6).is_empty());
        chat.send(6, "/who");
        assert_eq!(chat.lines(6), vec!["~ A B "]);
    }

    #[test]
    fn test_lines_after_quit_are_ignored() {
        let mut chat = Chat::new();
        chat.connect(4, "A");
        chat.connect(5, "B");
        chat.drain_all();

        chat.send(4, "/quit\nstill here?");
        assert!(chat.lines(5).is_empty());
    }

    #[test]
    fn test_end_of_stream_marks_for_close() {
        let mut chat = Chat::new();
        chat.connect(4, "A");
        chat.connect(5, "B");
        chat.drain_all();

        chat.peers[&4].push_eof();
        chat.handler
            .on_readable(&mut chat.registry, ConnectionId(4))
            .unwrap();
        assert_eq!(chat.registry.reapable(), vec![ConnectionId(4)]);

        chat.reap();
        assert_eq!(chat.lines(5), vec!["A has left the chat."]);
    }

    #[test]
    fn test_help_and_version_reply_to_requester_only() {
        let mut chat = Chat::new();
        chat.connect(4, "A");
        chat.connect(5, "B");
        chat.drain_all();

        chat.send(4, "/help");
        let help = chat.lines(4);
        assert_eq!(help.len(), HELP_TEXT.len());
        assert!(help.iter().all(|l| l.starts_with('?')));

        chat.send(4, "/about");
        let about = chat.lines(4);
        assert_eq!(about[0], format!("Huddle chat server v{}", crate::VERSION));

        assert!(chat.lines(5).is_empty());
    }

    #[test]
    fn test_unknown_command() {
        let mut chat = Chat::new();
        chat.connect(4, "A");
        chat.drain_all();

        chat.send(4, "/dance");
        assert_eq!(
            chat.lines(4),
            vec![
                "? Unknown chat command '/dance'".to_string(),
                format!("? {}", HELP_HINT)
            ]
        );
    }

    #[test]
    fn test_oversized_line_gets_notice_and_connection_survives() {
        let mut chat = Chat::new();
        let socket = MockSocket::new();
        let config = StreamConfig {
            capacity: 16,
            ..StreamConfig::default()
        };
        chat.names.lock().unwrap().insert(4, "A".to_string());
        let id = ConnectionId(4);
        chat.registry.insert(Connection::new(
            id,
            BufferedStream::new(socket.clone(), config),
            Arc::clone(&chat.stats),
        ));
        chat.peers.insert(4, socket);
        chat.handler.on_accept(&mut chat.registry, id).unwrap();
        chat.drain_all();

        chat.send(4, &"x".repeat(40));
        chat.send(4, "short");

        assert_eq!(
            chat.lines(4),
            vec![
                "? Message too long (limit 16 bytes); it was discarded.",
                "A: short"
            ]
        );
    }

    #[test]
    fn test_multibyte_text_is_relayed_unchanged() {
        let mut chat = Chat::new();
        chat.connect(4, "A");
        chat.connect(5, "B");
        chat.drain_all();

        chat.send(4, "héllo 日本");
        assert_eq!(chat.lines(5), vec!["A: héllo 日本"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced_and_connection_survives() {
        let mut chat = Chat::new();
        chat.connect(4, "A");
        chat.connect(5, "B");
        chat.drain_all();

        chat.peers[&4].push_read(b"bad \xff byte\n");
        chat.handler
            .on_readable(&mut chat.registry, ConnectionId(4))
            .unwrap();
        assert_eq!(chat.lines(5), vec!["A: bad \u{FFFD} byte"]);
        assert!(!chat.registry.get_mut(ConnectionId(4)).unwrap().is_closing());

        chat.send(4, "still here");
        assert_eq!(chat.lines(5), vec!["A: still here"]);
    }

    #[test]
    fn test_broken_recipient_does_not_affect_sender() {
        let mut chat = Chat::new();
        chat.connect(4, "A");
        chat.connect(5, "B");
        chat.connect(6, "C");
        chat.drain_all();
        chat.peers[&5].fail_writes(std::io::ErrorKind::BrokenPipe);

        chat.send(4, "anyone?");
        assert_eq!(chat.lines(4), vec!["A: anyone?"]);
        assert_eq!(chat.lines(6), vec!["A: anyone?"]);

        chat.reap();
        assert_eq!(chat.lines(4), vec!["B has left the chat."]);
    }

    #[test]
    fn test_unresolvable_peer_is_an_error() {
        let mut chat = Chat::new();
        let id = chat.register(9);
        let err = chat.handler.on_accept(&mut chat.registry, id).unwrap_err();
        assert!(matches!(err, ConnectionError::UnknownUser(9)));
    }

    #[test]
    fn test_lines_are_counted() {
        let mut chat = Chat::new();
        chat.connect(4, "A");
        chat.send(4, "one\ntwo\n/who");
        assert_eq!(
            chat.stats
                .lines_processed
                .load(std::sync::atomic::Ordering::Relaxed),
            3
        );
    }
}
