//! Connection Registry
//!
//! The live set of connections, keyed by descriptor, plus the presence view
//! derived from it. There is no separate user table: "who is online" and
//! "how many sessions does alice have" are answered by scanning the
//! connections' resolved usernames.
//!
//! ## Ordering
//!
//! Connections live in a `BTreeMap`, so every fanout and every `/who`
//! listing walks them in ascending descriptor order. Usernames are reported
//! through a `BTreeSet`, which also de-duplicates users with several
//! sessions.
//!
//! ## Delivery
//!
//! Fanout is best effort. A recipient whose write fails is logged and
//! skipped; its stream is marked broken and the multiplexer reaps it after
//! the current pass. The sender never sees the failure.

use crate::connection::{Connection, ConnectionId};
use crate::protocol::Reply;
use crate::stream::Socket;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// All live connections.
pub struct Registry<S> {
    connections: BTreeMap<ConnectionId, Connection<S>>,
}

impl<S: Socket> Registry<S> {
    pub fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Registers a connection, returning any stale entry it displaced.
    pub fn insert(&mut self, connection: Connection<S>) -> Option<Connection<S>> {
        self.connections.insert(connection.id(), connection)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection<S>> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection<S>> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection<S>> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection<S>> {
        self.connections.values_mut()
    }

    /// Ids of every registered connection, ascending.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Ids the multiplexer should tear down.
    pub fn reapable(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.should_reap())
            .map(|c| c.id())
            .collect()
    }

    /// The de-duplicated, sorted set of connected usernames.
    pub fn usernames(&self) -> BTreeSet<String> {
        self.connections
            .values()
            .filter(|c| !c.should_reap())
            .filter_map(|c| c.username())
            .map(str::to_string)
            .collect()
    }

    /// Number of live connections owned by `user`.
    pub fn connection_count(&self, user: &str) -> usize {
        self.sessions_of(user).count()
    }

    /// Ids of the live connections owned by `user`.
    pub fn ids_for_user(&self, user: &str) -> Vec<ConnectionId> {
        self.sessions_of(user).map(|c| c.id()).collect()
    }

    /// Sends a reply to one connection. Returns whether it was written.
    pub fn send_to(&mut self, id: ConnectionId, reply: &Reply) -> bool {
        self.send_all_to(id, std::slice::from_ref(reply))
    }

    /// Sends several replies to one connection with a single flush.
    pub fn send_all_to(&mut self, id: ConnectionId, replies: &[Reply]) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) => deliver(connection, replies),
            None => false,
        }
    }

    /// Sends a reply to every connection of `user`. Returns the number of
    /// connections it reached.
    pub fn send_to_user(&mut self, user: &str, reply: &Reply) -> usize {
        let ids = self.ids_for_user(user);
        self.fanout(&ids, reply)
    }

    /// Sends a reply to every live connection.
    pub fn broadcast(&mut self, reply: &Reply) -> usize {
        let ids = self.live_ids(None);
        self.fanout(&ids, reply)
    }

    /// Sends a reply to every live connection except `skip`.
    pub fn broadcast_except(&mut self, skip: ConnectionId, reply: &Reply) -> usize {
        let ids = self.live_ids(Some(skip));
        self.fanout(&ids, reply)
    }

    fn sessions_of<'a>(&'a self, user: &'a str) -> impl Iterator<Item = &'a Connection<S>> + 'a {
        self.connections
            .values()
            .filter(|c| !c.should_reap())
            .filter(move |c| c.username() == Some(user))
    }

    fn live_ids(&self, skip: Option<ConnectionId>) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| !c.should_reap() && c.username().is_some())
            .map(|c| c.id())
            .filter(|id| Some(*id) != skip)
            .collect()
    }

    fn fanout(&mut self, ids: &[ConnectionId], reply: &Reply) -> usize {
        ids.iter().filter(|id| self.send_to(**id, reply)).count()
    }
}

impl<S: Socket> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver<S: Socket>(connection: &mut Connection<S>, replies: &[Reply]) -> bool {
    if connection.should_reap() {
        return false;
    }

    match connection.send_all(replies) {
        Ok(_) => true,
        Err(e) => {
            debug!(conn = %connection.id(), error = %e, "Dropping output to failed connection");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionStats;
    use crate::stream::mock::MockSocket;
    use crate::stream::{BufferedStream, StreamConfig};
    use std::io::ErrorKind;
    use std::sync::Arc;

    struct Harness {
        registry: Registry<MockSocket>,
        peers: BTreeMap<i32, MockSocket>,
        stats: Arc<ConnectionStats>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: Registry::new(),
                peers: BTreeMap::new(),
                stats: Arc::new(ConnectionStats::new()),
            }
        }

        fn connect(&mut self, fd: i32, user: &str) -> ConnectionId {
            let socket = MockSocket::new();
            let stream = BufferedStream::new(socket.clone(), StreamConfig::default());
            let mut conn = Connection::new(ConnectionId(fd), stream, Arc::clone(&self.stats));
            conn.set_username(user);
            self.registry.insert(conn);
            self.peers.insert(fd, socket);
            ConnectionId(fd)
        }

        fn lines(&self, fd: i32) -> Vec<String> {
            self.peers[&fd].take_lines()
        }
    }

    #[test]
    fn test_usernames_are_deduplicated_and_sorted() {
        let mut h = Harness::new();
        h.connect(9, "carol");
        h.connect(4, "alice");
        h.connect(5, "carol");
        h.connect(6, "bob");

        let names: Vec<_> = h.registry.usernames().into_iter().collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert_eq!(h.registry.connection_count("carol"), 2);
        assert_eq!(h.registry.ids_for_user("carol"), vec![ConnectionId(5), ConnectionId(9)]);
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let mut h = Harness::new();
        h.connect(4, "alice");
        h.connect(5, "bob");

        let reached = h.registry.broadcast(&Reply::public("alice", "hi"));
        assert_eq!(reached, 2);
        assert_eq!(h.lines(4), vec!["alice: hi"]);
        assert_eq!(h.lines(5), vec!["alice: hi"]);
    }

    #[test]
    fn test_broadcast_except_skips_one() {
        let mut h = Harness::new();
        let alice = h.connect(4, "alice");
        h.connect(5, "bob");

        h.registry.broadcast_except(alice, &Reply::joined("alice"));
        assert!(h.lines(4).is_empty());
        assert_eq!(h.lines(5), vec!["alice has joined the chat."]);
    }

    #[test]
    fn test_failed_recipient_does_not_stop_fanout() {
        let mut h = Harness::new();
        h.connect(4, "alice");
        h.connect(5, "bob");
        h.connect(6, "carol");
        h.peers[&5].fail_writes(ErrorKind::BrokenPipe);

        let reached = h.registry.broadcast(&Reply::notice("ping"));
        assert_eq!(reached, 2);
        assert_eq!(h.lines(4), vec!["ping"]);
        assert_eq!(h.lines(6), vec!["ping"]);
        assert_eq!(h.registry.reapable(), vec![ConnectionId(5)]);

        // the broken connection no longer counts as present
        assert_eq!(h.registry.connection_count("bob"), 0);
    }

    #[test]
    fn test_send_to_user_hits_every_session() {
        let mut h = Harness::new();
        h.connect(4, "bob");
        h.connect(5, "alice");
        h.connect(6, "bob");

        let reached = h.registry.send_to_user("bob", &Reply::private_received("alice", "yo"));
        assert_eq!(reached, 2);
        assert_eq!(h.lines(4), vec!["! alice: yo"]);
        assert!(h.lines(5).is_empty());
        assert_eq!(h.lines(6), vec!["! alice: yo"]);
    }

    #[test]
    fn test_closing_connections_are_not_present() {
        let mut h = Harness::new();
        let alice = h.connect(4, "alice");
        h.registry.get_mut(alice).unwrap().request_close();

        assert!(h.registry.usernames().is_empty());
        assert_eq!(h.registry.broadcast(&Reply::notice("x")), 0);
        assert_eq!(h.registry.reapable(), vec![alice]);
    }

    #[test]
    fn test_send_to_unknown_id_is_false() {
        let mut h = Harness::new();
        assert!(!h.registry.send_to(ConnectionId(42), &Reply::notice("x")));
    }
}
