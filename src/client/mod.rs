//! Line-mode chat client.
//!
//! Forwards lines typed on standard input to the server and prints what the
//! server sends back in plain text. The client keeps its own copy of who is
//! online: it asks with `/who` when it connects and again whenever a join or
//! leave notice arrives.

use crate::protocol::Reply;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines,
};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::{debug, trace};

/// Users the server last reported as online.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Roster {
    users: BTreeSet<String>,
}

impl Roster {
    pub fn replace(&mut self, users: &[String]) {
        self.users = users.iter().cloned().collect();
    }

    pub fn contains(&self, user: &str) -> bool {
        self.users.contains(user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(String::as_str)
    }
}

/// Turns a server reply into the text shown to the user.
pub fn render(reply: &Reply) -> String {
    match reply {
        Reply::Public { from, text } => format!("<{}> {}", from, text),
        Reply::PrivateReceived { from, text } => format!("*{}* {}", from, text),
        Reply::PrivateSent { to, text } => format!("-> *{}* {}", to, text),
        Reply::Who(users) => format!("Online: {}", users.join(", ")),
        Reply::System(text) => format!("-- {}", text),
        Reply::Notice(text) => format!("** {}", text),
    }
}

/// Whether typing `line` ends the session.
pub fn is_quit(line: &str) -> bool {
    matches!(line.split_whitespace().next(), Some("/quit" | "/exit"))
}

/// A session with the server over any byte stream.
pub struct ChatClient<R, W> {
    lines: Lines<BufReader<R>>,
    writer: W,
    roster: Roster,
}

/// Connects to the server listening at `path`.
pub async fn connect(path: &Path) -> io::Result<ChatClient<OwnedReadHalf, OwnedWriteHalf>> {
    let stream = UnixStream::connect(path).await?;
    debug!(path = %path.display(), "Connected");
    let (reader, writer) = stream.into_split();
    Ok(ChatClient::new(reader, writer))
}

impl<R, W> ChatClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
            roster: Roster::default(),
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Sends one line to the server.
    pub async fn send(&mut self, line: &str) -> io::Result<()> {
        trace!(line, "Sending");
        self.writer.write_all(format!("{}\n", line).as_bytes()).await?;
        self.writer.flush().await
    }

    /// Waits for the next server line. `None` means the server hung up.
    pub async fn recv(&mut self) -> io::Result<Option<Reply>> {
        match self.lines.next_line().await? {
            Some(line) => self.handle_line(&line).await.map(Some),
            None => Ok(None),
        }
    }

    /// Interactive loop: `input` lines go to the server, rendered replies go
    /// to `output`. Ends on `/quit`, end of input, or server hang-up.
    pub async fn run<I, O>(mut self, input: I, output: &mut O) -> io::Result<()>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let mut input = input.lines();
        self.send("/who").await?;

        loop {
            tokio::select! {
                typed = input.next_line() => match typed? {
                    Some(line) => {
                        self.send(&line).await?;
                        if is_quit(&line) {
                            break;
                        }
                    }
                    None => break,
                },
                received = self.lines.next_line() => match received? {
                    Some(line) => {
                        let reply = self.handle_line(&line).await?;
                        output.write_all(format!("{}\n", render(&reply)).as_bytes()).await?;
                        output.flush().await?;
                    }
                    None => {
                        debug!("Server closed the connection");
                        break;
                    }
                },
            }
        }

        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> io::Result<Reply> {
        let reply = Reply::parse(line);
        if let Reply::Who(users) = &reply {
            self.roster.replace(users);
        } else if reply.is_presence_change() {
            self.send("/who").await?;
        }
        Ok(reply)
    }
}
