//! Server Reply Lines
//!
//! Everything the server sends is one newline-terminated UTF-8 line. The
//! first characters tell the client how to render it:
//!
//! | Prefix      | Meaning                                 |
//! |-------------|-----------------------------------------|
//! | `user: `    | public message                          |
//! | `! user: `  | private message received                |
//! | `! ^user: ` | private message sent (echo to sender)   |
//! | `~ `        | `/who` result, space separated          |
//! | `? `        | help and system text                    |
//! | (none)      | presence notices and server messages    |

use bytes::{BufMut, BytesMut};
use std::fmt;

/// Line prefixes
pub mod prefix {
    pub const PRIVATE: &str = "! ";
    pub const PRIVATE_SENT: &str = "! ^";
    pub const WHO: &str = "~ ";
    pub const SYSTEM: &str = "? ";
}

/// Suffix of the notice sent when a user's first connection arrives.
pub const JOINED_SUFFIX: &str = " has joined the chat.";

/// Suffix of the notice sent when a user's last connection goes away.
pub const LEFT_SUFFIX: &str = " has left the chat.";

/// One line of server output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `alice: text`
    Public { from: String, text: String },
    /// `! alice: text`
    PrivateReceived { from: String, text: String },
    /// `! ^bob: text`
    PrivateSent { to: String, text: String },
    /// `~ alice bob `
    Who(Vec<String>),
    /// `? text`
    System(String),
    /// Unprefixed text
    Notice(String),
}

impl Reply {
    pub fn public(from: impl Into<String>, text: impl Into<String>) -> Self {
        Reply::Public {
            from: from.into(),
            text: text.into(),
        }
    }

    pub fn private_received(from: impl Into<String>, text: impl Into<String>) -> Self {
        Reply::PrivateReceived {
            from: from.into(),
            text: text.into(),
        }
    }

    pub fn private_sent(to: impl Into<String>, text: impl Into<String>) -> Self {
        Reply::PrivateSent {
            to: to.into(),
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Reply::System(text.into())
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Reply::Notice(text.into())
    }

    /// `alice has joined the chat.`
    pub fn joined(user: &str) -> Self {
        Reply::Notice(format!("{}{}", user, JOINED_SUFFIX))
    }

    /// `alice has left the chat.`
    pub fn left(user: &str) -> Self {
        Reply::Notice(format!("{}{}", user, LEFT_SUFFIX))
    }

    /// Serializes the reply, newline included, onto `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(self.to_string().as_bytes());
        buf.put_u8(b'\n');
    }

    /// Whether this is a join or leave notice (the roster changed).
    pub fn is_presence_change(&self) -> bool {
        match self {
            Reply::Notice(text) => text.ends_with(JOINED_SUFFIX) || text.ends_with(LEFT_SUFFIX),
            _ => false,
        }
    }

    /// Classifies a line received from the server.
    ///
    /// Prefixes are checked most specific first. A `name: text` shape only
    /// counts as a message when `name` has no whitespace, so sentences that
    /// happen to contain a colon stay notices.
    pub fn parse(line: &str) -> Reply {
        if let Some(rest) = line.strip_prefix(prefix::WHO) {
            return Reply::Who(rest.split_whitespace().map(str::to_string).collect());
        }
        if let Some(rest) = line.strip_prefix(prefix::SYSTEM) {
            return Reply::System(rest.to_string());
        }
        if let Some((to, text)) = line
            .strip_prefix(prefix::PRIVATE_SENT)
            .and_then(split_sender)
        {
            return Reply::private_sent(to, text);
        }
        if let Some((from, text)) = line.strip_prefix(prefix::PRIVATE).and_then(split_sender) {
            return Reply::private_received(from, text);
        }
        if let Some((from, text)) = split_sender(line) {
            return Reply::public(from, text);
        }
        Reply::Notice(line.to_string())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Public { from, text } => write!(f, "{}: {}", from, text),
            Reply::PrivateReceived { from, text } => {
                write!(f, "{}{}: {}", prefix::PRIVATE, from, text)
            }
            Reply::PrivateSent { to, text } => {
                write!(f, "{}{}: {}", prefix::PRIVATE_SENT, to, text)
            }
            Reply::Who(users) => {
                f.write_str(prefix::WHO)?;
                for user in users {
                    write!(f, "{} ", user)?;
                }
                Ok(())
            }
            Reply::System(text) => write!(f, "{}{}", prefix::SYSTEM, text),
            Reply::Notice(text) => f.write_str(text),
        }
    }
}

fn split_sender(s: &str) -> Option<(&str, &str)> {
    let (name, text) = s.split_once(": ")?;
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, text))
}
