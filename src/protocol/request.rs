//! Client Request Parser
//!
//! Every line a client sends is either a slash-command or chat text.
//!
//! ## Grammar
//!
//! ```text
//! line    := "/" name [ws args] | text
//! name    := first whitespace-delimited token, case-sensitive
//! msg     := ("msg" | "priv" | "query") ws username ws message
//! ```
//!
//! Arguments are ignored for commands that take none, so `/who everyone`
//! behaves like `/who`.

use std::fmt;
use thiserror::Error;

/// The prefix that turns a line into a command.
pub const COMMAND_PREFIX: char = '/';

/// A parsed client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A slash-command
    Command(Command),
    /// Free text to broadcast
    Chat(String),
    /// Nothing but whitespace; ignored
    Empty,
}

/// The slash-commands the server understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/quit` or `/exit`
    Quit,
    /// `/who`
    Who,
    /// `/help`
    Help,
    /// `/version` or `/about`
    Version,
    /// `/msg`, `/priv` or `/query` with a target and a message
    Msg { target: String, message: String },
    /// Anything else; holds the command name as typed
    Unknown(String),
}

/// Errors for commands whose arguments are malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// `/msg` without a username or without a message
    #[error("Usage: /{command} <username> <message>")]
    MissingArgument { command: String },
}

impl Request {
    /// Parses one line (without its newline).
    pub fn parse(line: &str) -> Result<Request, RequestError> {
        if line.trim().is_empty() {
            return Ok(Request::Empty);
        }

        match line.strip_prefix(COMMAND_PREFIX) {
            Some(rest) => Command::parse(rest).map(Request::Command),
            None => Ok(Request::Chat(line.to_string())),
        }
    }
}

impl Command {
    /// Parses the text after the leading `/`.
    fn parse(rest: &str) -> Result<Command, RequestError> {
        let (name, args) = split_token(rest);

        let command = match name {
            "quit" | "exit" => Command::Quit,
            "who" => Command::Who,
            "help" => Command::Help,
            "version" | "about" => Command::Version,
            "msg" | "priv" | "query" => {
                let (target, message) = split_token(args);
                if target.is_empty() || message.trim().is_empty() {
                    return Err(RequestError::MissingArgument {
                        command: name.to_string(),
                    });
                }
                Command::Msg {
                    target: target.to_string(),
                    message: message.to_string(),
                }
            }
            other => Command::Unknown(other.to_string()),
        };

        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Quit => write!(f, "/quit"),
            Command::Who => write!(f, "/who"),
            Command::Help => write!(f, "/help"),
            Command::Version => write!(f, "/version"),
            Command::Msg { target, message } => write!(f, "/msg {} {}", target, message),
            Command::Unknown(name) => write!(f, "/{}", name),
        }
    }
}

/// Splits off the first whitespace-delimited token; the remainder has its
/// leading whitespace removed.
fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (s, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> Command {
        match Request::parse(line).unwrap() {
            Request::Command(cmd) => cmd,
            other => panic!("expected a command, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_text_is_chat() {
        assert_eq!(
            Request::parse("hello world").unwrap(),
            Request::Chat("hello world".to_string())
        );
        // a slash later in the line does not make a command
        assert_eq!(
            Request::parse("see a/b").unwrap(),
            Request::Chat("see a/b".to_string())
        );
    }

    #[test]
    fn test_blank_lines_are_empty() {
        assert_eq!(Request::parse("").unwrap(), Request::Empty);
        assert_eq!(Request::parse("   ").unwrap(), Request::Empty);
    }

    #[test]
    fn test_command_aliases() {
        assert_eq!(command("/quit"), Command::Quit);
        assert_eq!(command("/exit"), Command::Quit);
        assert_eq!(command("/who"), Command::Who);
        assert_eq!(command("/help"), Command::Help);
        assert_eq!(command("/version"), Command::Version);
        assert_eq!(command("/about"), Command::Version);
    }

    #[test]
    fn test_extra_arguments_are_ignored() {
        assert_eq!(command("/who everyone please"), Command::Who);
    }

    #[test]
    fn test_commands_are_case_sensitive() {
        assert_eq!(command("/WHO"), Command::Unknown("WHO".to_string()));
    }

    #[test]
    fn test_private_message_aliases() {
        let expected = Command::Msg {
            target: "bob".to_string(),
            message: "hello there".to_string(),
        };
        assert_eq!(command("/msg bob hello there"), expected);
        assert_eq!(command("/priv bob hello there"), expected);
        assert_eq!(command("/query   bob   hello there"), expected);
    }

    #[test]
    fn test_private_message_needs_target_and_text() {
        assert_eq!(
            Request::parse("/msg").unwrap_err(),
            RequestError::MissingArgument {
                command: "msg".to_string()
            }
        );
        assert_eq!(
            Request::parse("/query bob   ").unwrap_err(),
            RequestError::MissingArgument {
                command: "query".to_string()
            }
        );
        assert_eq!(
            Request::parse("/msg bob").unwrap_err().to_string(),
            "Usage: /msg <username> <message>"
        );
    }

    #[test]
    fn test_unknown_command_keeps_name() {
        assert_eq!(command("/dance now"), Command::Unknown("dance".to_string()));
        assert_eq!(command("/"), Command::Unknown(String::new()));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let cmd = Command::Msg {
            target: "alice".to_string(),
            message: "hi".to_string(),
        };
        assert_eq!(command(&cmd.to_string()), cmd);
    }
}
