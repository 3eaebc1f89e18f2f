//! Chat Line Protocol
//!
//! Newline-delimited UTF-8 text over a Unix-domain stream socket. There is no
//! framing beyond the newline, so no message may contain one.
//!
//! ## Modules
//!
//! - `request`: parses client lines into commands or chat text
//! - `reply`: the server's output lines and their rendering prefixes
//!
//! ## Example
//!
//! ```
//! use huddle::protocol::{Command, Reply, Request};
//!
//! let request = Request::parse("/msg bob hello").unwrap();
//! assert_eq!(
//!     request,
//!     Request::Command(Command::Msg { target: "bob".into(), message: "hello".into() })
//! );
//!
//! let line = Reply::private_received("alice", "hello").to_string();
//! assert_eq!(line, "! alice: hello");
//! ```

pub mod reply;
pub mod request;

// Re-export commonly used types for convenience
pub use reply::Reply;
pub use request::{Command, Request, RequestError};
