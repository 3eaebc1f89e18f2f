//! Buffered Socket Stream Module
//!
//! This module gives the protocol layer a line-oriented read/write interface
//! over one socket descriptor while hiding partial reads and writes.
//!
//! ## Modules
//!
//! - `socket`: the `Socket` trait the stream is generic over
//! - `buffered`: `BufferedStream` with its fixed-capacity buffers
//!
//! ## Example
//!
//! ```no_run
//! use huddle::stream::{BufferedStream, ReadMode, ReadOutcome, StreamConfig};
//! use std::os::unix::net::UnixStream;
//!
//! let socket = UnixStream::connect("/var/lib/huddle/sock").unwrap();
//! let mut stream = BufferedStream::new(socket, StreamConfig::default());
//!
//! stream.write_line(b"/who").unwrap();
//! stream.flush().unwrap();
//!
//! stream.set_mode(ReadMode::NonBlocking).unwrap();
//! match stream.read_line().unwrap() {
//!     ReadOutcome::Line(line) => println!("{}", String::from_utf8_lossy(&line)),
//!     ReadOutcome::NotReady => println!("nothing yet"),
//!     ReadOutcome::EndOfStream => println!("server went away"),
//! }
//! ```

pub mod buffered;
pub mod socket;

#[cfg(test)]
pub(crate) mod mock;

pub use buffered::{
    BufferedStream, FlushStatus, ReadMode, ReadOutcome, StreamConfig, StreamError,
    DEFAULT_BUFFER_SIZE,
};
pub use socket::Socket;
