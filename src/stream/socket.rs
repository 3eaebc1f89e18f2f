//! Socket abstraction underneath the buffered stream.
//!
//! The stream only needs byte-level `Read`/`Write` plus the ability to flip
//! the descriptor between blocking and non-blocking mode. Keeping that behind
//! a trait lets the line-assembly and flush logic run against scripted sockets
//! in tests.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;

/// A duplex byte channel whose blocking mode can be switched.
pub trait Socket: Read + Write {
    /// Sets or clears `O_NONBLOCK` on the underlying descriptor.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;
}

impl Socket for UnixStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        UnixStream::set_nonblocking(self, nonblocking)
    }
}
