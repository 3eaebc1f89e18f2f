//! Buffered Socket Stream
//!
//! A duplex, line-oriented wrapper around one socket descriptor. The stream
//! owns two fixed-capacity buffers and hides the partial-read and
//! partial-write mechanics of the descriptor from the protocol layer.
//!
//! ## Buffer Discipline
//!
//! ```text
//!            read()                          read_line()
//! socket ───────────> [ input: pos..len ] ───────────────> Line(bytes)
//!                      refilled only when
//!                      pos == len
//!
//!            write()                         flush()
//! caller ───────────> [ output: 0..cap ] ────────────────> socket
//!                      flushed when full
//!                      or on demand
//! ```
//!
//! ## Read Outcomes
//!
//! `read_line` never uses the error channel for expected conditions:
//!
//! - `ReadOutcome::Line` - a complete line, delimiter stripped
//! - `ReadOutcome::NotReady` - nothing more to read right now
//! - `ReadOutcome::EndOfStream` - the peer closed its side
//! - `Err(StreamError)` - a hard failure (or an oversized line)
//!
//! In non-blocking mode the first would-block result from the descriptor is
//! reported as `NotReady`. In blocking mode would-block can only come from a
//! receive timeout; the read is retried up to the configured attempt budget,
//! sleeping `retry_delay` between attempts, before `NotReady` is returned.

use super::socket::Socket;
use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, ErrorKind};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Default capacity of each buffer (4 KB)
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default number of read attempts before giving up with `NotReady`
pub const DEFAULT_READ_ATTEMPTS: u32 = 1;

/// Default pause between read attempts in blocking mode
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Sizing and retry policy for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Capacity of the input and output buffers. Also the longest line
    /// `read_line` will assemble.
    pub capacity: usize,
    /// How many times a would-block read is attempted in blocking mode
    pub read_attempts: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_SIZE,
            read_attempts: DEFAULT_READ_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Blocking mode of the underlying descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Blocking,
    NonBlocking,
}

/// Result of a successful `read_line` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One complete line without its `\n` (or `\r\n`)
    Line(Bytes),
    /// No complete line is available yet; try again on the next readiness
    NotReady,
    /// The peer closed the connection
    EndOfStream,
}

/// Result of a successful `flush` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// The output buffer is empty
    Drained,
    /// The descriptor stopped accepting bytes; the rest is still buffered
    Pending,
}

/// Errors raised by the stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Reading from the descriptor failed
    #[error("socket read error: {0}")]
    Read(#[source] io::Error),

    /// Writing to the descriptor failed
    #[error("socket write error: {0}")]
    Write(#[source] io::Error),

    /// Switching the descriptor's blocking mode failed
    #[error("unable to change blocking mode: {0}")]
    Mode(#[source] io::Error),

    /// An incoming line did not fit in the input buffer; it was discarded
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// The peer is not draining its output and the buffer is full
    #[error("output buffer full ({capacity} bytes pending)")]
    OutputFull { capacity: usize },

    /// The stream has already been closed
    #[error("stream is closed")]
    Closed,
}

impl StreamError {
    /// Whether the stream is unusable after this error.
    ///
    /// An oversized line is dropped and the stream resynchronises on the
    /// next newline, so it is the only recoverable variant.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StreamError::LineTooLong { .. })
    }
}

enum Fill {
    Filled,
    NotReady,
    EndOfStream,
}

/// A buffered, line-oriented stream over one socket.
pub struct BufferedStream<S> {
    /// The socket; `None` once closed
    socket: Option<S>,

    /// Fixed-capacity input buffer with its read cursor and valid length
    input: Box<[u8]>,
    read_pos: usize,
    read_len: usize,

    /// Bytes of the line currently being assembled
    line: BytesMut,

    /// Set while skipping the rest of an oversized line
    discarding: bool,

    /// Pending output, never grown past `capacity`
    output: BytesMut,

    capacity: usize,
    mode: ReadMode,
    read_attempts: u32,
    retry_delay: Duration,

    /// The peer has closed its side
    eof: bool,

    /// A hard I/O error was seen; the owner should tear the stream down
    broken: bool,

    bytes_read: u64,
    bytes_written: u64,
}

impl<S: Socket> BufferedStream<S> {
    /// Wraps a socket that is currently in blocking mode.
    pub fn new(socket: S, config: StreamConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            socket: Some(socket),
            input: vec![0; capacity].into_boxed_slice(),
            read_pos: 0,
            read_len: 0,
            line: BytesMut::with_capacity(capacity),
            discarding: false,
            output: BytesMut::with_capacity(capacity),
            capacity,
            mode: ReadMode::Blocking,
            read_attempts: config.read_attempts.max(1),
            retry_delay: config.retry_delay,
            eof: false,
            broken: false,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// Switches the descriptor between blocking and non-blocking mode.
    pub fn set_mode(&mut self, mode: ReadMode) -> Result<(), StreamError> {
        let socket = self.socket.as_ref().ok_or(StreamError::Closed)?;
        socket
            .set_nonblocking(mode == ReadMode::NonBlocking)
            .map_err(StreamError::Mode)?;
        self.mode = mode;
        Ok(())
    }

    /// Replaces the read retry budget.
    pub fn set_retry(&mut self, attempts: u32, delay: Duration) {
        self.read_attempts = attempts.max(1);
        self.retry_delay = delay;
    }

    /// Returns the next complete line.
    pub fn read_line(&mut self) -> Result<ReadOutcome, StreamError> {
        if self.socket.is_none() {
            return Err(StreamError::Closed);
        }

        loop {
            if let Some(line) = self.take_buffered_line()? {
                return Ok(ReadOutcome::Line(line));
            }

            if self.eof {
                return Ok(self.finish_at_eof());
            }

            match self.fill()? {
                Fill::Filled => {}
                Fill::EndOfStream => self.eof = true,
                Fill::NotReady => return Ok(ReadOutcome::NotReady),
            }
        }
    }

    /// Appends bytes to the output buffer, flushing whenever it fills.
    pub fn write(&mut self, mut data: &[u8]) -> Result<(), StreamError> {
        if self.socket.is_none() {
            return Err(StreamError::Closed);
        }

        while !data.is_empty() {
            let room = self.capacity - self.output.len();
            if room == 0 {
                self.flush()?;
                if self.output.len() == self.capacity {
                    self.broken = true;
                    return Err(StreamError::OutputFull {
                        capacity: self.capacity,
                    });
                }
                continue;
            }

            let take = room.min(data.len());
            self.output.extend_from_slice(&data[..take]);
            data = &data[take..];
        }

        Ok(())
    }

    /// Writes `line` followed by a newline.
    pub fn write_line(&mut self, line: &[u8]) -> Result<(), StreamError> {
        self.write(line)?;
        self.write(b"\n")
    }

    /// Pushes buffered output to the descriptor now.
    pub fn flush(&mut self) -> Result<FlushStatus, StreamError> {
        let socket = self.socket.as_mut().ok_or(StreamError::Closed)?;
        let mut attempt = 0;

        while !self.output.is_empty() {
            match socket.write(&self.output) {
                Ok(0) => {
                    self.broken = true;
                    return Err(StreamError::Write(ErrorKind::WriteZero.into()));
                }
                Ok(n) => {
                    self.output.advance(n);
                    self.bytes_written += n as u64;
                    trace!(bytes = n, pending = self.output.len(), "Flushed output");
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    attempt += 1;
                    if self.mode == ReadMode::NonBlocking || attempt >= self.read_attempts {
                        return Ok(FlushStatus::Pending);
                    }
                    thread::sleep(self.retry_delay);
                }
                Err(e) => {
                    self.broken = true;
                    return Err(StreamError::Write(e));
                }
            }
        }

        Ok(FlushStatus::Drained)
    }

    /// Flushes what it can, closes the descriptor and resets both buffers.
    ///
    /// Calling this again is a no-op.
    pub fn close(&mut self) {
        if self.socket.is_some() && !self.broken {
            if let Err(e) = self.flush() {
                trace!(error = %e, "Discarding output on close");
            }
        }
        self.socket = None;
        self.read_pos = 0;
        self.read_len = 0;
        self.line.clear();
        self.output.clear();
        self.discarding = false;
    }

    /// Borrows the socket, if still open.
    pub fn get_ref(&self) -> Option<&S> {
        self.socket.as_ref()
    }

    /// Mutably borrows the socket, if still open. Bytes read or written
    /// through it bypass the buffers.
    pub fn get_mut(&mut self) -> Option<&mut S> {
        self.socket.as_mut()
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Whether a fatal error has been observed.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Scans the unread part of the input buffer for the end of a line.
    fn take_buffered_line(&mut self) -> Result<Option<Bytes>, StreamError> {
        while self.read_pos < self.read_len {
            let available = &self.input[self.read_pos..self.read_len];

            match available.iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    let segment = &available[..idx];
                    self.read_pos += idx + 1;

                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if self.line.len() + segment.len() > self.capacity {
                        self.line.clear();
                        return Err(StreamError::LineTooLong {
                            limit: self.capacity,
                        });
                    }

                    self.line.extend_from_slice(segment);
                    return Ok(Some(strip_cr(self.line.split().freeze())));
                }
                None => {
                    self.read_pos = self.read_len;

                    if self.discarding {
                        continue;
                    }
                    if self.line.len() + available.len() > self.capacity {
                        self.line.clear();
                        self.discarding = true;
                        return Err(StreamError::LineTooLong {
                            limit: self.capacity,
                        });
                    }

                    self.line.extend_from_slice(available);
                }
            }
        }

        Ok(None)
    }

    /// Refills the input buffer. Only called once it is fully consumed.
    fn fill(&mut self) -> Result<Fill, StreamError> {
        let socket = self.socket.as_mut().ok_or(StreamError::Closed)?;
        let mut attempt = 0;

        loop {
            match socket.read(&mut self.input) {
                Ok(0) => {
                    trace!("Read end of stream");
                    return Ok(Fill::EndOfStream);
                }
                Ok(n) => {
                    self.read_pos = 0;
                    self.read_len = n;
                    self.bytes_read += n as u64;
                    trace!(bytes = n, "Read data");
                    return Ok(Fill::Filled);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    attempt += 1;
                    if self.mode == ReadMode::NonBlocking || attempt >= self.read_attempts {
                        return Ok(Fill::NotReady);
                    }
                    thread::sleep(self.retry_delay);
                }
                Err(e) => {
                    self.broken = true;
                    return Err(StreamError::Read(e));
                }
            }
        }
    }

    fn finish_at_eof(&mut self) -> ReadOutcome {
        if self.discarding {
            self.discarding = false;
            self.line.clear();
        }
        if self.line.is_empty() {
            ReadOutcome::EndOfStream
        } else {
            ReadOutcome::Line(strip_cr(self.line.split().freeze()))
        }
    }
}

fn strip_cr(mut line: Bytes) -> Bytes {
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    line
}
