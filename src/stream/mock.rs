//! Scripted in-memory socket for tests.
//!
//! Reads replay a queue of steps (data chunks, would-block, EOF, errors);
//! writes are captured and can be throttled, blocked or failed.

use super::socket::Socket;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::rc::Rc;

enum ReadStep {
    Data(Vec<u8>),
    WouldBlock,
    Interrupted,
    Eof,
    Fail(ErrorKind),
}

#[derive(Default)]
struct State {
    reads: VecDeque<ReadStep>,
    eof: bool,
    written: Vec<u8>,
    max_write: Option<usize>,
    blocked_writes: usize,
    write_failure: Option<ErrorKind>,
    nonblocking: bool,
}

/// Cloning yields a handle onto the same script, so a test can keep one
/// clone while the stream owns the other.
#[derive(Clone, Default)]
pub(crate) struct MockSocket {
    state: Rc<RefCell<State>>,
}

impl MockSocket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_read(&self, data: &[u8]) {
        self.state
            .borrow_mut()
            .reads
            .push_back(ReadStep::Data(data.to_vec()));
    }

    pub(crate) fn push_would_block(&self) {
        self.state.borrow_mut().reads.push_back(ReadStep::WouldBlock);
    }

    pub(crate) fn push_interrupted(&self) {
        self.state.borrow_mut().reads.push_back(ReadStep::Interrupted);
    }

    pub(crate) fn push_eof(&self) {
        self.state.borrow_mut().reads.push_back(ReadStep::Eof);
    }

    pub(crate) fn push_read_error(&self, kind: ErrorKind) {
        self.state.borrow_mut().reads.push_back(ReadStep::Fail(kind));
    }

    /// Caps how many bytes a single `write` call accepts.
    pub(crate) fn limit_writes(&self, max: usize) {
        self.state.borrow_mut().max_write = Some(max);
    }

    /// Makes the next `count` writes report would-block.
    pub(crate) fn block_writes(&self, count: usize) {
        self.state.borrow_mut().blocked_writes = count;
    }

    pub(crate) fn fail_writes(&self, kind: ErrorKind) {
        self.state.borrow_mut().write_failure = Some(kind);
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    /// Drains captured output and splits it into lines.
    pub(crate) fn take_lines(&self) -> Vec<String> {
        let written = std::mem::take(&mut self.state.borrow_mut().written);
        String::from_utf8_lossy(&written)
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub(crate) fn is_nonblocking(&self) -> bool {
        self.state.borrow().nonblocking
    }
}

impl Read for MockSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        match state.reads.pop_front() {
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    state.reads.push_front(ReadStep::Data(rest));
                }
                Ok(n)
            }
            Some(ReadStep::WouldBlock) => Err(ErrorKind::WouldBlock.into()),
            Some(ReadStep::Interrupted) => Err(ErrorKind::Interrupted.into()),
            Some(ReadStep::Fail(kind)) => Err(kind.into()),
            Some(ReadStep::Eof) => {
                state.eof = true;
                Ok(0)
            }
            None if state.eof => Ok(0),
            None => Err(ErrorKind::WouldBlock.into()),
        }
    }
}

impl Write for MockSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if let Some(kind) = state.write_failure {
            return Err(kind.into());
        }
        if state.blocked_writes > 0 {
            state.blocked_writes -= 1;
            return Err(ErrorKind::WouldBlock.into());
        }
        let n = state.max_write.map_or(buf.len(), |max| max.min(buf.len()));
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for MockSocket {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.state.borrow_mut().nonblocking = nonblocking;
        Ok(())
    }
}
