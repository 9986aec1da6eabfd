// src/mock.rs

//! A scripted in-memory [`Sdi12Port`] for tests and host-side development.
//!
//! Responses are keyed by the exact command bytes: each time the driver
//! writes a command, the next scripted response for it is loaded into the
//! read queue, one chunk per `read` call. Unsolicited traffic (service
//! requests) can be staged directly. Writes, breaks, flushes and timeout
//! changes are logged through a shared handle so tests can assert on them
//! after the port has moved into a driver.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::common::error::Sdi12Error;
use crate::common::frame::LineConfig;
use crate::common::port::Sdi12Port;

/// I/O error produced by [`MockPort`] when a fault is injected.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MockIoError(pub &'static str);

/// Activity log of a [`MockPort`], shared via [`MockPort::log`].
#[derive(Debug, Default)]
pub struct MockLog {
    /// Every write, verbatim.
    pub writes: Vec<Vec<u8>>,
    /// Duration of every break sent.
    pub breaks: Vec<Duration>,
    /// Number of `flush_io` calls.
    pub flushes: usize,
    /// History of `set_read_timeout` values, the line config's initial
    /// timeout included.
    pub read_timeouts: Vec<Duration>,
}

#[derive(Default)]
pub struct MockPort {
    open: bool,
    responses: HashMap<Vec<u8>, VecDeque<Vec<Vec<u8>>>>,
    read_queue: VecDeque<Vec<u8>>,
    log: Arc<Mutex<MockLog>>,
    fail_writes: bool,
    fail_open: bool,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts one response frame for the next occurrence of `command`.
    /// Repeated calls for the same command queue up in order.
    pub fn on(&mut self, command: &str, response: &str) {
        self.on_chunks(command, &[response]);
    }

    /// Scripts a response delivered in several read chunks. Chunks beyond
    /// the first frame stay queued and serve later reads (e.g. a service
    /// request following a start-measurement answer).
    pub fn on_chunks(&mut self, command: &str, chunks: &[&str]) {
        self.responses
            .entry(command.as_bytes().to_vec())
            .or_default()
            .push_back(chunks.iter().map(|c| c.as_bytes().to_vec()).collect());
    }

    /// Stages unsolicited bytes, readable without a preceding write.
    pub fn stage(&mut self, chunk: &str) {
        self.read_queue.push_back(chunk.as_bytes().to_vec());
    }

    /// Shared handle onto the activity log.
    pub fn log(&self) -> Arc<Mutex<MockLog>> {
        Arc::clone(&self.log)
    }

    /// Makes every subsequent write fail with an I/O error.
    pub fn fail_writes(&mut self) {
        self.fail_writes = true;
    }

    /// Makes `open` fail.
    pub fn fail_open(&mut self) {
        self.fail_open = true;
    }
}

impl Sdi12Port for MockPort {
    type Error = MockIoError;

    fn open(&mut self, config: &LineConfig) -> Result<(), Sdi12Error<Self::Error>> {
        if self.fail_open {
            return Err(Sdi12Error::TtyOpen);
        }
        self.open = true;
        self.log.lock().read_timeouts.push(config.read_timeout);
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, Sdi12Error<Self::Error>> {
        if self.fail_writes {
            return Err(Sdi12Error::Io(MockIoError("write fault")));
        }
        self.log.lock().writes.push(bytes.to_vec());
        if let Some(queue) = self.responses.get_mut(bytes) {
            if let Some(chunks) = queue.pop_front() {
                self.read_queue.extend(chunks);
            }
        }
        Ok(bytes.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Sdi12Error<Self::Error>> {
        match self.read_queue.pop_front() {
            None => Ok(0),
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    // Caller's buffer was smaller than the chunk: the rest
                    // remains available for the next read.
                    chunk.drain(..n);
                    self.read_queue.push_front(chunk);
                }
                Ok(n)
            }
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), Sdi12Error<Self::Error>> {
        self.log.lock().read_timeouts.push(timeout);
        Ok(())
    }

    fn flush_io(&mut self) -> Result<(), Sdi12Error<Self::Error>> {
        self.read_queue.clear();
        self.log.lock().flushes += 1;
        Ok(())
    }

    fn send_break(&mut self, duration: Duration) -> Result<(), Sdi12Error<Self::Error>> {
        self.log.lock().breaks.push(duration);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_responses_follow_writes() {
        let mut port = MockPort::new();
        port.on("0!", "0\r\n");
        port.open(&LineConfig::default()).unwrap();

        let mut buf = [0u8; 16];
        // Nothing before the write.
        assert_eq!(port.read(&mut buf).unwrap(), 0);
        port.write(b"0!").unwrap();
        let n = port.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"0\r\n");
        // Consumed: a second identical write has no scripted answer.
        port.write(b"0!").unwrap();
        assert_eq!(port.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn oversized_chunks_are_split_across_reads() {
        let mut port = MockPort::new();
        port.stage("abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(port.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(port.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn flush_discards_pending_input() {
        let mut port = MockPort::new();
        port.stage("stale");
        port.flush_io().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(port.read(&mut buf).unwrap(), 0);
        assert_eq!(port.log().lock().flushes, 1);
    }

    #[test]
    fn injected_faults_surface_as_errors() {
        let mut port = MockPort::new();
        port.fail_open();
        assert!(matches!(
            port.open(&LineConfig::default()),
            Err(Sdi12Error::TtyOpen)
        ));

        let mut port = MockPort::new();
        port.fail_writes();
        assert!(matches!(
            port.write(b"0!"),
            Err(Sdi12Error::Io(MockIoError("write fault")))
        ));
    }
}
