// src/common/port.rs

use std::fmt::Debug;
use std::time::Duration;

use super::error::Sdi12Error;
use super::frame::LineConfig;

/// Direction tag handed to the protocol dump hook.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    Tx,
    Rx,
}

/// Half-duplex byte port the driver runs on.
///
/// This is the seam towards the platform's UART/termios layer; the crate
/// ships no hardware implementation, only [`mock::MockPort`] for tests.
/// Implementations are expected to behave like a tty in raw mode:
///
/// * [`read`](Sdi12Port::read) returns whatever has been received once no
///   further byte arrives within the configured inter-character timeout,
///   possibly zero bytes,
/// * [`write`](Sdi12Port::write) queues bytes for transmission and returns
///   without waiting for line idle,
/// * [`send_break`](Sdi12Port::send_break) holds the line in spacing for
///   the given duration (at least 12 ms for SDI-12).
///
/// [`mock::MockPort`]: crate::mock::MockPort
pub trait Sdi12Port {
    /// Implementation-specific I/O error, surfaced as [`Sdi12Error::Io`].
    type Error: Debug;

    /// Opens and configures the line. Fails with [`Sdi12Error::TtyOpen`] if
    /// the device cannot be opened and [`Sdi12Error::TtyAttr`] if it cannot
    /// be configured.
    fn open(&mut self, config: &LineConfig) -> Result<(), Sdi12Error<Self::Error>>;

    /// Closes the line. Closing an already closed port is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Transmits `bytes`, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Sdi12Error<Self::Error>>;

    /// Reads into `buf`, returning the number of bytes received before the
    /// inter-character timeout expired. Zero means nothing arrived.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Sdi12Error<Self::Error>>;

    /// Changes the inter-character read timeout. The caller is responsible
    /// for restoring the previous value.
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), Sdi12Error<Self::Error>>;

    /// Discards both the input and output queues.
    fn flush_io(&mut self) -> Result<(), Sdi12Error<Self::Error>>;

    /// Pulls the line low for `duration`.
    fn send_break(&mut self, duration: Duration) -> Result<(), Sdi12Error<Self::Error>>;
}
