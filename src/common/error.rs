// src/common/error.rs

use std::fmt::Debug;

/// Driver error, generic over the port implementation's I/O error type.
///
/// The set is closed: every failure a public operation can report is one of
/// these variants, and each maps onto a fieldless [`ErrorKind`] for the
/// per-driver last-error record.
#[derive(Debug, thiserror::Error)]
pub enum Sdi12Error<E = ()>
where
    E: Debug,
{
    /// Read/write failure reported by the underlying port.
    #[error("tty i/o error: {0:?}")]
    Io(E),

    /// `open` called while the port is already open.
    #[error("tty already in use")]
    TtyInUse,

    /// The port could not be opened.
    #[error("tty could not be opened")]
    TtyOpen,

    /// Line attribute change (timeouts, framing) failed.
    #[error("tty attribute set/get failed")]
    TtyAttr,

    /// The bus mutex could not be taken within the lock timeout.
    #[error("bus busy")]
    DacqBusy,

    /// The sensor did not answer within the full retry budget.
    #[error("sensor timed out")]
    Timeout,

    /// A well-formed frame arrived from the wrong sensor, or the response
    /// does not match the command that was sent.
    #[error("unexpected answer")]
    UnexpectedAnswer,

    /// Character outside the SDI-12 address set.
    #[error("invalid SDI-12 address: {0:?}")]
    InvalidAddress(char),

    /// A concurrent request for this address is already in flight.
    #[error("sensor busy")]
    SensorBusy,

    /// All concurrent scheduler slots are occupied.
    #[error("too many concurrent requests")]
    TooManyRequests,

    /// Measurement index outside `0..=9`.
    #[error("invalid index: {0}")]
    InvalidIndex(u8),

    /// Response CRC does not match the locally computed one.
    #[error("crc error: expected {expected:#06x}, calculated {calculated:#06x}")]
    CrcMismatch { expected: u16, calculated: u16 },

    /// A value field in a data response could not be parsed as a float.
    #[error("conversion to float error")]
    ConversionToFloat,

    /// The sensor declared zero measurement values.
    #[error("no valid data from sensor")]
    NoSensorData,

    /// Caller-supplied buffer is too small for the response.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },

    /// Frame-level violation: missing `<CR><LF>`, truncated response,
    /// oversized frame.
    #[error("invalid response format")]
    InvalidFormat,

    /// Operation not provided by this driver.
    #[error("operation not supported")]
    Unsupported,
}

impl<E: Debug> Sdi12Error<E> {
    /// The fieldless classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Sdi12Error::Io(_) => ErrorKind::TtyError,
            Sdi12Error::TtyInUse => ErrorKind::TtyInUse,
            Sdi12Error::TtyOpen => ErrorKind::TtyOpen,
            Sdi12Error::TtyAttr => ErrorKind::TtyAttr,
            Sdi12Error::DacqBusy => ErrorKind::DacqBusy,
            Sdi12Error::Timeout => ErrorKind::Timeout,
            Sdi12Error::UnexpectedAnswer => ErrorKind::UnexpectedAnswer,
            Sdi12Error::InvalidAddress(_) => ErrorKind::InvalidAddress,
            Sdi12Error::SensorBusy => ErrorKind::SensorBusy,
            Sdi12Error::TooManyRequests => ErrorKind::TooManyRequests,
            Sdi12Error::InvalidIndex(_) => ErrorKind::InvalidIndex,
            Sdi12Error::CrcMismatch { .. } => ErrorKind::CrcError,
            Sdi12Error::ConversionToFloat => ErrorKind::ConversionToFloatError,
            Sdi12Error::NoSensorData => ErrorKind::NoSensorData,
            Sdi12Error::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            Sdi12Error::InvalidFormat => ErrorKind::InvalidFormat,
            Sdi12Error::Unsupported => ErrorKind::Unsupported,
        }
    }

    /// True for failures the orchestrator retries after forcing a break.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            Sdi12Error::Timeout
                | Sdi12Error::UnexpectedAnswer
                | Sdi12Error::CrcMismatch { .. }
                | Sdi12Error::InvalidFormat
        )
    }
}

/// Fieldless error classification, used for the last-error record.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Ok,
    TtyInUse,
    TtyOpen,
    TtyAttr,
    TtyError,
    DacqBusy,
    Timeout,
    UnexpectedAnswer,
    InvalidAddress,
    SensorBusy,
    TooManyRequests,
    InvalidIndex,
    CrcError,
    ConversionToFloatError,
    NoSensorData,
    BufferTooSmall,
    InvalidFormat,
    Unsupported,
}

impl ErrorKind {
    /// Human-readable description.
    pub const fn description(self) -> &'static str {
        match self {
            ErrorKind::Ok => "no error",
            ErrorKind::TtyInUse => "tty already in use",
            ErrorKind::TtyOpen => "tty could not be opened",
            ErrorKind::TtyAttr => "tty attribute set/get failed",
            ErrorKind::TtyError => "tty i/o error",
            ErrorKind::DacqBusy => "bus busy",
            ErrorKind::Timeout => "sensor timed out",
            ErrorKind::UnexpectedAnswer => "unexpected answer",
            ErrorKind::InvalidAddress => "invalid address",
            ErrorKind::SensorBusy => "sensor busy",
            ErrorKind::TooManyRequests => "too many concurrent requests",
            ErrorKind::InvalidIndex => "invalid index",
            ErrorKind::CrcError => "crc error",
            ErrorKind::ConversionToFloatError => "conversion to float error",
            ErrorKind::NoSensorData => "no valid data from sensor",
            ErrorKind::BufferTooSmall => "buffer too small",
            ErrorKind::InvalidFormat => "invalid response format",
            ErrorKind::Unsupported => "operation not supported",
        }
    }
}

/// Snapshot of the most recent error of a driver instance.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub text: &'static str,
}

impl ErrorRecord {
    pub const fn ok() -> Self {
        ErrorRecord {
            kind: ErrorKind::Ok,
            text: ErrorKind::Ok.description(),
        }
    }

    pub fn from_kind(kind: ErrorKind) -> Self {
        ErrorRecord {
            kind,
            text: kind.description(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.kind == ErrorKind::Ok
    }
}

impl Default for ErrorRecord {
    fn default() -> Self {
        Self::ok()
    }
}

impl<E: Debug> From<&Sdi12Error<E>> for ErrorRecord {
    fn from(err: &Sdi12Error<E>) -> Self {
        ErrorRecord::from_kind(err.kind())
    }
}
