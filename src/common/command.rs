// src/common/command.rs

use std::fmt;
use std::time::Duration;

use super::address::Sdi12Addr;
use super::error::Sdi12Error;
use super::timing::LONGEST_COMMAND;

/// Measurement method of a sampling request, i.e. which start command goes
/// on the wire.
///
/// The ASCII identity of each method is confined to [`Method::as_byte`];
/// nothing else in the crate does character arithmetic on methods.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Method {
    /// `aM!` family: exclusive two-step measurement with service request.
    Measure,
    /// `aC!` family: concurrent measurement, bus free while computing.
    Concurrent,
    /// `aR!` family: continuous measurement, values returned immediately.
    Continuous,
    /// `aV!`: verification (self-test) measurement.
    Verify,
}

impl Method {
    /// The method letter as transmitted.
    pub const fn as_byte(self) -> u8 {
        match self {
            Method::Measure => b'M',
            Method::Concurrent => b'C',
            Method::Continuous => b'R',
            Method::Verify => b'V',
        }
    }

    /// Whether this method uses the start/service-request/send-data
    /// two-step, as opposed to answering with values directly.
    pub const fn is_two_step(self) -> bool {
        !matches!(self, Method::Continuous)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

/// Caller-visible description of one sampling request.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SensorSpec {
    pub address: Sdi12Addr,
    pub method: Method,
    /// Additional measurement index `0..=9`; `0` selects the unnumbered
    /// command (`aM!` rather than `aM1!`). For `Continuous` this is the
    /// mandatory `Rn` digit.
    pub index: u8,
    /// Request and verify the three-character CRC on data responses.
    /// Ignored for `Verify`, which has no CRC command variant.
    pub use_crc: bool,
    /// Upper bound on the sensor-declared measurement delay the caller is
    /// willing to sit out; a longer declaration fails with `Timeout`.
    pub max_wait: Option<Duration>,
}

impl SensorSpec {
    pub fn new(address: Sdi12Addr, method: Method) -> Self {
        SensorSpec {
            address,
            method,
            index: 0,
            use_crc: false,
            max_wait: None,
        }
    }

    pub fn with_index(mut self, index: u8) -> Self {
        self.index = index;
        self
    }

    pub fn with_crc(mut self, use_crc: bool) -> Self {
        self.use_crc = use_crc;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub(crate) fn validate<E: std::fmt::Debug>(&self) -> Result<(), Sdi12Error<E>> {
        if self.index > 9 {
            return Err(Sdi12Error::InvalidIndex(self.index));
        }
        Ok(())
    }
}

/// An encoded command: the exact bytes that go on the wire, ending in `!`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CmdBytes {
    buf: [u8; LONGEST_COMMAND],
    len: usize,
}

impl CmdBytes {
    fn new() -> Self {
        CmdBytes {
            buf: [0; LONGEST_COMMAND],
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        self.buf[self.len] = byte;
        self.len += 1;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for CmdBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// A protocol command this driver can issue.
///
/// Transparent (`aX…!`) transfers bypass this enum: they are raw caller
/// bytes handed straight to the transaction engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Command {
    /// Acknowledge Active (`a!`).
    AcknowledgeActive { address: Sdi12Addr },
    /// Send Identification (`aI!`).
    SendIdentification { address: Sdi12Addr },
    /// Change Address (`aAb!`).
    ChangeAddress {
        address: Sdi12Addr,
        new_address: Sdi12Addr,
    },
    /// Start Measurement / Concurrent / Verify (`aM!`, `aMC3!`, `aC!`,
    /// `aCC1!`, `aV!`, ...), derived from a [`SensorSpec`].
    StartMeasurement {
        address: Sdi12Addr,
        method: Method,
        index: u8,
        use_crc: bool,
    },
    /// Send Data (`aD0!`..`aD9!`).
    SendData { address: Sdi12Addr, index: u8 },
    /// Read Continuous (`aR0!`..`aR9!`, `aRC0!`..`aRC9!`).
    ReadContinuous {
        address: Sdi12Addr,
        index: u8,
        use_crc: bool,
    },
}

impl Command {
    /// Builds the start command for a sampling request. `Continuous`
    /// requests map onto [`Command::ReadContinuous`] instead.
    pub fn start_for(spec: &SensorSpec) -> Self {
        match spec.method {
            Method::Continuous => Command::ReadContinuous {
                address: spec.address,
                index: spec.index,
                use_crc: spec.use_crc,
            },
            Method::Verify => Command::StartMeasurement {
                address: spec.address,
                method: Method::Verify,
                index: 0,
                use_crc: false,
            },
            method => Command::StartMeasurement {
                address: spec.address,
                method,
                index: spec.index,
                use_crc: spec.use_crc,
            },
        }
    }

    /// The sensor this command is addressed to.
    pub fn address(&self) -> Sdi12Addr {
        match *self {
            Command::AcknowledgeActive { address }
            | Command::SendIdentification { address }
            | Command::ChangeAddress { address, .. }
            | Command::StartMeasurement { address, .. }
            | Command::SendData { address, .. }
            | Command::ReadContinuous { address, .. } => address,
        }
    }

    /// Encodes the command into its wire bytes.
    pub fn encode(&self) -> CmdBytes {
        let mut out = CmdBytes::new();
        out.push(self.address().as_byte());
        match *self {
            Command::AcknowledgeActive { .. } => {}
            Command::SendIdentification { .. } => out.push(b'I'),
            Command::ChangeAddress { new_address, .. } => {
                out.push(b'A');
                out.push(new_address.as_byte());
            }
            Command::StartMeasurement {
                method,
                index,
                use_crc,
                ..
            } => {
                out.push(method.as_byte());
                if use_crc {
                    out.push(b'C');
                }
                if index > 0 {
                    out.push(b'0' + index);
                }
            }
            Command::SendData { index, .. } => {
                out.push(b'D');
                out.push(b'0' + index);
            }
            Command::ReadContinuous { index, use_crc, .. } => {
                out.push(b'R');
                if use_crc {
                    out.push(b'C');
                }
                out.push(b'0' + index);
            }
        }
        out.push(b'!');
        out
    }
}
