// src/lib.rs

//! Master-side driver for the SDI-12 sensor protocol.
//!
//! SDI-12 is a 1200 baud, half-duplex, ASCII-framed bus used by
//! environmental sensors. This crate implements the data recorder side:
//! it addresses sensors, commands measurements, waits out sensor-declared
//! delays, retrieves floating-point readings (optionally CRC-protected),
//! and can keep several concurrent (`C`) measurements in flight while
//! their sensors are computing.
//!
//! The physical layer is a seam: implement [`Sdi12Port`] for your UART or
//! RS-485 transceiver and hand it to [`Sdi12Dr`]. The [`mock::MockPort`]
//! implementation drives the whole stack in tests.

pub mod common;
pub mod dacq;
pub mod mock;
pub mod recorder;

pub use common::{
    CharSize, Direction, ErrorKind, ErrorRecord, LineConfig, Method, Parity, Sdi12Addr,
    Sdi12Error, Sdi12Port, SensorSpec,
};
pub use dacq::{Dacq, DacqHandle, DriverVersion, RetrieveCallback, ValueStatus};
pub use recorder::{DumpFn, Sdi12Config, Sdi12Dr, MAX_CONCURRENT_REQUESTS};
