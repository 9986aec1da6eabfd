// src/common/mod.rs

pub mod address;
pub mod command;
pub mod crc;
pub mod error;
pub mod frame;
pub mod port;
pub mod response;
pub mod timing;

pub use address::Sdi12Addr;
pub use command::{Command, Method, SensorSpec};
pub use crc::{calculate_crc16, decode_crc_ascii, encode_crc_ascii, verify_response_crc_ascii};
pub use error::{ErrorKind, ErrorRecord, Sdi12Error};
pub use frame::{CharSize, LineConfig, Parity};
pub use port::{Direction, Sdi12Port};
pub use response::{MeasurementTiming, PayloadSlice};
