// src/common/frame.rs

use std::time::Duration;

/// Character size of the serial line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CharSize {
    Seven,
    Eight,
}

/// Parity of the serial line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Serial line configuration handed to [`Sdi12Port::open`].
///
/// The default is the SDI-12 wire format: 1200 baud, 7 data bits, even
/// parity, one stop bit, with a 50 ms inter-character receive timeout.
///
/// [`Sdi12Port::open`]: super::port::Sdi12Port::open
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LineConfig {
    pub baud: u32,
    pub char_size: CharSize,
    pub parity: Parity,
    /// Inter-character receive timeout: a read returns once no further byte
    /// arrives within this interval.
    pub read_timeout: Duration,
}

impl Default for LineConfig {
    fn default() -> Self {
        LineConfig {
            baud: 1200,
            char_size: CharSize::Seven,
            parity: Parity::Even,
            read_timeout: Duration::from_millis(50),
        }
    }
}
