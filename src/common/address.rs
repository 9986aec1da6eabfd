// src/common/address.rs

use std::convert::TryFrom;
use std::fmt;

use super::error::Sdi12Error;

/// A single-character SDI-12 sensor address.
///
/// Valid addresses are `0-9`, `A-Z` and `a-z`; each sensor on a bus must
/// carry a unique one. The factory default is `'0'`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Sdi12Addr(char);

impl Sdi12Addr {
    pub const DEFAULT: Sdi12Addr = Sdi12Addr('0');

    /// Creates an address, rejecting characters outside the SDI-12 set.
    pub fn new(c: char) -> Result<Self, Sdi12Error> {
        if Self::is_valid(c) {
            Ok(Sdi12Addr(c))
        } else {
            Err(Sdi12Error::InvalidAddress(c))
        }
    }

    #[inline]
    pub const fn as_char(&self) -> char {
        self.0
    }

    /// The address as it appears on the wire.
    #[inline]
    pub const fn as_byte(&self) -> u8 {
        self.0 as u8
    }

    #[inline]
    pub const fn is_valid(c: char) -> bool {
        matches!(c, '0'..='9' | 'a'..='z' | 'A'..='Z')
    }
}

impl Default for Sdi12Addr {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<char> for Sdi12Addr {
    type Error = Sdi12Error;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Sdi12Addr> for char {
    fn from(value: Sdi12Addr) -> Self {
        value.0
    }
}

impl fmt::Display for Sdi12Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
