// src/common/response.rs

use std::fmt::Debug;
use std::str::FromStr;
use std::time::Duration;

use super::address::Sdi12Addr;
use super::crc::verify_response_crc_ascii;
use super::error::Sdi12Error;

/// The validated payload of a response: everything between the echoed
/// address and the (already verified and stripped) CRC / `<CR><LF>` tail.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PayloadSlice<'a>(pub &'a [u8]);

impl<'a> PayloadSlice<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn as_str(&self) -> Result<&'a str, std::str::Utf8Error> {
        std::str::from_utf8(self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> AsRef<[u8]> for PayloadSlice<'a> {
    fn as_ref(&self) -> &[u8] {
        self.0
    }
}

/// Validates a raw response frame and strips the framing.
///
/// Checks the `<CR><LF>` terminator, the echoed address, and (when
/// `with_crc` is set) the three-character CRC tail. Returns the payload
/// between address and tail.
pub fn expect_frame<'a, E>(
    frame: &'a [u8],
    address: Sdi12Addr,
    with_crc: bool,
) -> Result<PayloadSlice<'a>, Sdi12Error<E>>
where
    E: Debug,
{
    // Shortest legal frame is the bare acknowledge `a<CR><LF>`.
    if frame.len() < 3 {
        return Err(Sdi12Error::InvalidFormat);
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    if tail != b"\r\n" {
        return Err(Sdi12Error::InvalidFormat);
    }

    if body[0] != address.as_byte() {
        return Err(Sdi12Error::UnexpectedAnswer);
    }

    let payload = if with_crc {
        if body.len() < 1 + 3 {
            return Err(Sdi12Error::InvalidFormat);
        }
        // The CRC covers the address byte as well.
        verify_response_crc_ascii(body)?;
        &body[1..body.len() - 3]
    } else {
        &body[1..]
    };

    Ok(PayloadSlice(payload))
}

/// Delay and value count declared by a start-measurement response
/// (`attt n<CR><LF>`, `atttnn<CR><LF>` for concurrent).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MeasurementTiming {
    /// Seconds until the data is ready, `0..=999`.
    pub delay_seconds: u16,
    /// Number of values the sensor will return.
    pub values: u16,
}

impl MeasurementTiming {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.delay_seconds))
    }
}

fn ascii_number(digits: &[u8]) -> Option<u16> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let mut value = 0u16;
    for d in digits {
        value = value.checked_mul(10)?.checked_add(u16::from(d - b'0'))?;
    }
    Some(value)
}

/// Parses the payload of a start-measurement response (address already
/// stripped): three delay digits followed by one or two count digits.
pub fn parse_timing<E>(payload: &[u8]) -> Result<MeasurementTiming, Sdi12Error<E>>
where
    E: Debug,
{
    // Full frame is at least `attt n<CR><LF>` = 7 bytes, so the payload
    // carries at least four.
    if payload.len() < 4 || payload.len() > 6 {
        return Err(Sdi12Error::InvalidFormat);
    }
    let delay_seconds = ascii_number(&payload[..3]).ok_or(Sdi12Error::InvalidFormat)?;
    let values = ascii_number(&payload[3..]).ok_or(Sdi12Error::InvalidFormat)?;
    Ok(MeasurementTiming { delay_seconds, values })
}

/// Parses one `p[d.d]` value field: mandatory sign, up to seven digits,
/// at most one decimal point, at most nine characters in total.
pub fn parse_value<E>(token: &[u8]) -> Result<f32, Sdi12Error<E>>
where
    E: Debug,
{
    if token.len() < 2 || token.len() > 9 {
        return Err(Sdi12Error::ConversionToFloat);
    }
    let sign = match token[0] {
        b'+' => 1.0f32,
        b'-' => -1.0f32,
        _ => return Err(Sdi12Error::ConversionToFloat),
    };
    let rest = &token[1..];

    let mut digits = 0;
    let mut decimal_seen = false;
    for byte in rest {
        match byte {
            b'0'..=b'9' => digits += 1,
            b'.' if !decimal_seen => decimal_seen = true,
            _ => return Err(Sdi12Error::ConversionToFloat),
        }
    }
    if digits == 0 || digits > 7 {
        return Err(Sdi12Error::ConversionToFloat);
    }

    let text = std::str::from_utf8(rest).map_err(|_| Sdi12Error::ConversionToFloat)?;
    let magnitude = f32::from_str(text).map_err(|_| Sdi12Error::ConversionToFloat)?;
    Ok(sign * magnitude)
}

/// Parses the sign-delimited value fields of a data response payload into
/// `out`, greedily from the start.
///
/// Returns the number of values written. Parsing stops early once `out` is
/// full; surplus fields are ignored. A payload that does not start with a
/// sign, or a field that is not a well-formed value, fails with
/// `ConversionToFloat`.
pub fn parse_values<E>(payload: &[u8], out: &mut [f32]) -> Result<usize, Sdi12Error<E>>
where
    E: Debug,
{
    if payload.is_empty() {
        return Ok(0);
    }
    if payload[0] != b'+' && payload[0] != b'-' {
        return Err(Sdi12Error::ConversionToFloat);
    }

    let mut written = 0;
    let mut start = 0;
    while start < payload.len() {
        if written >= out.len() {
            break;
        }
        let end = payload[start + 1..]
            .iter()
            .position(|b| *b == b'+' || *b == b'-')
            .map(|p| start + 1 + p)
            .unwrap_or(payload.len());
        out[written] = parse_value(&payload[start..end])?;
        written += 1;
        start = end;
    }
    Ok(written)
}
