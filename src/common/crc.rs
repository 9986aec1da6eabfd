// src/common/crc.rs

use crc::{Algorithm, Crc};

use super::error::Sdi12Error;

/// CRC algorithm from the SDI-12 specification, i.e. CRC-16/ARC.
/// Polynomial: 0x8005 (0xA001 reversed), initial value 0, input and output
/// reflected, no final XOR. Check value 0xBB3D for "123456789".
pub const SDI12_CRC: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x8005,
    init: 0x0000,
    refin: true,
    refout: true,
    xorout: 0x0000,
    check: 0xBB3D,
    residue: 0x0000,
};

const CRC_COMPUTER: Crc<u16> = Crc::<u16>::new(&SDI12_CRC);

/// Calculates the SDI-12 CRC-16 over `data`, which covers everything from
/// the address byte up to (not including) the CRC characters and `<CR><LF>`.
#[inline]
pub fn calculate_crc16(data: &[u8]) -> u16 {
    CRC_COMPUTER.checksum(data)
}

/// Encodes a CRC into the three printable ASCII characters of Sec 4.4.12.2:
/// three 6-bit groups, most significant first, each ORed with 0x40.
pub fn encode_crc_ascii(crc_value: u16) -> [u8; 3] {
    [
        0x40 | ((crc_value >> 12) & 0x3F) as u8,
        0x40 | ((crc_value >> 6) & 0x3F) as u8,
        0x40 | (crc_value & 0x3F) as u8,
    ]
}

/// Decodes three ASCII CRC characters back into the 16-bit value.
///
/// # Panics
///
/// Panics if `crc_chars` is not exactly 3 bytes long.
pub fn decode_crc_ascii(crc_chars: &[u8]) -> u16 {
    assert_eq!(crc_chars.len(), 3, "ASCII CRC must be 3 bytes long");
    (u16::from(crc_chars[0] & 0x3F) << 12)
        | (u16::from(crc_chars[1] & 0x3F) << 6)
        | u16::from(crc_chars[2] & 0x3F)
}

/// Verifies a response whose last three bytes are the ASCII CRC.
///
/// `response_with_crc` starts at the address byte and must not include the
/// trailing `<CR><LF>`.
pub fn verify_response_crc_ascii<E>(response_with_crc: &[u8]) -> Result<(), Sdi12Error<E>>
where
    E: std::fmt::Debug,
{
    if response_with_crc.len() < 3 {
        return Err(Sdi12Error::InvalidFormat);
    }
    let (data_part, received) = response_with_crc.split_at(response_with_crc.len() - 3);

    let calculated = calculate_crc16(data_part);
    let expected = decode_crc_ascii(received);

    if calculated == expected {
        Ok(())
    } else {
        Err(Sdi12Error::CrcMismatch { expected, calculated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bitwise CRC as written out in the SDI-12 standard: for each byte,
    /// XOR into the accumulator, then eight LSB-first shift/XOR rounds with
    /// polynomial 0xA001.
    fn crc_reference_loop(initial: u16, data: &[u8]) -> u16 {
        let mut crc = initial;
        for byte in data {
            crc ^= u16::from(*byte);
            for _ in 0..8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xA001;
                } else {
                    crc >>= 1;
                }
            }
        }
        crc
    }

    #[test]
    fn matches_the_bitwise_reference() {
        for data in [
            b"123456789".as_slice(),
            b"0+3.14",
            b"0+1.23+4.56-0.78",
            b"",
            b"A-0.00045+2.223",
        ] {
            assert_eq!(calculate_crc16(data), crc_reference_loop(0, data));
        }
    }

    // Worked examples from SDI-12 spec v1.4 Sec 4.4.12.3.

    #[test]
    fn spec_example_single_value() {
        // "0D0!0+3.14OqZ<CR><LF>"
        let data = b"0+3.14";
        let expected = decode_crc_ascii(b"OqZ");
        assert_eq!(calculate_crc16(data), expected);
        assert_eq!(&encode_crc_ascii(expected), b"OqZ");
    }

    #[test]
    fn spec_example_three_values() {
        // "0D0!0+3.14+2.718+1.414Ipz<CR><LF>"
        let data = b"0+3.14+2.718+1.414";
        assert_eq!(&encode_crc_ascii(calculate_crc16(data)), b"Ipz");
    }

    #[test]
    fn spec_example_long_frame() {
        // "0D0!0+1.234-4.56+12354-0.00045+2.223+145.5+7.7003+4328.8+9+10+11.433+12Ba]<CR><LF>"
        let data = b"0+1.234-4.56+12354-0.00045+2.223+145.5+7.7003+4328.8+9+10+11.433+12";
        assert_eq!(&encode_crc_ascii(calculate_crc16(data)), b"Ba]");
    }

    #[test]
    fn ascii_encoding_round_trips() {
        for crc_val in [0x0000u16, 0xFFFF, 0x1234, 0xABCD, 0xBB3D, 0x8000, 0x0001] {
            assert_eq!(decode_crc_ascii(&encode_crc_ascii(crc_val)), crc_val);
        }
        // Encoded characters stay printable (0x40..=0x7F).
        for byte in encode_crc_ascii(0xFFFF) {
            assert!((0x40..=0x7F).contains(&byte));
        }
    }

    #[test]
    fn verify_accepts_and_rejects() {
        assert!(verify_response_crc_ascii::<()>(b"0+3.14OqZ").is_ok());

        // Wrong CRC characters.
        assert!(matches!(
            verify_response_crc_ascii::<()>(b"0+3.14OqX"),
            Err(Sdi12Error::CrcMismatch { .. })
        ));
        // Corrupted data, original CRC.
        assert!(matches!(
            verify_response_crc_ascii::<()>(b"0+3.15OqZ"),
            Err(Sdi12Error::CrcMismatch { .. })
        ));
        // Too short to contain a CRC at all.
        assert!(matches!(
            verify_response_crc_ascii::<()>(b"Oq"),
            Err(Sdi12Error::InvalidFormat)
        ));
    }

    #[test]
    #[should_panic]
    fn decode_rejects_wrong_length() {
        decode_crc_ascii(b"Oq");
    }
}
