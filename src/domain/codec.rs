//! Band Payload Codec
//!
//! Length-checked, endianness-explicit conversion between raw characteristic
//! values and typed readings.

use crate::domain::error::CodecError;
use serde::Serialize;
use std::fmt;
use tracing::trace;

/// Opcode that starts a manual heart-rate measurement on the control point
pub const HEART_RATE_START_OPCODE: u8 = 0x15;

/// Wall-clock time as reported by the current-time characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BandTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl fmt::Display for BandTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02} {:02}.{:02}.{}",
            self.hour, self.minute, self.second, self.day, self.month, self.year
        )
    }
}

fn require(field: &'static str, bytes: &[u8], expected: usize) -> Result<(), CodecError> {
    if bytes.len() < expected {
        return Err(CodecError::MalformedPayload {
            field,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

/// Decode the step counter
///
/// ```text
/// [0-3] : Steps (u32 little-endian)
/// ```
pub fn decode_steps(bytes: &[u8]) -> Result<u32, CodecError> {
    require("steps", bytes, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decode the battery level
///
/// The first byte is the charge percentage. Range checking is left to the caller.
pub fn decode_battery(bytes: &[u8]) -> Result<u8, CodecError> {
    require("battery", bytes, 1)?;
    Ok(bytes[0])
}

/// Decode the current-time characteristic
///
/// ```text
/// [0-1] : Year (u16 little-endian)
/// [2]   : Month
/// [3]   : Day
/// [4]   : Hour
/// [5]   : Minute
/// [6]   : Second
/// ```
pub fn decode_time(bytes: &[u8]) -> Result<BandTime, CodecError> {
    require("time", bytes, 7)?;
    Ok(BandTime {
        year: u16::from_le_bytes([bytes[0], bytes[1]]),
        month: bytes[2],
        day: bytes[3],
        hour: bytes[4],
        minute: bytes[5],
        second: bytes[6],
    })
}

/// Decode a heart-rate measurement
///
/// Bit 0 of the flags byte selects the value format:
/// - `0`: bpm is the 8-bit value in byte 1
/// - `1`: bpm is the 16-bit value `(byte1 << 8) | byte2`
pub fn decode_heart_rate(bytes: &[u8]) -> Result<u16, CodecError> {
    require("heart rate flags", bytes, 1)?;

    let wide = bytes[0] & 0x01 != 0;
    if wide {
        require("heart rate (16-bit)", bytes, 3)?;
        Ok((u16::from(bytes[1]) << 8) | u16::from(bytes[2]))
    } else {
        require("heart rate (8-bit)", bytes, 2)?;
        Ok(u16::from(bytes[1]))
    }
}

/// Decode the device id from the device-info characteristic (first 4 bytes, little-endian)
pub fn decode_device_id(bytes: &[u8]) -> Result<u32, CodecError> {
    require("device id", bytes, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decode a UTF-8 device name, dropping NUL padding
pub fn decode_device_name(bytes: &[u8]) -> Result<String, CodecError> {
    let text = std::str::from_utf8(bytes).map_err(|e| CodecError::InvalidText {
        field: "device name",
        reason: e.to_string(),
    })?;
    Ok(text.trim_end_matches('\0').to_string())
}

/// Build a control-point payload: the opcode followed by its arguments
pub fn encode_command(opcode: u8, args: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + args.len());
    payload.push(opcode);
    payload.extend_from_slice(args);
    trace!("Encoded command: {:02X?}", payload);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_steps_little_endian() {
        assert_eq!(decode_steps(&[0x10, 0x27, 0x00, 0x00]).unwrap(), 10_000);
        // Only the first four bytes count
        assert_eq!(
            decode_steps(&[0x01, 0x00, 0x00, 0x00, 0xFF, 0xFF]).unwrap(),
            1
        );
    }

    #[test]
    fn test_decode_steps_short_buffer() {
        for len in 0..4 {
            let bytes = vec![0xAA; len];
            assert_eq!(
                decode_steps(&bytes),
                Err(CodecError::MalformedPayload {
                    field: "steps",
                    expected: 4,
                    actual: len,
                })
            );
        }
    }

    #[test]
    fn test_decode_battery_takes_first_byte() {
        assert_eq!(decode_battery(&[0x4B, 0x01, 0x02]).unwrap(), 75);
        // No range validation in the codec
        assert_eq!(decode_battery(&[0xC8]).unwrap(), 200);
        assert!(decode_battery(&[]).is_err());
    }

    #[test]
    fn test_decode_time() {
        let time = decode_time(&[0xE3, 0x07, 0x06, 0x0F, 0x0A, 0x1E, 0x00]).unwrap();
        assert_eq!(
            time,
            BandTime {
                year: 2019,
                month: 6,
                day: 15,
                hour: 10,
                minute: 30,
                second: 0,
            }
        );
        assert_eq!(time.to_string(), "10:30:00 15.06.2019");
    }

    #[test]
    fn test_decode_time_short_buffer() {
        assert!(matches!(
            decode_time(&[0xE3, 0x07, 0x06, 0x0F, 0x0A, 0x1E]),
            Err(CodecError::MalformedPayload { expected: 7, actual: 6, .. })
        ));
    }

    #[test]
    fn test_decode_heart_rate_formats() {
        assert_eq!(decode_heart_rate(&[0x00, 0x48]).unwrap(), 72);
        assert_eq!(decode_heart_rate(&[0x01, 0x00, 0x48]).unwrap(), 72);
        assert_eq!(decode_heart_rate(&[0x01, 0x01, 0x2C]).unwrap(), 300);
        // Other flag bits do not affect the format
        assert_eq!(decode_heart_rate(&[0x06, 0x3C]).unwrap(), 60);
    }

    #[test]
    fn test_decode_heart_rate_too_short_for_format() {
        assert!(decode_heart_rate(&[]).is_err());
        assert!(decode_heart_rate(&[0x00]).is_err());
        assert!(decode_heart_rate(&[0x01, 0x48]).is_err());
    }

    #[test]
    fn test_decode_device_info() {
        assert_eq!(
            decode_device_id(&[0x78, 0x56, 0x34, 0x12, 0x00]).unwrap(),
            0x1234_5678
        );
        assert_eq!(decode_device_name(b"MI Band 2\0\0").unwrap(), "MI Band 2");
        assert!(matches!(
            decode_device_name(&[0xFF, 0xFE]),
            Err(CodecError::InvalidText { .. })
        ));
    }

    #[test]
    fn test_encode_command() {
        assert_eq!(
            encode_command(HEART_RATE_START_OPCODE, &[0x01, 0x01]),
            vec![0x15, 0x01, 0x01]
        );
        assert_eq!(encode_command(0x01, &[]), vec![0x01]);
    }
}
