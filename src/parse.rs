//! Binary decoder for Heart Rate Measurement notifications.
//!
//! All functions in this module are pure and safe to call from any async or
//! sync context.
//!
//! # Wire format
//!
//! ```text
//! byte 0      : flags
//! bytes 1..   : heart-rate value, u8 or u16 LE depending on flags bit 0
//! (remaining) : energy expended / RR intervals, not decoded
//! ```
//!
//! | Flags bit | Meaning | Handling |
//! |---|---|---|
//! | 0 | value format (`0` = u8, `1` = u16 LE) | selects the value width |
//! | 1–2 | sensor contact status | ignored |
//! | 3 | energy expended present | ignored |
//! | 4 | RR intervals present | ignored |

use crate::error::PulseError;
use crate::protocol::FLAG_HR_VALUE_U16;
use crate::types::{HeatmapRow, Sample};

/// Read the heart-rate value (bpm) from a measurement payload.
///
/// Returns [`PulseError::MalformedPayload`] when the payload is shorter than
/// the flags byte plus the selected value width. Bytes past the value are
/// tolerated.
///
/// ```
/// # use pulse_rs::parse::parse_heart_rate;
/// assert_eq!(parse_heart_rate(&[0x00, 72]).unwrap(), 72);
/// assert_eq!(parse_heart_rate(&[0x01, 0x4B, 0x00]).unwrap(), 75);
/// assert!(parse_heart_rate(&[0x00]).is_err());
/// ```
pub fn parse_heart_rate(data: &[u8]) -> Result<u16, PulseError> {
    let Some((&flags, value)) = data.split_first() else {
        return Err(PulseError::MalformedPayload { len: 0, needed: 1 });
    };

    if flags & FLAG_HR_VALUE_U16 != 0 {
        match value {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(PulseError::MalformedPayload {
                len: data.len(),
                needed: 3,
            }),
        }
    } else {
        match value {
            [v, ..] => Ok(u16::from(*v)),
            [] => Err(PulseError::MalformedPayload {
                len: data.len(),
                needed: 2,
            }),
        }
    }
}

/// Derive the five heatmap cells for a heart-rate value.
///
/// `[hr, hr + 2, hr − 1, hr + 5, hr − 3]`. The offsets only spread one value
/// across a row for display; they carry no protocol meaning.
pub fn derive_row(heart_rate: u16) -> HeatmapRow {
    let hr = i32::from(heart_rate);
    [hr, hr + 2, hr - 1, hr + 5, hr - 3]
}

/// Decode one notification into a [`Sample`].
pub fn decode_measurement(data: &[u8]) -> Result<Sample, PulseError> {
    let heart_rate = parse_heart_rate(data)?;
    Ok(Sample {
        heart_rate,
        row: derive_row(heart_rate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_value_for_every_flags_with_bit0_clear() {
        for flags in (0u8..=255).filter(|f| f & 0x01 == 0) {
            for v in [0u8, 1, 72, 200, 255] {
                assert_eq!(parse_heart_rate(&[flags, v]).unwrap(), u16::from(v));
            }
        }
    }

    #[test]
    fn test_u16_value_for_every_flags_with_bit0_set() {
        for flags in (0u8..=255).filter(|f| f & 0x01 == 1) {
            for (lo, hi) in [(0x4B, 0x00), (0x00, 0x01), (0xFF, 0xFF), (0x2C, 0x01)] {
                let expected = u16::from(lo) + 256 * u16::from(hi);
                assert_eq!(parse_heart_rate(&[flags, lo, hi]).unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_short_payloads_are_malformed() {
        assert_eq!(
            parse_heart_rate(&[]),
            Err(PulseError::MalformedPayload { len: 0, needed: 1 })
        );
        assert_eq!(
            parse_heart_rate(&[0x00]),
            Err(PulseError::MalformedPayload { len: 1, needed: 2 })
        );
        assert_eq!(
            parse_heart_rate(&[0x01]),
            Err(PulseError::MalformedPayload { len: 1, needed: 3 })
        );
        assert_eq!(
            parse_heart_rate(&[0x01, 0x4B]),
            Err(PulseError::MalformedPayload { len: 2, needed: 3 })
        );
    }

    #[test]
    fn test_trailing_fields_are_tolerated() {
        // Sensor contact + energy expended + one RR interval.
        let payload = [0x1E, 64, 0x10, 0x00, 0x00, 0x04];
        assert_eq!(parse_heart_rate(&payload).unwrap(), 64);
    }

    #[test]
    fn test_decode_examples() {
        let s = decode_measurement(&[0x00, 72]).unwrap();
        assert_eq!(s.heart_rate, 72);
        assert_eq!(s.row, [72, 74, 71, 77, 69]);

        let s = decode_measurement(&[0x01, 0x4B, 0x00]).unwrap();
        assert_eq!(s.heart_rate, 75);
        assert_eq!(s.row, [75, 77, 74, 80, 72]);

        assert!(matches!(
            decode_measurement(&[0x00]),
            Err(PulseError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_derive_row_goes_negative_for_low_values() {
        assert_eq!(derive_row(0), [0, 2, -1, 5, -3]);
        assert_eq!(derive_row(u16::MAX)[3], 65_540);
    }
}
