//! GATT UUIDs, fixed configuration constants, and BLE wire-format helpers for
//! heart-rate sensors.
//!
//! Both UUIDs live in the Bluetooth SIG base namespace
//! `0000XXXX-0000-1000-8000-00805f9b34fb`.

use std::time::Duration;

use uuid::Uuid;

// ── Service ──────────────────────────────────────────────────────────────────

/// Heart Rate service (`0x180D`).
///
/// A session is only established with peripherals exposing this service.
pub const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);

// ── Characteristics ───────────────────────────────────────────────────────────

/// Heart Rate Measurement characteristic (`0x2A37`).
///
/// Notifies one measurement per beat window; see [`crate::parse::parse_heart_rate`]
/// for the payload layout. Outbound commands are written to the same
/// characteristic.
pub const HEART_RATE_MEASUREMENT: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

// ── Measurement flags ─────────────────────────────────────────────────────────

/// Flags bit 0: heart-rate value is a little-endian `u16` instead of a `u8`.
pub const FLAG_HR_VALUE_U16: u8 = 0x01;

// ── Fixed configuration ───────────────────────────────────────────────────────

/// How long a scan runs before it stops itself.
pub const SCAN_DURATION: Duration = Duration::from_secs(10);

/// Upper bound on a single `connect()` call.
///
/// Some BLE stacks (BlueZ in particular) can block indefinitely when the
/// device is out of range.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of heatmap rows kept by [`crate::buffer::SampleBuffer`].
pub const HEATMAP_ROWS: usize = 5;

/// Number of cells in one derived heatmap row.
pub const HEATMAP_COLUMNS: usize = 5;

/// Number of log lines kept by [`crate::buffer::SampleBuffer`].
pub const LOG_LINES: usize = 20;

// ── Identifier matching ───────────────────────────────────────────────────────

/// Compare an identifier reported by an adapter against a known UUID,
/// ignoring ASCII case.
///
/// Adapters disagree on casing (`0000180D-…` vs `0000180d-…`), so identifiers
/// are compared textually against the hyphenated form.
///
/// ```
/// # use pulse_rs::protocol::{matches_uuid, HEART_RATE_SERVICE};
/// assert!(matches_uuid("0000180D-0000-1000-8000-00805F9B34FB", &HEART_RATE_SERVICE));
/// assert!(!matches_uuid("0000180f-0000-1000-8000-00805f9b34fb", &HEART_RATE_SERVICE));
/// ```
pub fn matches_uuid(candidate: &str, target: &Uuid) -> bool {
    let mut buf = Uuid::encode_buffer();
    candidate
        .trim()
        .eq_ignore_ascii_case(target.hyphenated().encode_lower(&mut buf))
}

// ── Outbound commands ─────────────────────────────────────────────────────────

/// Encode a text command for a characteristic write.
///
/// The payload is the raw UTF-8 bytes of `text`, with no framing and no
/// length limit; characteristic-size limits are the adapter's concern.
///
/// ```
/// # use pulse_rs::protocol::encode_command;
/// assert_eq!(encode_command("Test Data!"), b"Test Data!".to_vec());
/// assert!(encode_command("").is_empty());
/// ```
pub fn encode_command(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_matching_is_case_insensitive() {
        assert!(matches_uuid(
            "00002A37-0000-1000-8000-00805F9B34FB",
            &HEART_RATE_MEASUREMENT
        ));
        assert!(matches_uuid(
            &HEART_RATE_MEASUREMENT.to_string(),
            &HEART_RATE_MEASUREMENT
        ));
        assert!(!matches_uuid("2a37", &HEART_RATE_MEASUREMENT));
    }

    #[test]
    fn test_encode_command_keeps_utf8() {
        assert_eq!(encode_command("bpm ♥"), "bpm ♥".as_bytes());
    }
}
