// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Individual report codec: one reading, 20 bytes, no signature.
//!
//! # Wire Format
//!
//! ```text
//! offset  size  field
//! 0       1     format_code = 1
//! 1       1     reserved = 0
//! 2       2     stream_id
//! 4       4     reading_id
//! 8       4     reading_timestamp
//! 12      4     reading_value
//! 16      4     sent_timestamp
//! ```
//!
//! All fields little-endian.

use crate::errors::{Error, Result};
use crate::report::FORMAT_INDIVIDUAL;
use crate::types::Reading;

/// Fixed wire size of an individual report.
pub const INDIVIDUAL_REPORT_LEN: usize = 20;

/// A single realtime reading pushed outside any streamer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndividualReport {
    pub reading: Reading,
    /// Device uptime in seconds when the report was sent.
    pub sent_timestamp: u32,
}

impl IndividualReport {
    #[must_use]
    pub fn new(reading: Reading, sent_timestamp: u32) -> Self {
        Self {
            reading,
            sent_timestamp,
        }
    }

    /// Encode to the fixed 20-byte wire image.
    #[must_use]
    pub fn encode(&self) -> [u8; INDIVIDUAL_REPORT_LEN] {
        let mut buf = [0u8; INDIVIDUAL_REPORT_LEN];
        buf[0] = FORMAT_INDIVIDUAL;
        buf[1] = 0;
        buf[2..4].copy_from_slice(&self.reading.stream_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.reading.reading_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.reading.timestamp.to_le_bytes());
        buf[12..16].copy_from_slice(&self.reading.value.to_le_bytes());
        buf[16..20].copy_from_slice(&self.sent_timestamp.to_le_bytes());
        buf
    }

    /// Decode from a complete wire image.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != INDIVIDUAL_REPORT_LEN {
            return Err(Error::MalformedReport(format!(
                "individual report must be exactly {} bytes, got {}",
                INDIVIDUAL_REPORT_LEN,
                bytes.len()
            )));
        }

        if bytes[0] != FORMAT_INDIVIDUAL {
            return Err(Error::MalformedReport(format!(
                "expected format code {}, got {}",
                FORMAT_INDIVIDUAL, bytes[0]
            )));
        }

        let stream_id = u16::from_le_bytes([bytes[2], bytes[3]]);
        let reading_id = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let timestamp = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let value = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        let sent_timestamp = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);

        Ok(Self {
            reading: Reading::new(stream_id, reading_id, timestamp, value),
            sent_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn golden_vector() {
        let report = IndividualReport::new(Reading::new(0x1000, 7, 1000, 42), 2000);
        let encoded = report.encode();

        #[rustfmt::skip]
        let expected: [u8; 20] = [
            0x01, 0x00,             // format, reserved
            0x00, 0x10,             // stream_id
            0x07, 0x00, 0x00, 0x00, // reading_id
            0xe8, 0x03, 0x00, 0x00, // timestamp = 1000
            0x2a, 0x00, 0x00, 0x00, // value = 42
            0xd0, 0x07, 0x00, 0x00, // sent_timestamp = 2000
        ];
        assert_eq!(encoded, expected);
    }

    #[test]
    fn roundtrip() {
        let report = IndividualReport::new(Reading::new(0x5abc, u32::MAX, 0, 0xdeadbeef), 12345);
        let decoded = IndividualReport::decode(&report.encode()).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = IndividualReport::decode(&[1u8; 19]).unwrap_err();
        assert_eq!(err.kind(), "malformed_report");

        let err = IndividualReport::decode(&[1u8; 21]).unwrap_err();
        assert_eq!(err.kind(), "malformed_report");
    }

    #[test]
    fn rejects_wrong_format_code() {
        let mut bytes = IndividualReport::new(Reading::new(1, 1, 1, 1), 1).encode();
        bytes[0] = 2;
        let err = IndividualReport::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), "malformed_report");
    }
}
