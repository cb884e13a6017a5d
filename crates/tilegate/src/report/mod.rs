// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Report model: framed containers of readings flowing out of devices.
//!
//! Two wire formats exist.  *Individual* reports carry exactly one reading
//! with no signature and are used for realtime/ephemeral data.  *SignedList*
//! reports carry a batch of readings between a header and a signed footer,
//! optionally with the reading region encrypted.
//!
//! # Modules
//!
//! - `individual` - 20-byte single-reading codec
//! - `signed` - signed list codec, verification and decryption
//! - `assembler` - incremental defragmentation of framed report streams
//! - `dispatch` - per-subscriber fan-out with bounded queues

pub mod assembler;
pub mod dispatch;
pub mod individual;
pub mod signed;

pub use assembler::{Fragment, ReportAssembler, TraceAssembler};
pub use dispatch::{ReportDispatcher, SubscriptionFilter};
pub use individual::IndividualReport;
pub use signed::{KeyType, ReportFlags, SignedListReport, SignedReportBuilder, Verification};

use crate::errors::{Error, Result};
use crate::types::DeviceId;

/// Wire format code of an individual report.
pub const FORMAT_INDIVIDUAL: u8 = 1;
/// Wire format code of a signed list report.
pub const FORMAT_SIGNED_LIST: u8 = 2;

/// Selector reported for unsolicited single readings.
///
/// Individual reports do not originate from a streamer, so they demux under
/// the wildcard selector.
pub const WILDCARD_SELECTOR: u16 = 0xFFFF;

/// A fully assembled report in either wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Individual(IndividualReport),
    SignedList(SignedListReport),
}

impl Report {
    /// Device the report claims to originate from.
    ///
    /// Individual reports carry no origin on the wire; the connection they
    /// arrived on determines it.
    #[must_use]
    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            Report::Individual(_) => None,
            Report::SignedList(report) => Some(report.device_id),
        }
    }

    /// Streamer selector used as the demux key.
    #[must_use]
    pub fn selector(&self) -> u16 {
        match self {
            Report::Individual(_) => WILDCARD_SELECTOR,
            Report::SignedList(report) => report.selector,
        }
    }

    /// Encode to the wire image.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Report::Individual(report) => report.encode().to_vec(),
            Report::SignedList(report) => report.raw().to_vec(),
        }
    }

    /// Decode a complete wire image, dispatching on the format code.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes.first() {
            Some(&FORMAT_INDIVIDUAL) => Ok(Report::Individual(IndividualReport::decode(bytes)?)),
            Some(&FORMAT_SIGNED_LIST) => Ok(Report::SignedList(SignedListReport::decode(bytes)?)),
            Some(&other) => Err(Error::MalformedReport(format!(
                "unknown report format code {}",
                other
            ))),
            None => Err(Error::MalformedReport("empty report".into())),
        }
    }
}
