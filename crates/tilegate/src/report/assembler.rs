// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incremental assembly of framed reports from transport fragments.
//!
//! Streaming interfaces deliver a finite, non-restartable sequence of byte
//! fragments.  Reports are self-delimited: the first byte of a report is its
//! format code, and signed reports declare their total length in the header.
//! The assembler buffers fragments until a full report accumulates, decodes
//! it, and hands it back; surplus bytes in a fragment begin the next report.
//!
//! Transports mark each fragment as the *start* of a report or a
//! *continuation*.  A start fragment arriving while a report is still being
//! assembled is a fatal protocol error for that interface: the caller closes
//! the interface and emits an audit event.  All error paths leave the
//! assembler empty, matching the interface teardown.
//!
//! Tracing uses the same transport machinery with no framing at all; see
//! [`TraceAssembler`].

use crate::errors::{Error, Result};
use crate::report::individual::INDIVIDUAL_REPORT_LEN;
use crate::report::signed::MIN_REPORT_LEN;
use crate::report::{Report, FORMAT_INDIVIDUAL, FORMAT_SIGNED_LIST};
use crate::types::DeviceId;

/// One transport delivery unit.
#[derive(Debug, Clone, Copy)]
pub enum Fragment<'a> {
    /// First fragment of a new report.
    Start(&'a [u8]),
    /// Subsequent fragment of the report in progress.
    Continuation(&'a [u8]),
}

/// Assembles framed reports for one streaming interface.
pub struct ReportAssembler {
    /// Device this interface is connected to; `None` accepts any origin.
    expected_device: Option<DeviceId>,
    max_report_bytes: usize,
    buffer: Vec<u8>,
    in_flight: bool,
}

impl ReportAssembler {
    #[must_use]
    pub fn new(expected_device: Option<DeviceId>, max_report_bytes: usize) -> Self {
        Self {
            expected_device,
            max_report_bytes,
            buffer: Vec::new(),
            in_flight: false,
        }
    }

    /// Whether a report is currently mid-assembly.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Feed one fragment; returns every report completed by it.
    ///
    /// On error the assembler resets to empty: the caller is expected to
    /// close the interface, so no further fragments for the aborted report
    /// will arrive.
    pub fn push(&mut self, fragment: Fragment<'_>) -> Result<Vec<Report>> {
        let data = match fragment {
            Fragment::Start(data) => {
                if self.in_flight {
                    self.reset();
                    return Err(Error::MalformedReport(
                        "new report started before previous completed".into(),
                    ));
                }
                self.in_flight = true;
                data
            }
            Fragment::Continuation(data) => {
                if !self.in_flight {
                    self.reset();
                    return Err(Error::MalformedReport(
                        "continuation fragment with no report in progress".into(),
                    ));
                }
                data
            }
        };

        self.buffer.extend_from_slice(data);
        match self.drain_complete() {
            Ok(reports) => {
                if self.buffer.is_empty() {
                    self.in_flight = false;
                }
                Ok(reports)
            }
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    fn drain_complete(&mut self) -> Result<Vec<Report>> {
        let mut completed = Vec::new();

        loop {
            let total = match self.declared_length()? {
                Some(total) => total,
                None => break,
            };

            if self.buffer.len() < total {
                break;
            }

            let remainder = self.buffer.split_off(total);
            let image = std::mem::replace(&mut self.buffer, remainder);

            let report = Report::decode(&image)?;
            self.check_origin(&report)?;
            completed.push(report);
        }

        Ok(completed)
    }

    /// Total length of the report at the head of the buffer, when knowable.
    ///
    /// Individual reports are fixed-size.  Signed reports need the first 8
    /// bytes before the authoritative 24-bit length is visible; the redundant
    /// `length_low` half-word is cross-checked by the decoder once the image
    /// completes.
    fn declared_length(&self) -> Result<Option<usize>> {
        let head = &self.buffer;
        if head.is_empty() {
            return Ok(None);
        }

        match head[0] {
            FORMAT_INDIVIDUAL => Ok(Some(INDIVIDUAL_REPORT_LEN)),
            FORMAT_SIGNED_LIST => {
                if head.len() < 8 {
                    return Ok(None);
                }
                let word = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
                let total = (word & 0x00FF_FFFF) as usize;

                if total < MIN_REPORT_LEN {
                    return Err(Error::MalformedReport(format!(
                        "declared signed report length {} below minimum",
                        total
                    )));
                }
                if total > self.max_report_bytes {
                    return Err(Error::ReportTooLarge {
                        declared: total,
                        limit: self.max_report_bytes,
                    });
                }
                Ok(Some(total))
            }
            other => Err(Error::MalformedReport(format!(
                "unknown report format code {}",
                other
            ))),
        }
    }

    fn check_origin(&self, report: &Report) -> Result<()> {
        if let (Some(expected), Some(actual)) = (self.expected_device, report.device_id()) {
            if expected != actual {
                return Err(Error::MalformedReport(format!(
                    "report claims device {:#x} on a connection to {:#x}",
                    actual, expected
                )));
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.in_flight = false;
    }
}

/// Pass-through for the tracing interface.
///
/// Tracing has no framing: bytes are forwarded opaquely, in order, at most
/// once per subscriber.  The assembler only accounts for volume.
#[derive(Debug, Default)]
pub struct TraceAssembler {
    forwarded: u64,
}

impl TraceAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a trace chunk, returning it for forwarding.
    pub fn push<'a>(&mut self, data: &'a [u8]) -> &'a [u8] {
        self.forwarded += data.len() as u64;
        data
    }

    /// Total bytes forwarded on this interface.
    #[must_use]
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }
}
