// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SignedList report codec: header, reading batch, signed footer.
//!
//! # Wire Format
//!
//! ```text
//! header (32 bytes, little-endian):
//!   0   1   format_code = 2
//!   1   1   reserved = 0
//!   2   2   length_low            (redundant low 16 bits of length)
//!   4   4   length_high_and_flags (bits 0-23 length, bits 24-31 flags)
//!   8   4   reading_count
//!   12  4   device_id_low
//!   16  4   device_id_high
//!   20  4   report_id
//!   24  4   sent_timestamp
//!   28  2   selector
//!   30  2   reserved = 0
//! readings (N x 16 bytes): stream_id(2) reserved(2) reading_id(4) timestamp(4) value(4)
//! footer (24 bytes):       lowest_reading_id(4) highest_reading_id(4) signature(16)
//! ```
//!
//! The 24-bit length field is authoritative; `length_low` must agree with its
//! low 16 bits.  Flags: bit 0 = encrypted, bits 1-2 = key type, bits 3-7
//! reserved-zero.
//!
//! The signature is the first 16 bytes of SHA-256 (key type none) or
//! HMAC-SHA256 (keyed) over every byte preceding the signature field.  When
//! encrypted, the reading region is AES-256-CTR ciphertext of equal length;
//! encryption happens before signing, so verification always runs over the
//! wire image as-is.

use crate::auth::{crypto, AuthChain, KeyPurpose};
use crate::errors::{Error, Result};
use crate::report::FORMAT_SIGNED_LIST;
use crate::types::{DeviceId, Reading};

pub use crate::auth::KeyType;

/// Header size in bytes.
pub const HEADER_LEN: usize = 32;
/// Footer size in bytes.
pub const FOOTER_LEN: usize = 24;
/// Size of one packed reading.
pub const READING_LEN: usize = 16;
/// Smallest valid signed report (zero readings).
pub const MIN_REPORT_LEN: usize = HEADER_LEN + FOOTER_LEN;
/// Largest length the 24-bit field can express.
pub const MAX_WIRE_LEN: usize = 0x00FF_FFFF;

/// Reading id sentinel meaning "no persistent id assigned".
pub const INVALID_READING_ID: u32 = u32::MAX;

const FLAG_ENCRYPTED: u8 = 1 << 0;
const FLAG_KEY_TYPE_SHIFT: u8 = 1;
const FLAG_RESERVED_MASK: u8 = 0b1111_1000;

/// Decoded report flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportFlags {
    pub encrypted: bool,
    pub key_type: KeyType,
}

impl ReportFlags {
    #[must_use]
    pub fn bits(self) -> u8 {
        let mut bits = self.key_type.bits() << FLAG_KEY_TYPE_SHIFT;
        if self.encrypted {
            bits |= FLAG_ENCRYPTED;
        }
        bits
    }

    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits & FLAG_RESERVED_MASK != 0 {
            return Err(Error::MalformedReport(format!(
                "reserved flag bits set: {:#04x}",
                bits
            )));
        }
        Ok(Self {
            encrypted: bits & FLAG_ENCRYPTED != 0,
            key_type: KeyType::from_bits(bits >> FLAG_KEY_TYPE_SHIFT),
        })
    }
}

/// Verification state of a decoded report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// `verify` has not been called.
    NotVerified,
    /// SHA-256 integrity hash matched (key type none).
    IntegrityOnly,
    /// HMAC matched under the resolved key.
    Authenticated(KeyType),
    /// No provider could resolve the key; the signature is unchecked.
    ///
    /// Subscribers reject these by policy if they require authentication.
    Unauthenticated,
}

/// A decoded (and possibly verified/decrypted) signed list report.
#[derive(Debug, Clone)]
pub struct SignedListReport {
    raw: Vec<u8>,
    pub device_id: DeviceId,
    pub report_id: u32,
    pub sent_timestamp: u32,
    pub selector: u16,
    pub flags: ReportFlags,
    pub reading_count: u32,
    pub lowest_reading_id: u32,
    pub highest_reading_id: u32,
    pub signature: [u8; crypto::SIGNATURE_LEN],
    verification: Verification,
    decrypted: Option<Vec<Reading>>,
}

// Wire image identity; verification and decryption state are local.
impl PartialEq for SignedListReport {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl SignedListReport {
    /// Decode a complete wire image.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_REPORT_LEN {
            return Err(Error::MalformedReport(format!(
                "signed report too short: {} < {}",
                bytes.len(),
                MIN_REPORT_LEN
            )));
        }

        if bytes[0] != FORMAT_SIGNED_LIST {
            return Err(Error::MalformedReport(format!(
                "expected format code {}, got {}",
                FORMAT_SIGNED_LIST, bytes[0]
            )));
        }

        let length_word = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let length = (length_word & 0x00FF_FFFF) as usize;
        let flags = ReportFlags::from_bits((length_word >> 24) as u8)?;

        let length_low = u16::from_le_bytes([bytes[2], bytes[3]]);
        if length_low != (length & 0xFFFF) as u16 {
            return Err(Error::MalformedReport(format!(
                "length_low {:#06x} disagrees with authoritative length {:#08x}",
                length_low, length
            )));
        }

        if length != bytes.len() {
            return Err(Error::MalformedReport(format!(
                "declared length {} but got {} bytes",
                length,
                bytes.len()
            )));
        }

        let reading_count = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let expected_len = HEADER_LEN + reading_count as usize * READING_LEN + FOOTER_LEN;
        if length != expected_len {
            return Err(Error::MalformedReport(format!(
                "length {} does not match {} readings",
                length, reading_count
            )));
        }

        let device_low = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        let device_high = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let device_id = u64::from(device_low) | (u64::from(device_high) << 32);

        let report_id = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        let sent_timestamp = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
        let selector = u16::from_le_bytes([bytes[28], bytes[29]]);

        let footer = &bytes[length - FOOTER_LEN..];
        let lowest_reading_id = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let highest_reading_id = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]);
        let mut signature = [0u8; crypto::SIGNATURE_LEN];
        signature.copy_from_slice(&footer[8..24]);

        let report = Self {
            raw: bytes.to_vec(),
            device_id,
            report_id,
            sent_timestamp,
            selector,
            flags,
            reading_count,
            lowest_reading_id,
            highest_reading_id,
            signature,
            verification: Verification::NotVerified,
            decrypted: None,
        };

        if !report.flags.encrypted {
            report.check_reading_order(report.raw_reading_region())?;
        }

        Ok(report)
    }

    /// Complete wire image.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Current verification state.
    #[must_use]
    pub fn verification(&self) -> Verification {
        self.verification
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.flags.encrypted
    }

    /// Verify the footer signature through the auth chain.
    ///
    /// Key type none needs no key and checks the integrity hash.  For keyed
    /// reports, a missing key downgrades the report to
    /// [`Verification::Unauthenticated`] instead of failing; a present key
    /// whose HMAC does not match fails with `SignatureInvalid`.
    pub fn verify(&mut self, chain: &AuthChain) -> Result<Verification> {
        let signed_region = &self.raw[..self.raw.len() - crypto::SIGNATURE_LEN];

        let verification = match self.flags.key_type {
            KeyType::None => {
                let expected = crypto::hash_signature(signed_region);
                if !crypto::signatures_match(&expected, &self.signature) {
                    return Err(Error::SignatureInvalid);
                }
                Verification::IntegrityOnly
            }
            key_type => {
                match chain.get_key(self.device_id, key_type, KeyPurpose::Verify)? {
                    None => Verification::Unauthenticated,
                    Some(key) => {
                        let expected = crypto::hmac_signature(&key, signed_region);
                        if !crypto::signatures_match(&expected, &self.signature) {
                            return Err(Error::SignatureInvalid);
                        }
                        Verification::Authenticated(key_type)
                    }
                }
            }
        };

        self.verification = verification;
        Ok(verification)
    }

    /// Decrypt the reading region.
    ///
    /// No-op for plaintext reports.  Must run after `verify`: the device
    /// encrypts before signing, so the signature covers the ciphertext.
    pub fn decrypt(&mut self, chain: &AuthChain) -> Result<()> {
        if !self.flags.encrypted || self.decrypted.is_some() {
            return Ok(());
        }

        let key = chain.require_key(self.device_id, self.flags.key_type, KeyPurpose::Decrypt)?;

        let mut region = self.raw_reading_region().to_vec();
        let iv = crypto::report_nonce(self.device_id, self.report_id);
        crypto::apply_report_cipher(&key, iv, &mut region)?;

        self.check_reading_order(&region)
            .map_err(|_| Error::DecryptionFailed("reading ids not monotonic after decrypt".into()))?;

        self.decrypted = Some(parse_readings(&region));
        Ok(())
    }

    /// Iterate the readings lazily.
    ///
    /// Fails if the reading region is still ciphertext.
    pub fn readings(&self) -> Result<Readings<'_>> {
        if let Some(decrypted) = &self.decrypted {
            return Ok(Readings {
                source: ReadingsSource::Decrypted(decrypted.iter()),
            });
        }

        if self.flags.encrypted {
            return Err(Error::DecryptionFailed(
                "reading region is encrypted; call decrypt first".into(),
            ));
        }

        Ok(Readings {
            source: ReadingsSource::Raw(self.raw_reading_region().chunks_exact(READING_LEN)),
        })
    }

    fn raw_reading_region(&self) -> &[u8] {
        &self.raw[HEADER_LEN..self.raw.len() - FOOTER_LEN]
    }

    fn check_reading_order(&self, region: &[u8]) -> Result<()> {
        let mut previous: Option<u32> = None;
        for chunk in region.chunks_exact(READING_LEN) {
            let reading = parse_reading(chunk);
            if let Some(prev) = previous {
                if reading.reading_id < prev {
                    return Err(Error::MalformedReport(format!(
                        "reading id {} decreases after {}",
                        reading.reading_id, prev
                    )));
                }
            }
            previous = Some(reading.reading_id);
        }
        Ok(())
    }
}

/// Lazy, finite, non-restartable reading iterator.
pub struct Readings<'a> {
    source: ReadingsSource<'a>,
}

enum ReadingsSource<'a> {
    Raw(std::slice::ChunksExact<'a, u8>),
    Decrypted(std::slice::Iter<'a, Reading>),
}

impl Iterator for Readings<'_> {
    type Item = Reading;

    fn next(&mut self) -> Option<Reading> {
        match &mut self.source {
            ReadingsSource::Raw(chunks) => chunks.next().map(parse_reading),
            ReadingsSource::Decrypted(iter) => iter.next().copied(),
        }
    }
}

fn parse_reading(chunk: &[u8]) -> Reading {
    Reading {
        stream_id: u16::from_le_bytes([chunk[0], chunk[1]]),
        reading_id: u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
        timestamp: u32::from_le_bytes([chunk[8], chunk[9], chunk[10], chunk[11]]),
        value: u32::from_le_bytes([chunk[12], chunk[13], chunk[14], chunk[15]]),
    }
}

fn parse_readings(region: &[u8]) -> Vec<Reading> {
    region.chunks_exact(READING_LEN).map(parse_reading).collect()
}

fn pack_reading(reading: &Reading, out: &mut Vec<u8>) {
    out.extend_from_slice(&reading.stream_id.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&reading.reading_id.to_le_bytes());
    out.extend_from_slice(&reading.timestamp.to_le_bytes());
    out.extend_from_slice(&reading.value.to_le_bytes());
}

// ============================================================================
// Builder (encode path, used by the virtual device server)
// ============================================================================

/// Builds and signs a [`SignedListReport`] from readings.
#[derive(Debug, Clone)]
pub struct SignedReportBuilder {
    device_id: DeviceId,
    report_id: u32,
    sent_timestamp: u32,
    selector: u16,
    key_type: KeyType,
    encrypted: bool,
    readings: Vec<Reading>,
}

impl SignedReportBuilder {
    #[must_use]
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            report_id: 0,
            sent_timestamp: 0,
            selector: 0xFFFF,
            key_type: KeyType::None,
            encrypted: false,
            readings: Vec::new(),
        }
    }

    #[must_use]
    pub fn report_id(mut self, report_id: u32) -> Self {
        self.report_id = report_id;
        self
    }

    #[must_use]
    pub fn sent_timestamp(mut self, sent_timestamp: u32) -> Self {
        self.sent_timestamp = sent_timestamp;
        self
    }

    #[must_use]
    pub fn selector(mut self, selector: u16) -> Self {
        self.selector = selector;
        self
    }

    #[must_use]
    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    /// Encrypt the reading region (requires a keyed key type).
    #[must_use]
    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    #[must_use]
    pub fn reading(mut self, reading: Reading) -> Self {
        self.readings.push(reading);
        self
    }

    #[must_use]
    pub fn readings(mut self, readings: impl IntoIterator<Item = Reading>) -> Self {
        self.readings.extend(readings);
        self
    }

    /// Encode, optionally encrypt, and sign.
    pub fn build(&self, chain: &AuthChain) -> Result<SignedListReport> {
        if self.encrypted && self.key_type == KeyType::None {
            return Err(Error::BadArgument(
                "encrypted reports require a keyed key type".into(),
            ));
        }

        let mut sorted_check: Option<u32> = None;
        for reading in &self.readings {
            if let Some(prev) = sorted_check {
                if reading.reading_id < prev {
                    return Err(Error::BadArgument(format!(
                        "reading ids must be non-decreasing ({} after {})",
                        reading.reading_id, prev
                    )));
                }
            }
            sorted_check = Some(reading.reading_id);
        }

        let length = HEADER_LEN + self.readings.len() * READING_LEN + FOOTER_LEN;
        if length > MAX_WIRE_LEN {
            return Err(Error::BadArgument(format!(
                "report length {} exceeds 24-bit wire limit",
                length
            )));
        }

        let flags = ReportFlags {
            encrypted: self.encrypted,
            key_type: self.key_type,
        };
        let length_word = (length as u32) | (u32::from(flags.bits()) << 24);

        let mut raw = Vec::with_capacity(length);
        raw.push(FORMAT_SIGNED_LIST);
        raw.push(0);
        raw.extend_from_slice(&((length & 0xFFFF) as u16).to_le_bytes());
        raw.extend_from_slice(&length_word.to_le_bytes());
        raw.extend_from_slice(&(self.readings.len() as u32).to_le_bytes());
        raw.extend_from_slice(&((self.device_id & 0xFFFF_FFFF) as u32).to_le_bytes());
        raw.extend_from_slice(&((self.device_id >> 32) as u32).to_le_bytes());
        raw.extend_from_slice(&self.report_id.to_le_bytes());
        raw.extend_from_slice(&self.sent_timestamp.to_le_bytes());
        raw.extend_from_slice(&self.selector.to_le_bytes());
        raw.extend_from_slice(&0u16.to_le_bytes());

        for reading in &self.readings {
            pack_reading(reading, &mut raw);
        }

        if self.encrypted {
            let key = chain.require_key(self.device_id, self.key_type, KeyPurpose::Encrypt)?;
            let iv = crypto::report_nonce(self.device_id, self.report_id);
            crypto::apply_report_cipher(&key, iv, &mut raw[HEADER_LEN..])?;
        }

        let valid_ids: Vec<u32> = self
            .readings
            .iter()
            .map(|r| r.reading_id)
            .filter(|&id| id != INVALID_READING_ID)
            .collect();
        let lowest = valid_ids.iter().min().copied().unwrap_or(INVALID_READING_ID);
        let highest = valid_ids.iter().max().copied().unwrap_or(INVALID_READING_ID);

        raw.extend_from_slice(&lowest.to_le_bytes());
        raw.extend_from_slice(&highest.to_le_bytes());

        let signature = match self.key_type {
            KeyType::None => crypto::hash_signature(&raw),
            key_type => {
                let key = chain.require_key(self.device_id, key_type, KeyPurpose::Sign)?;
                crypto::hmac_signature(&key, &raw)
            }
        };
        raw.extend_from_slice(&signature);

        debug_assert_eq!(raw.len(), length);
        SignedListReport::decode(&raw)
    }
}
