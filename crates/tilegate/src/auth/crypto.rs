// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Report signature and encryption primitives.
//!
//! Signatures are 16-byte truncations of SHA-256 (integrity-only, no key) or
//! HMAC-SHA256 (authenticated), computed over every byte of the report that
//! precedes the signature field, with the signature field pre-zeroed.
//!
//! Encrypted reports carry the reading region as AES-256-CTR ciphertext of
//! equal length; the header and footer stay plaintext.
//!
//! # Nonce Construction
//!
//! The 16-byte CTR IV is derived from the report identity:
//!
//! ```text
//! Bytes 0-7:   device_id XOR report_id, as u64 little-endian
//! Bytes 8-15:  zeros (CTR block counter space)
//! ```

use crate::errors::{Error, Result};
use crate::types::DeviceId;
use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use ring::{digest, hmac};

/// Length of the truncated signature carried in report footers.
pub const SIGNATURE_LEN: usize = 16;

/// Required key length for HMAC signing and AES-256-CTR.
pub const KEY_LEN: usize = 32;

type Aes256Ctr = Ctr128BE<Aes256>;

/// Integrity-only signature: first 16 bytes of SHA-256 over `data`.
#[must_use]
pub fn hash_signature(data: &[u8]) -> [u8; SIGNATURE_LEN] {
    let digest = digest::digest(&digest::SHA256, data);
    truncate(digest.as_ref())
}

/// Authenticated signature: first 16 bytes of HMAC-SHA256 over `data`.
#[must_use]
pub fn hmac_signature(key: &[u8], data: &[u8]) -> [u8; SIGNATURE_LEN] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, data);
    truncate(tag.as_ref())
}

/// CTR IV for a report identified by `(device_id, report_id)`.
#[must_use]
pub fn report_nonce(device_id: DeviceId, report_id: u32) -> [u8; 16] {
    let mut iv = [0u8; 16];
    let seed = device_id ^ u64::from(report_id);
    iv[..8].copy_from_slice(&seed.to_le_bytes());
    iv
}

/// Encrypt or decrypt a reading region in place (CTR is symmetric).
pub fn apply_report_cipher(key: &[u8], iv: [u8; 16], data: &mut [u8]) -> Result<()> {
    let key: [u8; KEY_LEN] = key.try_into().map_err(|_| {
        Error::DecryptionFailed(format!(
            "report key must be {} bytes, got {}",
            KEY_LEN,
            key.len()
        ))
    })?;

    let mut cipher = Aes256Ctr::new(&key.into(), &iv.into());
    cipher.apply_keystream(data);
    Ok(())
}

/// Constant-time signature comparison.
#[must_use]
pub fn signatures_match(expected: &[u8; SIGNATURE_LEN], actual: &[u8; SIGNATURE_LEN]) -> bool {
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(actual.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

fn truncate(full: &[u8]) -> [u8; SIGNATURE_LEN] {
    let mut out = [0u8; SIGNATURE_LEN];
    out.copy_from_slice(&full[..SIGNATURE_LEN]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_signature_is_deterministic() {
        let a = hash_signature(b"report body");
        let b = hash_signature(b"report body");
        assert_eq!(a, b);
        assert_ne!(a, hash_signature(b"report bodY"));
    }

    #[test]
    fn hmac_signature_depends_on_key() {
        let data = b"report body";
        let a = hmac_signature(&[0u8; 32], data);
        let b = hmac_signature(&[1u8; 32], data);
        assert_ne!(a, b);
        assert_eq!(a, hmac_signature(&[0u8; 32], data));
    }

    #[test]
    fn nonce_mixes_device_and_report_ids() {
        let base = report_nonce(0x10, 7);
        assert_eq!(&base[..8], &(0x10u64 ^ 7).to_le_bytes());
        assert_eq!(&base[8..], &[0u8; 8]);

        assert_ne!(report_nonce(0x10, 8), base);
        assert_ne!(report_nonce(0x11, 7), base);
    }

    #[test]
    fn cipher_roundtrip() {
        let key = [0x42u8; 32];
        let iv = report_nonce(0x10, 7);
        let plaintext = b"sixteen byte blk+ tail".to_vec();

        let mut data = plaintext.clone();
        apply_report_cipher(&key, iv, &mut data).unwrap();
        assert_ne!(data, plaintext);
        assert_eq!(data.len(), plaintext.len());

        apply_report_cipher(&key, iv, &mut data).unwrap();
        assert_eq!(data, plaintext);
    }

    #[test]
    fn cipher_rejects_short_key() {
        let mut data = vec![0u8; 16];
        let err = apply_report_cipher(&[0u8; 16], [0u8; 16], &mut data).unwrap_err();
        assert_eq!(err.kind(), "decryption_failed");
    }

    #[test]
    fn signature_compare() {
        let a = [7u8; 16];
        let mut b = a;
        assert!(signatures_match(&a, &b));
        b[15] ^= 1;
        assert!(!signatures_match(&a, &b));
    }
}
