// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bit-exact wire format vectors for both report formats.
//!
//! These pin the on-wire layout so codec refactors cannot silently change
//! what devices and the gateway exchange.

use tilegate::auth::{AuthChain, KeyType, MemoryAuthProvider};
use tilegate::report::{IndividualReport, Report, SignedReportBuilder};
use tilegate::types::Reading;
use std::sync::Arc;

#[test]
fn individual_report_layout() {
    let report = IndividualReport::new(Reading::new(0x5001, 0x0A0B0C0D, 0x11223344, 0x55667788), 0x99AABBCC);
    let encoded = report.encode();

    #[rustfmt::skip]
    let expected: [u8; 20] = [
        0x01, 0x00,             // format_code = 1, reserved
        0x01, 0x50,             // stream_id = 0x5001
        0x0d, 0x0c, 0x0b, 0x0a, // reading_id
        0x44, 0x33, 0x22, 0x11, // reading_timestamp
        0x88, 0x77, 0x66, 0x55, // reading_value
        0xcc, 0xbb, 0xaa, 0x99, // sent_timestamp
    ];
    assert_eq!(encoded, expected);

    // Byte-exact round trip through the format dispatcher.
    let decoded = Report::decode(&encoded).unwrap();
    assert_eq!(decoded.encode(), expected);
}

#[test]
fn signed_report_header_and_footer_layout() {
    let report = SignedReportBuilder::new(0x0000_0002_0000_0010)
        .report_id(0x0707_0707)
        .sent_timestamp(0x0400_0000)
        .selector(0xABCD)
        .reading(Reading::new(0x1000, 1, 1000, 42))
        .reading(Reading::new(0x1000, 2, 1005, 43))
        .build(&AuthChain::new())
        .unwrap();

    let raw = report.raw();
    let length = 32 + 2 * 16 + 24;
    assert_eq!(raw.len(), length);

    // 20-byte legacy prefix, bit-exact.
    assert_eq!(raw[0], 2); // format_code
    assert_eq!(raw[1], 0); // reserved
    assert_eq!(&raw[2..4], &(length as u16).to_le_bytes()); // length_low
    assert_eq!(
        u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        length as u32 // low 24 bits length, no flags
    );
    assert_eq!(&raw[8..12], &2u32.to_le_bytes()); // reading_count
    assert_eq!(&raw[12..16], &0x0000_0010u32.to_le_bytes()); // device_id_low
    assert_eq!(&raw[16..20], &0x0000_0002u32.to_le_bytes()); // device_id_high

    // Metadata extension.
    assert_eq!(&raw[20..24], &0x0707_0707u32.to_le_bytes()); // report_id
    assert_eq!(&raw[24..28], &0x0400_0000u32.to_le_bytes()); // sent_timestamp
    assert_eq!(&raw[28..30], &0xABCDu16.to_le_bytes()); // selector
    assert_eq!(&raw[30..32], &[0, 0]); // reserved

    // First packed reading.
    assert_eq!(&raw[32..34], &0x1000u16.to_le_bytes()); // stream_id
    assert_eq!(&raw[34..36], &[0, 0]); // reserved
    assert_eq!(&raw[36..40], &1u32.to_le_bytes()); // reading_id
    assert_eq!(&raw[40..44], &1000u32.to_le_bytes()); // timestamp
    assert_eq!(&raw[44..48], &42u32.to_le_bytes()); // value

    // Footer: id range then 16-byte signature.
    let footer = &raw[length - 24..];
    assert_eq!(&footer[0..4], &1u32.to_le_bytes());
    assert_eq!(&footer[4..8], &2u32.to_le_bytes());
    assert_eq!(footer[8..].len(), 16);
}

#[test]
fn flag_bits_occupy_the_top_byte() {
    let provider = Arc::new(MemoryAuthProvider::new());
    provider.insert(0x10, KeyType::Device, vec![0u8; 32]);
    let mut chain = AuthChain::new();
    chain.push(provider);

    let report = SignedReportBuilder::new(0x10)
        .key_type(KeyType::Device)
        .encrypted(true)
        .reading(Reading::new(0x1000, 1, 0, 0))
        .build(&chain)
        .unwrap();

    let raw = report.raw();
    let word = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);

    // encrypted = bit 0, key_type device = 01 in bits 1-2.
    assert_eq!(word >> 24, 0b011);
    assert_eq!(word & 0x00FF_FFFF, raw.len() as u32);
}

#[test]
fn signature_idempotence_across_keys() {
    for key_byte in [0u8, 1, 0xFF] {
        let provider = Arc::new(MemoryAuthProvider::new());
        provider.insert(0x77, KeyType::User, vec![key_byte; 32]);
        let mut chain = AuthChain::new();
        chain.push(provider);

        let report = SignedReportBuilder::new(0x77)
            .report_id(5)
            .key_type(KeyType::User)
            .reading(Reading::new(0x2000, 9, 100, 12345))
            .build(&chain)
            .unwrap();

        let mut decoded =
            tilegate::report::SignedListReport::decode(report.raw()).unwrap();
        assert_eq!(
            decoded.verify(&chain).unwrap(),
            tilegate::report::Verification::Authenticated(KeyType::User)
        );
    }
}
