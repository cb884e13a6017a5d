// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC wire frame codec used by byte-oriented transports.
//!
//! # Wire Format
//!
//! ```text
//! request:  address(1) rpc_id_low(1) rpc_id_high(1) payload_len(1) payload(0-20)
//! response: status(1) payload_len(1) payload(0-20)
//! ```
//!
//! In-process transports skip this framing; serial and BLE-style links put
//! these frames on the wire verbatim.

use crate::errors::{Error, Result};
use crate::types::{unpack_rpc_status, RpcResponse, MAX_RPC_PAYLOAD};

/// Fixed bytes before the request payload.
pub const REQUEST_HEADER_LEN: usize = 4;
/// Fixed bytes before the response payload.
pub const RESPONSE_HEADER_LEN: usize = 2;

/// A decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequestFrame {
    pub address: u8,
    pub rpc_id: u16,
    pub payload: Vec<u8>,
}

/// Encode a request frame.
pub fn pack_request(address: u8, rpc_id: u16, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_RPC_PAYLOAD {
        return Err(Error::RpcInvalidArgs(format!(
            "payload {} exceeds {} bytes",
            payload.len(),
            MAX_RPC_PAYLOAD
        )));
    }

    let mut frame = Vec::with_capacity(REQUEST_HEADER_LEN + payload.len());
    frame.push(address);
    frame.push((rpc_id & 0xFF) as u8);
    frame.push((rpc_id >> 8) as u8);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode a request frame.
pub fn parse_request(frame: &[u8]) -> Result<RpcRequestFrame> {
    if frame.len() < REQUEST_HEADER_LEN {
        return Err(Error::RpcInvalidArgs(format!(
            "request frame too short: {} bytes",
            frame.len()
        )));
    }

    let payload_len = frame[3] as usize;
    if payload_len > MAX_RPC_PAYLOAD {
        return Err(Error::RpcInvalidArgs(format!(
            "declared payload {} exceeds {} bytes",
            payload_len, MAX_RPC_PAYLOAD
        )));
    }
    if frame.len() != REQUEST_HEADER_LEN + payload_len {
        return Err(Error::RpcInvalidArgs(format!(
            "frame length {} does not match declared payload {}",
            frame.len(),
            payload_len
        )));
    }

    Ok(RpcRequestFrame {
        address: frame[0],
        rpc_id: u16::from(frame[1]) | (u16::from(frame[2]) << 8),
        payload: frame[REQUEST_HEADER_LEN..].to_vec(),
    })
}

/// Encode a response frame from a terminal response.
pub fn pack_response(response: &RpcResponse) -> Result<Vec<u8>> {
    if response.payload.len() > MAX_RPC_PAYLOAD {
        return Err(Error::RpcInvalidResponse(format!(
            "payload {} exceeds {} bytes",
            response.payload.len(),
            MAX_RPC_PAYLOAD
        )));
    }

    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + response.payload.len());
    frame.push(response.status);
    frame.push(response.payload.len() as u8);
    frame.extend_from_slice(&response.payload);
    Ok(frame)
}

/// Decode a response frame, mapping sentinel statuses to errors.
///
/// `address` and `rpc_id` only contextualize the error conditions.
pub fn parse_response(frame: &[u8], address: u8, rpc_id: u16) -> Result<RpcResponse> {
    if frame.len() < RESPONSE_HEADER_LEN {
        return Err(Error::RpcInvalidResponse(format!(
            "response frame too short: {} bytes",
            frame.len()
        )));
    }

    let payload_len = frame[1] as usize;
    if payload_len > MAX_RPC_PAYLOAD {
        return Err(Error::RpcInvalidResponse(format!(
            "declared payload {} exceeds {} bytes",
            payload_len, MAX_RPC_PAYLOAD
        )));
    }
    if frame.len() != RESPONSE_HEADER_LEN + payload_len {
        return Err(Error::RpcInvalidResponse(format!(
            "frame length {} does not match declared payload {}",
            frame.len(),
            payload_len
        )));
    }

    unpack_rpc_status(
        frame[0],
        frame[RESPONSE_HEADER_LEN..].to_vec(),
        address,
        rpc_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::rpc_status;

    #[test]
    fn request_roundtrip() {
        let frame = pack_request(8, 0x1002, &[1, 2, 3]).unwrap();
        assert_eq!(frame, vec![8, 0x02, 0x10, 3, 1, 2, 3]);

        let decoded = parse_request(&frame).unwrap();
        assert_eq!(decoded.address, 8);
        assert_eq!(decoded.rpc_id, 0x1002);
        assert_eq!(decoded.payload, vec![1, 2, 3]);
    }

    #[test]
    fn request_rejects_oversized_payload() {
        let err = pack_request(8, 4, &[0u8; 21]).unwrap_err();
        assert_eq!(err.kind(), "rpc_invalid_args");
    }

    #[test]
    fn request_rejects_length_mismatch() {
        let mut frame = pack_request(8, 4, &[1, 2]).unwrap();
        frame[3] = 5;
        assert!(parse_request(&frame).is_err());
    }

    #[test]
    fn response_roundtrip() {
        let response = RpcResponse::ok(vec![0xAA, 0xBB]);
        let frame = pack_response(&response).unwrap();
        assert_eq!(frame[0], rpc_status::HAS_PAYLOAD);
        assert_eq!(frame[1], 2);

        let decoded = parse_response(&frame, 8, 4).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn response_sentinels_map_to_errors() {
        let frame = vec![rpc_status::ERR_TILE_NOT_FOUND, 0];
        let err = parse_response(&frame, 9, 4).unwrap_err();
        assert_eq!(err.kind(), "tile_not_found");

        let frame = vec![rpc_status::BUSY, 0];
        let err = parse_response(&frame, 8, 4).unwrap_err();
        assert_eq!(err.kind(), "tile_busy");
    }

    #[test]
    fn empty_payload_frames() {
        let frame = pack_request(8, 0x0004, &[]).unwrap();
        assert_eq!(frame.len(), REQUEST_HEADER_LEN);

        let response = pack_response(&RpcResponse::ok(Vec::new())).unwrap();
        assert_eq!(response, vec![0, 0]);
    }
}
