// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core identifiers and wire-level primitives shared across the gateway.

use crate::errors::{Error, Result};
use std::fmt;

/// 64-bit unique identifier of a physical or virtual device.
pub type DeviceId = u64;

/// Process-scoped connection handle, allocated by the host before `connect`.
///
/// Allocating the handle on the host side (rather than inside the adapter)
/// lets events that race the connect completion be correlated with the right
/// connection.
pub type ConnectionHandle = u32;

/// Identifier of one external client session.
pub type SessionId = u32;

/// Maximum RPC payload size in either direction.
pub const MAX_RPC_PAYLOAD: usize = 20;

/// Reserved RPC: tile identification (name + version + status flags).
pub const RPC_TILE_STATUS: u16 = 0x0004;
/// Reserved RPC: hardware version string.
pub const RPC_HARDWARE_VERSION: u16 = 0x0008;
/// Reserved RPC: reset the tile.
pub const RPC_RESET: u16 = 0x1002;

// ============================================================================
// Interfaces
// ============================================================================

/// The five sub-channels a connection can open on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Rpc,
    Streaming,
    Tracing,
    Script,
    Debug,
}

impl InterfaceKind {
    /// Stable lowercase name, used in connection strings and log records.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            InterfaceKind::Rpc => "rpc",
            InterfaceKind::Streaming => "streaming",
            InterfaceKind::Tracing => "tracing",
            InterfaceKind::Script => "script",
            InterfaceKind::Debug => "debug",
        }
    }

    /// Parse an interface name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "rpc" => Ok(InterfaceKind::Rpc),
            "streaming" => Ok(InterfaceKind::Streaming),
            "tracing" => Ok(InterfaceKind::Tracing),
            "script" => Ok(InterfaceKind::Script),
            "debug" => Ok(InterfaceKind::Debug),
            other => Err(Error::BadArgument(format!("unknown interface: {}", other))),
        }
    }

    fn bit(self) -> u8 {
        match self {
            InterfaceKind::Rpc => 1 << 0,
            InterfaceKind::Streaming => 1 << 1,
            InterfaceKind::Tracing => 1 << 2,
            InterfaceKind::Script => 1 << 3,
            InterfaceKind::Debug => 1 << 4,
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of open interfaces on one connection, stored as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceSet(u8);

impl InterfaceSet {
    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn contains(self, iface: InterfaceKind) -> bool {
        self.0 & iface.bit() != 0
    }

    pub fn insert(&mut self, iface: InterfaceKind) {
        self.0 |= iface.bit();
    }

    pub fn remove(&mut self, iface: InterfaceKind) {
        self.0 &= !iface.bit();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// ============================================================================
// Streams
// ============================================================================

/// Stream classification encoded in the top 4 bits of a stream id.
///
/// The gateway never inspects reading values; the class is carried through
/// for subscribers that care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamClass {
    Input,
    Output,
    Buffered,
    Unbuffered,
    Counter,
    Constant,
    System,
    Reserved(u8),
}

impl StreamClass {
    /// Classify a stream id by its top nibble.
    #[must_use]
    pub fn of(stream_id: u16) -> Self {
        match (stream_id >> 12) & 0xF {
            0x0 => StreamClass::Input,
            0x1 => StreamClass::Output,
            0x2 => StreamClass::Buffered,
            0x3 => StreamClass::Unbuffered,
            0x4 => StreamClass::Counter,
            0x5 => StreamClass::Constant,
            0x6 => StreamClass::System,
            other => StreamClass::Reserved(other as u8),
        }
    }
}

/// One timestamped sensor value belonging to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub stream_id: u16,
    /// Monotonically increasing per `(device, selector)`.
    pub reading_id: u32,
    /// Device uptime in seconds when the reading was taken.
    pub timestamp: u32,
    pub value: u32,
}

impl Reading {
    #[must_use]
    pub fn new(stream_id: u16, reading_id: u32, timestamp: u32, value: u32) -> Self {
        Self {
            stream_id,
            reading_id,
            timestamp,
            value,
        }
    }

    #[must_use]
    pub fn class(&self) -> StreamClass {
        StreamClass::of(self.stream_id)
    }
}

// ============================================================================
// RPC status and responses
// ============================================================================

/// Orthogonal RPC status bits.
pub mod rpc_status {
    /// Tile is busy; the caller may retry.
    pub const BUSY: u8 = 1 << 0;
    /// Response will arrive later through a side channel.
    pub const ASYNC_PENDING: u8 = 1 << 1;
    /// Tile-defined application error carried in the payload.
    pub const APP_ERROR: u8 = 1 << 2;
    /// The response carries data.
    pub const HAS_PAYLOAD: u8 = 1 << 3;

    /// Sentinel: no tile at the addressed slot.
    pub const ERR_TILE_NOT_FOUND: u8 = 0xFF;
    /// Sentinel: the tile does not implement the RPC id.
    pub const ERR_RPC_NOT_FOUND: u8 = 0xFE;
    /// Sentinel: the argument payload did not match the declared format.
    pub const ERR_INVALID_ARGS: u8 = 0xFD;
}

/// Terminal response of an RPC exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse {
    pub status: u8,
    pub payload: Vec<u8>,
}

impl RpcResponse {
    #[must_use]
    pub fn new(status: u8, payload: Vec<u8>) -> Self {
        Self { status, payload }
    }

    /// Successful response carrying `payload`.
    #[must_use]
    pub fn ok(payload: Vec<u8>) -> Self {
        let status = if payload.is_empty() {
            0
        } else {
            rpc_status::HAS_PAYLOAD
        };
        Self { status, payload }
    }

    #[must_use]
    pub fn is_app_error(&self) -> bool {
        self.status & rpc_status::APP_ERROR != 0
    }

    #[must_use]
    pub fn has_payload(&self) -> bool {
        self.status & rpc_status::HAS_PAYLOAD != 0
    }
}

/// Interpret a raw wire status byte, converting sentinel and transient
/// statuses into the matching error condition.
///
/// Terminal statuses (success or application error) come back as `Ok`; the
/// caller inspects the status bits.
pub fn unpack_rpc_status(
    status: u8,
    payload: Vec<u8>,
    address: u8,
    rpc_id: u16,
) -> Result<RpcResponse> {
    match status {
        rpc_status::ERR_TILE_NOT_FOUND => Err(Error::TileNotFound(address)),
        rpc_status::ERR_RPC_NOT_FOUND => Err(Error::RpcNotFound { address, rpc_id }),
        rpc_status::ERR_INVALID_ARGS => Err(Error::RpcInvalidArgs(format!(
            "rpc {}:{:#06x} rejected argument payload",
            address, rpc_id
        ))),
        s if s & rpc_status::BUSY != 0 => Err(Error::TileBusy),
        s => {
            if s & rpc_status::HAS_PAYLOAD == 0 && !payload.is_empty() {
                return Err(Error::RpcInvalidResponse(
                    "payload present but has_payload bit clear".into(),
                ));
            }
            Ok(RpcResponse::new(s, payload))
        }
    }
}

/// Progress event source, reported while a long-running operation streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOperation {
    Script,
    Debug,
}

impl ProgressOperation {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ProgressOperation::Script => "script",
            ProgressOperation::Debug => "debug",
        }
    }
}
