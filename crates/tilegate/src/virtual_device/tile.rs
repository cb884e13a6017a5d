// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Virtual tiles: addressable RPC handler tables with a small state machine.
//!
//! A tile registers handlers keyed by RPC id, each with declared argument and
//! result format descriptors.  The dispatcher validates argument size before
//! invoking the handler and result size after, so handlers only ever see
//! well-formed values.
//!
//! A handler may return [`RpcReply::AsyncPending`]: the dispatcher then holds
//! the reply until the device completes it through its channel.

use crate::errors::{Error, Result};
use crate::types::{RPC_HARDWARE_VERSION, RPC_RESET, RPC_TILE_STATUS};
use crate::virtual_device::device::DeviceChannel;
use crate::virtual_device::format::{FormatDescriptor, RpcValue};
use std::collections::HashMap;

/// Runtime state flags of a tile, exposed through the `0x0004` status RPC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileState {
    pub configured: bool,
    pub running: bool,
    pub trapped: bool,
    pub debug_mode: bool,
}

impl TileState {
    /// Status byte layout: bit0 configured, bit1 running, bit2 trapped,
    /// bit3 debug_mode.
    #[must_use]
    pub fn status_byte(self) -> u8 {
        u8::from(self.configured)
            | (u8::from(self.running) << 1)
            | (u8::from(self.trapped) << 2)
            | (u8::from(self.debug_mode) << 3)
    }
}

/// Context handed to an RPC handler.
pub struct TileContext<'a> {
    pub state: &'a mut TileState,
    pub channel: &'a DeviceChannel,
}

/// Handler outcome before result packing.
pub enum RpcReply {
    /// Immediate result values, packed with the declared result format.
    Values(Vec<RpcValue>),
    /// The reply will arrive later through the device channel.
    AsyncPending,
}

/// Result of dispatching one RPC on a tile.
#[derive(Debug)]
pub enum TileReply {
    /// Packed result payload.
    Payload(Vec<u8>),
    /// Reply pending; the result descriptor packs the eventual values.
    Async { resp: FormatDescriptor },
}

type HandlerFn = Box<dyn Fn(&mut TileContext<'_>, &[RpcValue]) -> Result<RpcReply> + Send + Sync>;

struct RpcEntry {
    args: FormatDescriptor,
    resp: FormatDescriptor,
    handler: HandlerFn,
}

/// One addressable tile inside a virtual device.
pub struct VirtualTile {
    name: [u8; 6],
    version: (u8, u8, u8),
    pub state: TileState,
    rpcs: HashMap<u16, RpcEntry>,
}

impl VirtualTile {
    /// Create a tile with a 6-byte name (shorter names are space-padded).
    pub fn new(name: &str, version: (u8, u8, u8)) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() > 6 {
            return Err(Error::BadArgument(format!(
                "tile name {:?} exceeds 6 bytes",
                name
            )));
        }

        let mut padded = [b' '; 6];
        padded[..bytes.len()].copy_from_slice(bytes);

        Ok(Self {
            name: padded,
            version,
            state: TileState {
                configured: true,
                running: true,
                ..TileState::default()
            },
            rpcs: HashMap::new(),
        })
    }

    /// Create a controller tile implementing the reserved RPCs.
    ///
    /// `0x0004` returns `(0xFFFF, name, major, minor, patch, status)`,
    /// `0x0008` the hardware version string, `0x1002` resets the tile state.
    pub fn controller(name: &str, hardware_version: &str) -> Result<Self> {
        let mut tile = Self::new(name, (1, 0, 0))?;

        let tile_name = tile.name;
        let version = tile.version;
        tile.register_rpc(RPC_TILE_STATUS, "", "H6sBBBB", move |ctx, _args| {
            Ok(RpcReply::Values(vec![
                RpcValue::U16(0xFFFF),
                RpcValue::Bytes(tile_name.to_vec()),
                RpcValue::U8(version.0),
                RpcValue::U8(version.1),
                RpcValue::U8(version.2),
                RpcValue::U8(ctx.state.status_byte()),
            ]))
        })?;

        let hw_version = hardware_version.as_bytes().to_vec();
        if hw_version.len() > crate::types::MAX_RPC_PAYLOAD {
            return Err(Error::BadArgument(format!(
                "hardware version {:?} exceeds the rpc payload",
                hardware_version
            )));
        }
        tile.register_rpc(RPC_HARDWARE_VERSION, "", "V", move |_ctx, _args| {
            Ok(RpcReply::Values(vec![RpcValue::Bytes(hw_version.clone())]))
        })?;

        tile.register_rpc(RPC_RESET, "", "", |ctx, _args| {
            ctx.state.trapped = false;
            ctx.state.debug_mode = false;
            ctx.state.configured = true;
            ctx.state.running = true;
            Ok(RpcReply::Values(vec![]))
        })?;

        Ok(tile)
    }

    /// Register an RPC handler.
    pub fn register_rpc(
        &mut self,
        rpc_id: u16,
        arg_format: &str,
        resp_format: &str,
        handler: impl Fn(&mut TileContext<'_>, &[RpcValue]) -> Result<RpcReply> + Send + Sync + 'static,
    ) -> Result<()> {
        if self.rpcs.contains_key(&rpc_id) {
            return Err(Error::BadArgument(format!(
                "rpc {:#06x} registered twice",
                rpc_id
            )));
        }

        self.rpcs.insert(
            rpc_id,
            RpcEntry {
                args: FormatDescriptor::parse(arg_format)?,
                resp: FormatDescriptor::parse(resp_format)?,
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn has_rpc(&self, rpc_id: u16) -> bool {
        self.rpcs.contains_key(&rpc_id)
    }

    #[must_use]
    pub fn name(&self) -> &[u8; 6] {
        &self.name
    }

    /// Dispatch one RPC: validate arguments, invoke, validate the result.
    pub fn call(
        &mut self,
        address: u8,
        rpc_id: u16,
        payload: &[u8],
        channel: &DeviceChannel,
    ) -> Result<TileReply> {
        // TileState is plain data; the handler works on a scratch copy so
        // its borrow does not pin the handler table.
        let mut state = self.state;

        let (reply, resp) = {
            let entry = self
                .rpcs
                .get(&rpc_id)
                .ok_or(Error::RpcNotFound { address, rpc_id })?;

            let args = entry.args.unpack(payload)?;
            let mut ctx = TileContext {
                state: &mut state,
                channel,
            };
            ((entry.handler)(&mut ctx, &args)?, entry.resp.clone())
        };

        self.state = state;

        match reply {
            RpcReply::Values(values) => {
                let packed = resp.pack(&values).map_err(|e| {
                    Error::RpcInvalidResponse(format!(
                        "rpc {}:{:#06x} returned mismatched values: {}",
                        address, rpc_id, e
                    ))
                })?;
                Ok(TileReply::Payload(packed))
            }
            RpcReply::AsyncPending => Ok(TileReply::Async { resp }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> DeviceChannel {
        DeviceChannel::detached(1)
    }

    #[test]
    fn status_byte_layout() {
        let state = TileState {
            configured: true,
            running: true,
            trapped: false,
            debug_mode: false,
        };
        assert_eq!(state.status_byte(), 0b11);

        let trapped = TileState {
            trapped: true,
            debug_mode: true,
            ..TileState::default()
        };
        assert_eq!(trapped.status_byte(), 0b1100);
    }

    #[test]
    fn controller_status_rpc_payload() {
        let mut tile = VirtualTile::controller("Simple", "vdev_1").unwrap();
        let reply = tile.call(8, RPC_TILE_STATUS, &[], &channel()).unwrap();

        match reply {
            TileReply::Payload(payload) => assert_eq!(
                payload,
                vec![0xff, 0xff, 0x53, 0x69, 0x6d, 0x70, 0x6c, 0x65, 0x01, 0x00, 0x00, 0x03]
            ),
            TileReply::Async { .. } => panic!("status rpc must reply immediately"),
        }
    }

    #[test]
    fn controller_hardware_version_rpc() {
        let mut tile = VirtualTile::controller("Simple", "vdev_1").unwrap();
        match tile.call(8, RPC_HARDWARE_VERSION, &[], &channel()).unwrap() {
            TileReply::Payload(payload) => assert_eq!(payload, b"vdev_1"),
            TileReply::Async { .. } => panic!("unexpected async reply"),
        }
    }

    #[test]
    fn reset_clears_fault_flags() {
        let mut tile = VirtualTile::controller("Simple", "vdev_1").unwrap();
        tile.state.trapped = true;
        tile.state.debug_mode = true;

        tile.call(8, RPC_RESET, &[], &channel()).unwrap();
        assert!(!tile.state.trapped);
        assert!(!tile.state.debug_mode);
        assert!(tile.state.running);
    }

    #[test]
    fn unknown_rpc_id() {
        let mut tile = VirtualTile::controller("Simple", "vdev_1").unwrap();
        let err = tile.call(8, 0xBEEF, &[], &channel()).unwrap_err();
        assert_eq!(
            err,
            Error::RpcNotFound {
                address: 8,
                rpc_id: 0xBEEF
            }
        );
    }

    #[test]
    fn argument_size_validated_before_handler_runs() {
        let mut tile = VirtualTile::new("t", (1, 0, 0)).unwrap();
        tile.register_rpc(0x8000, "H", "", |_ctx, _args| Ok(RpcReply::Values(vec![])))
            .unwrap();

        let err = tile.call(8, 0x8000, &[1, 2, 3], &channel()).unwrap_err();
        assert_eq!(err.kind(), "rpc_invalid_args");
    }

    #[test]
    fn mismatched_result_values_rejected() {
        let mut tile = VirtualTile::new("t", (1, 0, 0)).unwrap();
        tile.register_rpc(0x8001, "", "H", |_ctx, _args| {
            Ok(RpcReply::Values(vec![RpcValue::U8(1)]))
        })
        .unwrap();

        let err = tile.call(8, 0x8001, &[], &channel()).unwrap_err();
        assert_eq!(err.kind(), "rpc_invalid_response");
    }

    #[test]
    fn long_tile_name_rejected() {
        assert!(VirtualTile::new("toolong7", (1, 0, 0)).is_err());
    }

    #[test]
    fn handler_state_mutations_persist() {
        let mut tile = VirtualTile::new("t", (1, 0, 0)).unwrap();
        tile.register_rpc(0x8002, "", "", |ctx, _args| {
            ctx.state.trapped = true;
            Ok(RpcReply::Values(vec![]))
        })
        .unwrap();

        tile.call(8, 0x8002, &[], &channel()).unwrap();
        assert!(tile.state.trapped);
    }
}
