// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Virtual devices: in-process endpoints implementing the tile RPC contract.
//!
//! A virtual device declares a device id and one or more tiles at distinct
//! addresses.  Device logic emits streaming reports, trace bytes and async
//! RPC completions through its [`DeviceChannel`]; the hosting adapter drains
//! the channel and feeds the same report pipeline real transports use.

use crate::errors::{Error, Result};
use crate::report::Report;
use crate::types::DeviceId;
use crate::virtual_device::format::RpcValue;
use crate::virtual_device::tile::{TileReply, VirtualTile};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Message from device logic to the hosting adapter.
#[derive(Debug)]
pub enum ChannelMessage {
    Report {
        device_id: DeviceId,
        report: Report,
    },
    Trace {
        device_id: DeviceId,
        data: Vec<u8>,
    },
    /// A broadcast report, delivered without any connection.
    Broadcast {
        device_id: DeviceId,
        report: Report,
    },
    /// Completion of an RPC that previously answered `async_pending`.
    AsyncFinish {
        device_id: DeviceId,
        result: Result<Vec<RpcValue>>,
    },
}

/// Handle device logic uses to push data toward the gateway.
#[derive(Debug, Clone)]
pub struct DeviceChannel {
    device_id: DeviceId,
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

impl DeviceChannel {
    #[must_use]
    pub fn new(device_id: DeviceId, tx: mpsc::UnboundedSender<ChannelMessage>) -> Self {
        Self { device_id, tx }
    }

    /// A channel with no consumer; pushes are silently discarded.
    ///
    /// Used for devices exercised outside an adapter (unit tests, tooling).
    #[must_use]
    pub fn detached(device_id: DeviceId) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { device_id, tx }
    }

    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Emit a streaming report.
    pub fn push_report(&self, report: Report) {
        let _ = self.tx.send(ChannelMessage::Report {
            device_id: self.device_id,
            report,
        });
    }

    /// Emit opaque trace bytes.
    pub fn push_trace(&self, data: Vec<u8>) {
        let _ = self.tx.send(ChannelMessage::Trace {
            device_id: self.device_id,
            data,
        });
    }

    /// Emit a broadcast report, visible without a connection.
    pub fn push_broadcast(&self, report: Report) {
        let _ = self.tx.send(ChannelMessage::Broadcast {
            device_id: self.device_id,
            report,
        });
    }

    /// Complete the pending asynchronous RPC on this device.
    pub fn finish_async(&self, result: Result<Vec<RpcValue>>) {
        let _ = self.tx.send(ChannelMessage::AsyncFinish {
            device_id: self.device_id,
            result,
        });
    }
}

/// An in-process device: tiles plus data queued for interface opens.
pub struct VirtualDevice {
    device_id: DeviceId,
    tiles: HashMap<u8, VirtualTile>,
    /// Reports streamed out as soon as the streaming interface opens.
    pending_reports: Vec<Report>,
    /// Trace blobs pushed as soon as the tracing interface opens.
    pending_traces: Vec<Vec<u8>>,
    script: Vec<u8>,
    highspeed: Vec<u8>,
}

impl VirtualDevice {
    #[must_use]
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            tiles: HashMap::new(),
            pending_reports: Vec::new(),
            pending_traces: Vec::new(),
            script: Vec::new(),
            highspeed: Vec::new(),
        }
    }

    /// A device with a controller tile at address 8 answering the reserved
    /// RPCs with the given 6-byte name.
    pub fn simple(device_id: DeviceId, name: &str) -> Result<Self> {
        let mut device = Self::new(device_id);
        device.add_tile(8, VirtualTile::controller(name, "vdev_1")?)?;
        Ok(device)
    }

    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Install a tile; addresses must be distinct.
    pub fn add_tile(&mut self, address: u8, tile: VirtualTile) -> Result<()> {
        use std::collections::hash_map::Entry;
        match self.tiles.entry(address) {
            Entry::Occupied(_) => Err(Error::BadArgument(format!(
                "tile address {} already occupied",
                address
            ))),
            Entry::Vacant(slot) => {
                slot.insert(tile);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn tile_mut(&mut self, address: u8) -> Option<&mut VirtualTile> {
        self.tiles.get_mut(&address)
    }

    /// Dispatch an RPC to the addressed tile.
    pub fn call_rpc(
        &mut self,
        address: u8,
        rpc_id: u16,
        payload: &[u8],
        channel: &DeviceChannel,
    ) -> Result<TileReply> {
        let tile = self
            .tiles
            .get_mut(&address)
            .ok_or(Error::TileNotFound(address))?;
        tile.call(address, rpc_id, payload, channel)
    }

    /// Queue a report for the next streaming interface open.
    pub fn queue_report(&mut self, report: Report) {
        self.pending_reports.push(report);
    }

    /// Queue trace bytes for the next tracing interface open.
    pub fn queue_trace(&mut self, data: Vec<u8>) {
        self.pending_traces.push(data);
    }

    /// Drain reports queued for the streaming interface.
    pub fn take_pending_reports(&mut self) -> Vec<Report> {
        std::mem::take(&mut self.pending_reports)
    }

    /// Drain traces queued for the tracing interface.
    pub fn take_pending_traces(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.pending_traces)
    }

    /// Append the next chunk of a script pushed to this device.
    pub fn append_script(&mut self, chunk: &[u8]) {
        self.script.extend_from_slice(chunk);
    }

    #[must_use]
    pub fn script(&self) -> &[u8] {
        &self.script
    }

    /// Append a high-speed debug/reflash blob.
    pub fn append_highspeed(&mut self, data: &[u8]) {
        self.highspeed.extend_from_slice(data);
    }

    #[must_use]
    pub fn highspeed(&self) -> &[u8] {
        &self.highspeed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::IndividualReport;
    use crate::types::{Reading, RPC_TILE_STATUS};

    #[test]
    fn rpc_reaches_the_addressed_tile() {
        let mut device = VirtualDevice::simple(1, "Simple").unwrap();
        let channel = DeviceChannel::detached(1);

        let reply = device.call_rpc(8, RPC_TILE_STATUS, &[], &channel).unwrap();
        match reply {
            TileReply::Payload(payload) => assert_eq!(payload.len(), 12),
            TileReply::Async { .. } => panic!("status rpc must be synchronous"),
        }
    }

    #[test]
    fn missing_tile_address() {
        let mut device = VirtualDevice::simple(1, "Simple").unwrap();
        let channel = DeviceChannel::detached(1);

        let err = device
            .call_rpc(11, RPC_TILE_STATUS, &[], &channel)
            .unwrap_err();
        assert_eq!(err, Error::TileNotFound(11));
    }

    #[test]
    fn duplicate_tile_address_rejected() {
        let mut device = VirtualDevice::simple(1, "Simple").unwrap();
        let err = device
            .add_tile(8, VirtualTile::new("other", (1, 0, 0)).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), "bad_argument");
    }

    #[test]
    fn queued_reports_drain_once() {
        let mut device = VirtualDevice::simple(1, "Simple").unwrap();
        device.queue_report(Report::Individual(IndividualReport::new(
            Reading::new(0x1000, 1, 10, 20),
            0,
        )));

        assert_eq!(device.take_pending_reports().len(), 1);
        assert!(device.take_pending_reports().is_empty());
    }

    #[test]
    fn script_chunks_accumulate() {
        let mut device = VirtualDevice::new(1);
        device.append_script(b"first ");
        device.append_script(b"second");
        assert_eq!(device.script(), b"first second");
    }

    #[tokio::test]
    async fn channel_routes_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = DeviceChannel::new(9, tx);

        channel.push_trace(vec![1, 2, 3]);
        channel.finish_async(Ok(vec![]));

        assert!(matches!(
            rx.recv().await,
            Some(ChannelMessage::Trace { device_id: 9, .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ChannelMessage::AsyncFinish { device_id: 9, .. })
        ));
    }

    #[test]
    fn detached_channel_discards() {
        let channel = DeviceChannel::detached(1);
        // Must not panic with no consumer.
        channel.push_trace(vec![0]);
        channel.finish_async(Ok(vec![]));
    }
}
