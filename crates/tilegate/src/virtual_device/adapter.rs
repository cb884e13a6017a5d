// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Adapter hosting in-process virtual devices behind the full transport
//! contract.
//!
//! Virtual devices behave exactly like remote ones: scan sightings, connect
//! with single-connection arbitration, explicit interfaces, serialized RPCs,
//! and reports that travel through the same assembler pipeline as bytes from
//! a physical transport.  A background pump drains the shared device channel
//! and turns messages into adapter events; it never runs while any adapter
//! lock is held.

use crate::adapter::base::{AdapterBase, EventEnvelope};
use crate::adapter::connection::ConnectionTable;
use crate::adapter::{retry, AdapterCapabilities, AdapterEvent, DeviceAdapter};
use crate::errors::{Error, Result};
use crate::report::{Fragment, Report, ReportAssembler};
use crate::scan::ScanResult;
use crate::types::{
    ConnectionHandle, DeviceId, InterfaceKind, ProgressOperation, RpcResponse, MAX_RPC_PAYLOAD,
};
use crate::virtual_device::device::{ChannelMessage, DeviceChannel, VirtualDevice};
use crate::virtual_device::format::FormatDescriptor;
use crate::virtual_device::tile::TileReply;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Script bytes streamed per progress notification.
const SCRIPT_CHUNK: usize = 4096;

/// Signal strength reported for in-process devices.
const VIRTUAL_SIGNAL: i32 = -30;

struct PendingAsync {
    resp: FormatDescriptor,
    tx: oneshot::Sender<Result<Vec<u8>>>,
}

struct Inner {
    base: AdapterBase,
    caps: AdapterCapabilities,
    devices: DashMap<DeviceId, Arc<Mutex<VirtualDevice>>>,
    connections: ConnectionTable,
    device_conns: DashMap<DeviceId, ConnectionHandle>,
    assemblers: DashMap<ConnectionHandle, Mutex<ReportAssembler>>,
    pending_async: DashMap<DeviceId, PendingAsync>,
    channel_tx: mpsc::UnboundedSender<ChannelMessage>,
    channel_rx: Mutex<Option<mpsc::UnboundedReceiver<ChannelMessage>>>,
    pump_cancel: Mutex<Option<CancellationToken>>,
    started: AtomicBool,
    stopped: AtomicBool,
    scan_validity: Duration,
    max_report_bytes: usize,
    async_deadline: Duration,
}

/// Adapter for locally hosted synthetic devices.
pub struct VirtualAdapter {
    inner: Arc<Inner>,
}

impl VirtualAdapter {
    #[must_use]
    pub fn new(queue_depth: usize) -> Self {
        Self::with_limits(
            queue_depth,
            1024 * 1024,
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
    }

    #[must_use]
    pub fn with_limits(
        queue_depth: usize,
        max_report_bytes: usize,
        scan_validity: Duration,
        async_deadline: Duration,
    ) -> Self {
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                base: AdapterBase::new("virtual", queue_depth),
                caps: AdapterCapabilities {
                    supports_broadcast: true,
                    supports_streaming: true,
                    supports_tracing: true,
                    supports_debug: true,
                    supports_script: true,
                    supports_rpc: true,
                    requires_probe: false,
                    max_concurrent_connections: 16,
                },
                devices: DashMap::new(),
                connections: ConnectionTable::new(),
                device_conns: DashMap::new(),
                assemblers: DashMap::new(),
                pending_async: DashMap::new(),
                channel_tx,
                channel_rx: Mutex::new(Some(channel_rx)),
                pump_cancel: Mutex::new(None),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                scan_validity,
                max_report_bytes,
                async_deadline,
            }),
        }
    }

    /// Host a device, returning the channel its logic pushes data through.
    pub fn add_device(&self, device: VirtualDevice) -> Result<DeviceChannel> {
        use dashmap::mapref::entry::Entry;

        let device_id = device.device_id();
        match self.inner.devices.entry(device_id) {
            Entry::Occupied(_) => Err(Error::BadArgument(format!(
                "device {:#x} already hosted",
                device_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(device)));
                Ok(DeviceChannel::new(device_id, self.inner.channel_tx.clone()))
            }
        }
    }

    /// Channel for pushing data on behalf of a hosted device.
    pub fn channel(&self, device_id: DeviceId) -> Result<DeviceChannel> {
        if !self.inner.devices.contains_key(&device_id) {
            return Err(Error::DeviceNotFound(format!("{:x}", device_id)));
        }
        Ok(DeviceChannel::new(device_id, self.inner.channel_tx.clone()))
    }

    fn emit_scan(&self) {
        let now = Instant::now();
        for entry in self.inner.devices.iter() {
            let device_id = *entry.key();
            let pending_data = !entry.value().lock().script().is_empty();
            let sighting = ScanResult {
                device_id,
                connection_string: format!("{:x}", device_id),
                signal_strength: VIRTUAL_SIGNAL,
                expires: now + self.inner.scan_validity,
                user_connected: self.inner.device_conns.contains_key(&device_id),
                pending_data,
                low_voltage: false,
                adapter_index: 0,
            };

            self.inner.base.notify(EventEnvelope {
                adapter_index: 0,
                conn_string: sighting.connection_string.clone(),
                conn_id: None,
                device_id: Some(device_id),
                event: AdapterEvent::DeviceSeen(sighting),
            });
        }
    }

    fn device(&self, device_id: DeviceId) -> Result<Arc<Mutex<VirtualDevice>>> {
        self.inner
            .devices
            .get(&device_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| Error::DeviceNotFound(format!("{:x}", device_id)))
    }

    /// One RPC dispatch attempt; busy retries wrap this.
    async fn dispatch_rpc(
        &self,
        conn_id: ConnectionHandle,
        device_id: DeviceId,
        address: u8,
        rpc_id: u16,
        payload: &[u8],
    ) -> Result<RpcResponse> {
        let device = self.device(device_id)?;
        let channel = DeviceChannel::new(device_id, self.inner.channel_tx.clone());

        let reply = {
            let mut device = device.lock();
            device.call_rpc(address, rpc_id, payload, &channel)?
        };

        match reply {
            TileReply::Payload(payload) => Ok(RpcResponse::ok(payload)),
            TileReply::Async { resp } => {
                use dashmap::mapref::entry::Entry;

                let (tx, rx) = oneshot::channel();
                match self.inner.pending_async.entry(device_id) {
                    Entry::Occupied(_) => return Err(Error::AsyncRpcInFlight),
                    Entry::Vacant(slot) => {
                        slot.insert(PendingAsync { resp, tx });
                    }
                }

                log::debug!(
                    "[virtual] rpc {}:{:#06x} pending async on conn {}",
                    address,
                    rpc_id,
                    conn_id
                );

                match tokio::time::timeout(self.inner.async_deadline, rx).await {
                    Ok(Ok(result)) => result.map(RpcResponse::ok),
                    Ok(Err(_)) => Err(Error::Disconnected("device went away".into())),
                    Err(_) => {
                        self.inner.pending_async.remove(&device_id);
                        Err(Error::Timeout)
                    }
                }
            }
        }
    }

    fn teardown_connection(&self, conn_id: ConnectionHandle, reason: &str, expected: bool) {
        if let Some(info) = self.inner.connections.mark_disconnected(conn_id) {
            self.inner.device_conns.remove(&info.device_id);
            self.inner.assemblers.remove(&conn_id);
            if let Some((_, pending)) = self.inner.pending_async.remove(&info.device_id) {
                drop(pending); // wakes the waiter with Disconnected
            }

            self.inner.base.notify(EventEnvelope {
                adapter_index: 0,
                conn_string: info.conn_string,
                conn_id: Some(conn_id),
                device_id: Some(info.device_id),
                event: AdapterEvent::Disconnection {
                    reason: reason.to_string(),
                    expected,
                },
            });
        }
        self.inner.connections.teardown(conn_id);
    }
}

#[async_trait]
impl DeviceAdapter for VirtualAdapter {
    fn name(&self) -> &str {
        "virtual"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.inner.caps
    }

    fn base(&self) -> &AdapterBase {
        &self.inner.base
    }

    fn can_connect(&self) -> bool {
        self.inner.device_conns.len() < self.inner.caps.max_concurrent_connections
    }

    async fn start(&self) -> Result<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(Error::TransportUnavailable(
                "virtual adapter cannot be restarted".into(),
            ));
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let rx = self
            .inner
            .channel_rx
            .lock()
            .take()
            .ok_or_else(|| Error::TransportUnavailable("device channel already taken".into()))?;

        let cancel = CancellationToken::new();
        *self.inner.pump_cancel.lock() = Some(cancel.clone());
        tokio::spawn(pump(self.inner.clone(), rx, cancel));

        self.emit_scan();
        log::info!(
            "[virtual] started with {} hosted devices",
            self.inner.devices.len()
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.inner.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for conn_id in self.inner.connections.connected_handles() {
            self.teardown_connection(conn_id, "adapter stopping", true);
        }

        if let Some(cancel) = self.inner.pump_cancel.lock().take() {
            cancel.cancel();
        }
        log::info!("[virtual] stopped");
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        self.emit_scan();
        Ok(())
    }

    async fn connect(&self, conn_id: ConnectionHandle, conn_string: &str) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        if !self.inner.started.load(Ordering::SeqCst) || self.inner.stopped.load(Ordering::SeqCst) {
            return Err(Error::TransportUnavailable("adapter not started".into()));
        }

        let device_id = DeviceId::from_str_radix(conn_string, 16)
            .map_err(|_| Error::BadArgument(format!("bad connection string {:?}", conn_string)))?;

        if !self.inner.devices.contains_key(&device_id) {
            return Err(Error::DeviceNotFound(conn_string.to_string()));
        }

        match self.inner.device_conns.entry(device_id) {
            Entry::Occupied(_) => return Err(Error::DeviceInUse(device_id)),
            Entry::Vacant(slot) => {
                slot.insert(conn_id);
            }
        }

        if let Err(err) = self.inner.connections.setup(conn_id, device_id, conn_string) {
            self.inner.device_conns.remove(&device_id);
            return Err(err);
        }

        self.inner.connections.mark_connected(conn_id)?;
        // The rpc interface opens implicitly on connect.
        self.inner
            .connections
            .open_interface(conn_id, InterfaceKind::Rpc, &self.inner.caps)?;

        self.inner.base.notify(EventEnvelope {
            adapter_index: 0,
            conn_string: conn_string.to_string(),
            conn_id: Some(conn_id),
            device_id: Some(device_id),
            event: AdapterEvent::Connection,
        });
        Ok(())
    }

    async fn disconnect(&self, conn_id: ConnectionHandle) -> Result<()> {
        self.teardown_connection(conn_id, "user requested disconnect", true);
        Ok(())
    }

    async fn open_interface(&self, conn_id: ConnectionHandle, iface: InterfaceKind) -> Result<()> {
        self.inner
            .connections
            .open_interface(conn_id, iface, &self.inner.caps)?;
        let device_id = self.inner.connections.device_of(conn_id)?;

        match iface {
            InterfaceKind::Streaming => {
                self.inner.assemblers.insert(
                    conn_id,
                    Mutex::new(ReportAssembler::new(
                        Some(device_id),
                        self.inner.max_report_bytes,
                    )),
                );

                // Flush reports the device queued for interface open.
                let queued = self.device(device_id)?.lock().take_pending_reports();
                let channel = DeviceChannel::new(device_id, self.inner.channel_tx.clone());
                for report in queued {
                    channel.push_report(report);
                }
            }
            InterfaceKind::Tracing => {
                let queued = self.device(device_id)?.lock().take_pending_traces();
                let channel = DeviceChannel::new(device_id, self.inner.channel_tx.clone());
                for data in queued {
                    channel.push_trace(data);
                }
            }
            _ => {}
        }

        Ok(())
    }

    async fn close_interface(&self, conn_id: ConnectionHandle, iface: InterfaceKind) -> Result<()> {
        self.inner.connections.close_interface(conn_id, iface)?;
        if iface == InterfaceKind::Streaming {
            self.inner.assemblers.remove(&conn_id);
        }
        Ok(())
    }

    async fn send_rpc(
        &self,
        conn_id: ConnectionHandle,
        address: u8,
        rpc_id: u16,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<RpcResponse> {
        if payload.len() > MAX_RPC_PAYLOAD {
            return Err(Error::RpcInvalidArgs(format!(
                "payload {} exceeds {} bytes",
                payload.len(),
                MAX_RPC_PAYLOAD
            )));
        }

        self.inner
            .connections
            .require_interface(conn_id, InterfaceKind::Rpc)?;
        let device_id = self.inner.connections.device_of(conn_id)?;
        let cancel = self.inner.connections.cancel_token(conn_id)?;
        let rpc_lock = self.inner.connections.rpc_lock(conn_id)?;

        let work = async {
            // Strict per-connection request ordering.
            let _serialized = rpc_lock.lock().await;
            retry::with_busy_retry(|| self.dispatch_rpc(conn_id, device_id, address, rpc_id, payload))
                .await
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Disconnected("connection closed".into())),
            result = tokio::time::timeout(timeout, work) => match result {
                Ok(response) => response,
                Err(_) => Err(Error::Timeout),
            },
        }
    }

    async fn send_script(&self, conn_id: ConnectionHandle, script: &[u8]) -> Result<()> {
        self.inner
            .connections
            .require_interface(conn_id, InterfaceKind::Script)?;
        let device_id = self.inner.connections.device_of(conn_id)?;
        let device = self.device(device_id)?;
        let conn_string = format!("{:x}", device_id);

        let total = script.len() as u32;
        let mut sent = 0u32;

        for chunk in script.chunks(SCRIPT_CHUNK.max(1)) {
            device.lock().append_script(chunk);
            sent += chunk.len() as u32;

            self.inner.base.notify(EventEnvelope {
                adapter_index: 0,
                conn_string: conn_string.clone(),
                conn_id: Some(conn_id),
                device_id: Some(device_id),
                event: AdapterEvent::Progress {
                    operation: ProgressOperation::Script,
                    finished: sent,
                    total,
                },
            });

            // Let the runtime breathe between chunks like a real link would.
            tokio::task::yield_now().await;
        }

        Ok(())
    }

    async fn send_highspeed(&self, conn_id: ConnectionHandle, data: &[u8]) -> Result<()> {
        self.inner
            .connections
            .require_interface(conn_id, InterfaceKind::Debug)?;
        let device_id = self.inner.connections.device_of(conn_id)?;
        self.device(device_id)?.lock().append_highspeed(data);
        Ok(())
    }
}

/// Background pump translating device channel messages into adapter events.
async fn pump(
    inner: Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<ChannelMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match message {
            ChannelMessage::Report { device_id, report } => {
                deliver_report(&inner, device_id, report);
            }
            ChannelMessage::Trace { device_id, data } => {
                let Some(conn_id) = inner.device_conns.get(&device_id).map(|c| *c) else {
                    continue;
                };
                if inner
                    .connections
                    .require_interface(conn_id, InterfaceKind::Tracing)
                    .is_err()
                {
                    log::debug!(
                        "[virtual] dropping trace for device {:#x}: tracing not open",
                        device_id
                    );
                    continue;
                }

                inner.base.notify(EventEnvelope {
                    adapter_index: 0,
                    conn_string: format!("{:x}", device_id),
                    conn_id: Some(conn_id),
                    device_id: Some(device_id),
                    event: AdapterEvent::Trace(Arc::from(data.into_boxed_slice())),
                });
            }
            ChannelMessage::Broadcast { device_id, report } => {
                inner.base.notify(EventEnvelope {
                    adapter_index: 0,
                    conn_string: format!("{:x}", device_id),
                    conn_id: None,
                    device_id: Some(device_id),
                    event: AdapterEvent::Broadcast(Arc::new(report)),
                });
            }
            ChannelMessage::AsyncFinish { device_id, result } => {
                let Some((_, pending)) = inner.pending_async.remove(&device_id) else {
                    log::debug!(
                        "[virtual] async finish for device {:#x} with nothing pending",
                        device_id
                    );
                    continue;
                };

                let packed = result.and_then(|values| {
                    pending.resp.pack(&values).map_err(|e| {
                        Error::RpcInvalidResponse(format!("async reply mismatch: {}", e))
                    })
                });
                if pending.tx.send(packed).is_err() {
                    // Caller gave up (deadline or cancel); the late reply is
                    // discarded per the adapter contract.
                    log::debug!(
                        "[virtual] discarding late async reply from device {:#x}",
                        device_id
                    );
                }
            }
        }
    }
}

/// Push one report through the per-connection assembler pipeline.
fn deliver_report(inner: &Arc<Inner>, device_id: DeviceId, report: Report) {
    let Some(conn_id) = inner.device_conns.get(&device_id).map(|c| *c) else {
        log::debug!(
            "[virtual] dropping report for device {:#x}: not connected",
            device_id
        );
        return;
    };

    if inner
        .connections
        .require_interface(conn_id, InterfaceKind::Streaming)
        .is_err()
    {
        log::debug!(
            "[virtual] dropping report for device {:#x}: streaming not open",
            device_id
        );
        return;
    }

    let Some(assembler) = inner.assemblers.get(&conn_id) else {
        return;
    };

    // Virtual devices hand over complete reports; each is one start fragment
    // through the same pipeline physical transports feed.
    let image = report.encode();
    let assembled = assembler.value().lock().push(Fragment::Start(&image));
    drop(assembler);

    match assembled {
        Ok(reports) => {
            for report in reports {
                inner.base.notify(EventEnvelope {
                    adapter_index: 0,
                    conn_string: format!("{:x}", device_id),
                    conn_id: Some(conn_id),
                    device_id: Some(device_id),
                    event: AdapterEvent::Report(Arc::new(report)),
                });
            }
        }
        Err(err) => {
            // Fatal for the interface: close it and leave an audit trail.
            log::warn!(
                "[virtual] audit: report pipeline error on device {:#x} conn {}: {} (kind={})",
                device_id,
                conn_id,
                err,
                err.kind()
            );
            let _ = inner
                .connections
                .close_interface(conn_id, InterfaceKind::Streaming);
            inner.assemblers.remove(&conn_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::base::MonitorFilter;
    use crate::report::IndividualReport;
    use crate::types::{Reading, RPC_TILE_STATUS};

    async fn started_adapter_with_simple_device(device_id: DeviceId) -> VirtualAdapter {
        let adapter = VirtualAdapter::new(16);
        adapter
            .add_device(VirtualDevice::simple(device_id, "Simple").unwrap())
            .unwrap();
        adapter.start().await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn connect_and_status_rpc() {
        let adapter = started_adapter_with_simple_device(1).await;
        adapter.connect(10, "1").await.unwrap();

        let response = adapter
            .send_rpc(10, 8, RPC_TILE_STATUS, &[], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            response.payload,
            vec![0xff, 0xff, 0x53, 0x69, 0x6d, 0x70, 0x6c, 0x65, 0x01, 0x00, 0x00, 0x03]
        );
    }

    #[tokio::test]
    async fn second_connection_to_same_device_rejected() {
        let adapter = started_adapter_with_simple_device(1).await;
        adapter.connect(10, "1").await.unwrap();

        let err = adapter.connect(11, "1").await.unwrap_err();
        assert_eq!(err, Error::DeviceInUse(1));

        adapter.disconnect(10).await.unwrap();
        adapter.connect(11, "1").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_device_not_found() {
        let adapter = started_adapter_with_simple_device(1).await;
        let err = adapter.connect(10, "99").await.unwrap_err();
        assert_eq!(err.kind(), "device_not_found");
    }

    #[tokio::test]
    async fn queued_reports_flow_through_pipeline_on_open() {
        let adapter = VirtualAdapter::new(16);
        let mut device = VirtualDevice::simple(5, "Simple").unwrap();
        device.queue_report(Report::Individual(IndividualReport::new(
            Reading::new(0x1000, 1, 10, 42),
            0,
        )));
        adapter.add_device(device).unwrap();
        adapter.start().await.unwrap();

        let mut monitor = adapter.base().register_monitor(MonitorFilter::device(5));
        adapter.connect(10, "5").await.unwrap();
        adapter
            .open_interface(10, InterfaceKind::Streaming)
            .await
            .unwrap();

        // Connection event, then the flushed report.
        loop {
            let envelope = monitor.rx.recv().await.expect("event");
            if let AdapterEvent::Report(report) = envelope.event {
                match report.as_ref() {
                    Report::Individual(individual) => {
                        assert_eq!(individual.reading.value, 42);
                        break;
                    }
                    other => panic!("unexpected report {:?}", other),
                }
            }
        }
    }

    #[tokio::test]
    async fn trace_requires_open_interface() {
        let adapter = started_adapter_with_simple_device(3).await;
        let mut monitor = adapter.base().register_monitor(MonitorFilter::device(3));
        adapter.connect(10, "3").await.unwrap();

        let channel = adapter.channel(3).unwrap();
        channel.push_trace(vec![1, 2, 3]);
        // Let the pump observe the closed interface before it opens.
        tokio::time::sleep(Duration::from_millis(20)).await;

        adapter
            .open_interface(10, InterfaceKind::Tracing)
            .await
            .unwrap();
        channel.push_trace(vec![4, 5, 6]);

        // Only the post-open trace arrives.
        loop {
            let envelope = monitor.rx.recv().await.expect("event");
            if let AdapterEvent::Trace(data) = envelope.event {
                assert_eq!(&data[..], &[4, 5, 6]);
                break;
            }
        }
    }

    #[tokio::test]
    async fn script_progress_is_monotonic() {
        let adapter = started_adapter_with_simple_device(2).await;
        let mut monitor = adapter.base().register_monitor(MonitorFilter::device(2));
        adapter.connect(10, "2").await.unwrap();
        adapter
            .open_interface(10, InterfaceKind::Script)
            .await
            .unwrap();

        let script = vec![0xAB; SCRIPT_CHUNK * 2 + 100];
        adapter.send_script(10, &script).await.unwrap();

        let mut last = 0;
        let mut final_total = 0;
        while let Ok(envelope) = monitor.rx.try_recv() {
            if let AdapterEvent::Progress {
                finished, total, ..
            } = envelope.event
            {
                assert!(finished >= last);
                last = finished;
                final_total = total;
            }
        }
        assert_eq!(last, script.len() as u32);
        assert_eq!(final_total, script.len() as u32);
    }

    #[tokio::test]
    async fn rpc_without_connection_fails() {
        let adapter = started_adapter_with_simple_device(1).await;
        let err = adapter
            .send_rpc(99, 8, RPC_TILE_STATUS, &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "bad_argument");
    }

    #[tokio::test]
    async fn disconnect_emits_expected_event() {
        let adapter = started_adapter_with_simple_device(1).await;
        let mut monitor = adapter.base().register_monitor(MonitorFilter::device(1));
        adapter.connect(10, "1").await.unwrap();
        adapter.disconnect(10).await.unwrap();

        loop {
            let envelope = monitor.rx.recv().await.expect("event");
            if let AdapterEvent::Disconnection { expected, .. } = envelope.event {
                assert!(expected);
                break;
            }
        }
    }
}
