// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Aggregation of multiple device adapters behind one adapter contract.
//!
//! Devices visible through several adapters appear once in merged scans,
//! annotated with every route ordered by signal strength.  Connects route to
//! the best-signal adapter with free capacity and fall back on transport
//! failure; every adapter event is re-tagged with its adapter index and
//! fanned into the aggregator's own monitor registry.
//!
//! Connection strings accepted by [`AggregatingAdapter::connect`]:
//!
//! - `device/<hex-uuid>` - route automatically to the best adapter
//! - `adapter/<index>/<local>` - pin to one adapter, bypassing routing

use crate::adapter::base::{AdapterBase, MonitorFilter, MonitorHandle};
use crate::adapter::{retry, AdapterCapabilities, AdapterEvent, DeviceAdapter};
use crate::config::Tuning;
use crate::errors::{Error, Result};
use crate::scan::{self, MergedScanResult, RouteCandidate, ScanTable};
use crate::types::{ConnectionHandle, DeviceId, InterfaceKind, RpcResponse};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct Route {
    adapter_index: usize,
    device_id: DeviceId,
}

struct AggInner {
    base: AdapterBase,
    scan_table: ScanTable,
    routes: DashMap<ConnectionHandle, Route>,
    next_conn: AtomicU32,
    max_connect_retries: usize,
    reconnect_attempts: usize,
    started: AtomicBool,
    cancel: CancellationToken,
}

/// One logical adapter backed by an ordered list of real adapters.
pub struct AggregatingAdapter {
    inner: Arc<AggInner>,
    adapters: Vec<Arc<dyn DeviceAdapter>>,
    /// Child monitors registered at build time, consumed by `start`.
    pending_monitors: Mutex<Vec<(usize, MonitorHandle)>>,
}

impl AggregatingAdapter {
    #[must_use]
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            inner: Arc::new(AggInner {
                base: AdapterBase::new("aggregator", tuning.monitor_queue_depth),
                scan_table: ScanTable::new(tuning.scan_expiration()),
                routes: DashMap::new(),
                next_conn: AtomicU32::new(1),
                max_connect_retries: tuning.max_connect_retries.max(1),
                reconnect_attempts: tuning.reconnect_attempts,
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
            adapters: Vec::new(),
            pending_monitors: Mutex::new(Vec::new()),
        }
    }

    /// Build an aggregator over the given adapters.
    pub fn with_adapters(
        tuning: &Tuning,
        adapters: impl IntoIterator<Item = Arc<dyn DeviceAdapter>>,
    ) -> Result<Self> {
        let mut aggregator = Self::new(tuning);
        for adapter in adapters {
            aggregator.add_adapter(adapter)?;
        }
        Ok(aggregator)
    }

    /// Add an adapter.  Adapters cannot be added after `start`.
    pub fn add_adapter(&mut self, adapter: Arc<dyn DeviceAdapter>) -> Result<()> {
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(Error::BadArgument(
                "adapters cannot be added after start".into(),
            ));
        }

        let monitor = adapter.base().register_monitor(MonitorFilter::all());
        let index = self.adapters.len();
        self.adapters.push(adapter);

        self.pending_monitors.lock().push((index, monitor));
        log::debug!("[aggregator] adapter {} registered", index);
        Ok(())
    }

    /// Allocate a connection handle, unique across the aggregate.
    #[must_use]
    pub fn unique_conn_id(&self) -> ConnectionHandle {
        self.inner.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Merged view of all currently visible devices.
    #[must_use]
    pub fn merged_scans(&self) -> Vec<MergedScanResult> {
        self.inner.scan_table.merged(Instant::now())
    }

    /// Merged view of one device.
    #[must_use]
    pub fn scan_for(&self, device_id: DeviceId) -> Option<MergedScanResult> {
        self.inner.scan_table.get(device_id, Instant::now())
    }

    /// Device a connection handle routes to.
    pub fn device_of(&self, conn_id: ConnectionHandle) -> Result<DeviceId> {
        Ok(self.route(conn_id)?.1)
    }

    fn route(&self, conn_id: ConnectionHandle) -> Result<(usize, DeviceId)> {
        self.inner
            .routes
            .get(&conn_id)
            .map(|r| (r.adapter_index, r.device_id))
            .ok_or_else(|| Error::BadArgument(format!("unknown connection handle {}", conn_id)))
    }

    fn child(&self, index: usize) -> Result<&Arc<dyn DeviceAdapter>> {
        self.adapters
            .get(index)
            .ok_or_else(|| Error::BadArgument(format!("no adapter at index {}", index)))
    }

    /// Try candidates best-signal-first with per-candidate early-disconnect
    /// retries; fall back across candidates up to the configured budget.
    async fn connect_routed(
        &self,
        conn_id: ConnectionHandle,
        device_id: DeviceId,
    ) -> Result<(usize, String)> {
        let mut candidates = self
            .inner
            .scan_table
            .route_candidates(device_id, Instant::now());

        if candidates.is_empty() {
            // Probe-before-connect: give every adapter one fresh sweep and a
            // beat for the results to land before declaring the device
            // unreachable.
            log::debug!(
                "[aggregator] device {:#x} not in scan table, probing",
                device_id
            );
            self.probe().await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            candidates = self
                .inner
                .scan_table
                .route_candidates(device_id, Instant::now());
        }

        if candidates.is_empty() {
            return Err(Error::DeviceNotFound(scan::device_connection_string(
                device_id,
            )));
        }

        let mut last_error = None;
        let mut fallbacks = 0;

        for RouteCandidate {
            adapter_index,
            signal_strength,
            connection_string,
        } in candidates
        {
            if fallbacks >= self.inner.max_connect_retries {
                log::warn!(
                    "[aggregator] connect fallback budget ({}) exhausted for device {:#x}",
                    self.inner.max_connect_retries,
                    device_id
                );
                break;
            }

            let adapter = self.child(adapter_index)?;
            if !adapter.can_connect() {
                log::debug!(
                    "[aggregator] adapter {} has no free capacity for device {:#x}",
                    adapter_index,
                    device_id
                );
                continue;
            }

            fallbacks += 1;
            log::info!(
                "[aggregator] connect attempt {}: device {:#x} via adapter {} (signal {})",
                fallbacks,
                device_id,
                adapter_index,
                signal_strength
            );

            let local = connection_string.clone();
            let result = retry::with_early_disconnect_retry(
                || adapter.connect(conn_id, &local),
                retry::EARLY_DISCONNECT_ATTEMPTS,
            )
            .await;

            match result {
                Ok(()) => return Ok((adapter_index, connection_string)),
                Err(Error::DeviceInUse(id)) => return Err(Error::DeviceInUse(id)),
                Err(err) if err.is_transient() || err.kind() == "device_not_found" => {
                    log::warn!(
                        "[aggregator] adapter {} failed for device {:#x}: {}",
                        adapter_index,
                        device_id,
                        err
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::DeviceNotFound(scan::device_connection_string(device_id))))
    }
}

#[async_trait]
impl DeviceAdapter for AggregatingAdapter {
    fn name(&self) -> &str {
        "aggregator"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        // Union of the children: a capability exists if any route has it.
        let mut caps = AdapterCapabilities {
            supports_rpc: false,
            max_concurrent_connections: 0,
            ..AdapterCapabilities::default()
        };

        for adapter in &self.adapters {
            let child = adapter.capabilities();
            caps.supports_broadcast |= child.supports_broadcast;
            caps.supports_streaming |= child.supports_streaming;
            caps.supports_tracing |= child.supports_tracing;
            caps.supports_debug |= child.supports_debug;
            caps.supports_script |= child.supports_script;
            caps.supports_rpc |= child.supports_rpc;
            caps.requires_probe |= child.requires_probe;
            caps.max_concurrent_connections = caps
                .max_concurrent_connections
                .saturating_add(child.max_concurrent_connections);
        }

        caps
    }

    fn base(&self) -> &AdapterBase {
        &self.inner.base
    }

    fn can_connect(&self) -> bool {
        self.adapters.iter().any(|a| a.can_connect())
    }

    async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Start children in order; on failure stop the ones already running.
        let mut running = 0;
        for adapter in &self.adapters {
            match adapter.start().await {
                Ok(()) => running += 1,
                Err(err) => {
                    for started in &self.adapters[..running] {
                        let _ = started.stop().await;
                    }
                    self.inner.started.store(false, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }

        for (index, monitor) in self.pending_monitors.lock().drain(..) {
            tokio::spawn(forward_events(
                self.inner.clone(),
                index,
                monitor,
                self.inner.cancel.clone(),
            ));
        }

        tokio::spawn(expiry_sweep(self.inner.clone(), self.inner.cancel.clone()));

        log::info!(
            "[aggregator] started with {} adapters",
            self.adapters.len()
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.inner.cancel.cancel();
        for adapter in &self.adapters {
            adapter.stop().await?;
        }
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        for adapter in &self.adapters {
            adapter.probe().await?;
        }
        Ok(())
    }

    async fn connect(&self, conn_id: ConnectionHandle, conn_string: &str) -> Result<()> {
        let (adapter_index, device_id) = if let Some(device_id) =
            scan::parse_device_connection_string(conn_string)
        {
            let (index, _local) = self.connect_routed(conn_id, device_id).await?;
            (index, device_id)
        } else if let Some(rest) = conn_string.strip_prefix("adapter/") {
            let (index_str, local) = rest.split_once('/').ok_or_else(|| {
                Error::BadArgument(format!("bad pinned connection string {:?}", conn_string))
            })?;
            let index: usize = index_str.parse().map_err(|_| {
                Error::BadArgument(format!("bad adapter index in {:?}", conn_string))
            })?;

            let adapter = self.child(index)?;
            if !adapter.can_connect() {
                return Err(Error::TransportUnavailable(format!(
                    "adapter {} cannot accept another connection",
                    index
                )));
            }

            retry::with_early_disconnect_retry(
                || adapter.connect(conn_id, local),
                retry::EARLY_DISCONNECT_ATTEMPTS,
            )
            .await?;

            // Pinned strings skip the scan table, so learn the device id from
            // the adapter's own view of the local string when possible.
            let device_id = DeviceId::from_str_radix(local, 16).unwrap_or_default();
            (index, device_id)
        } else {
            return Err(Error::BadArgument(format!(
                "connection string {:?} must be device/<uuid> or adapter/<index>/<local>",
                conn_string
            )));
        };

        self.inner.routes.insert(
            conn_id,
            Route {
                adapter_index,
                device_id,
            },
        );
        Ok(())
    }

    async fn disconnect(&self, conn_id: ConnectionHandle) -> Result<()> {
        let Some((_, route)) = self.inner.routes.remove(&conn_id) else {
            return Ok(()); // idempotent
        };
        self.child(route.adapter_index)?.disconnect(conn_id).await
    }

    async fn open_interface(&self, conn_id: ConnectionHandle, iface: InterfaceKind) -> Result<()> {
        let (index, _) = self.route(conn_id)?;
        self.child(index)?.open_interface(conn_id, iface).await
    }

    async fn close_interface(&self, conn_id: ConnectionHandle, iface: InterfaceKind) -> Result<()> {
        let (index, _) = self.route(conn_id)?;
        self.child(index)?.close_interface(conn_id, iface).await
    }

    async fn send_rpc(
        &self,
        conn_id: ConnectionHandle,
        address: u8,
        rpc_id: u16,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<RpcResponse> {
        let (mut index, device_id) = self.route(conn_id)?;
        let mut reconnects = 0;

        // A transport-level drop that interrupts an in-flight RPC is retried
        // through a silent reconnect, bounded by the configured budget.  A
        // requested disconnect tears the route down before the error is
        // observed, so it always surfaces as Disconnected.
        loop {
            match self
                .child(index)?
                .send_rpc(conn_id, address, rpc_id, payload, timeout)
                .await
            {
                Err(Error::Disconnected(reason))
                    if reconnects < self.inner.reconnect_attempts
                        && device_id != 0
                        && self.inner.routes.contains_key(&conn_id) =>
                {
                    reconnects += 1;
                    log::info!(
                        "[aggregator] rpc on device {:#x} interrupted ({}), silent reconnect {}/{}",
                        device_id,
                        reason,
                        reconnects,
                        self.inner.reconnect_attempts
                    );

                    self.inner.routes.remove(&conn_id);
                    self.connect(conn_id, &scan::device_connection_string(device_id))
                        .await?;
                    index = self.route(conn_id)?.0;
                }
                other => return other,
            }
        }
    }

    async fn send_script(&self, conn_id: ConnectionHandle, script: &[u8]) -> Result<()> {
        let (index, _) = self.route(conn_id)?;
        self.child(index)?.send_script(conn_id, script).await
    }

    async fn send_highspeed(&self, conn_id: ConnectionHandle, data: &[u8]) -> Result<()> {
        let (index, _) = self.route(conn_id)?;
        self.child(index)?.send_highspeed(conn_id, data).await
    }
}

/// Re-tag and forward one child adapter's events into the aggregate registry.
async fn forward_events(
    inner: Arc<AggInner>,
    adapter_index: usize,
    mut monitor: MonitorHandle,
    cancel: CancellationToken,
) {
    loop {
        let mut envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            event = monitor.rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        envelope.adapter_index = adapter_index;

        match &mut envelope.event {
            AdapterEvent::DeviceSeen(sighting) => {
                sighting.adapter_index = adapter_index;
                inner.scan_table.record(sighting.clone());
                // Scans travel upward under the universal connection string.
                envelope.conn_string = scan::device_connection_string(sighting.device_id);
            }
            AdapterEvent::Disconnection { .. } => {
                if let Some(conn_id) = envelope.conn_id {
                    inner.routes.remove(&conn_id);
                }
            }
            _ => {}
        }

        inner.base.notify(envelope);
    }
}

/// Periodically drop expired scan sightings.
async fn expiry_sweep(inner: Arc<AggInner>, cancel: CancellationToken) {
    let period = inner
        .scan_table
        .default_validity()
        .checked_div(4)
        .unwrap_or(Duration::from_secs(1))
        .max(Duration::from_millis(250));

    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let expired = inner.scan_table.expire(Instant::now());
                if expired > 0 {
                    log::info!("[aggregator] expired {} scan entries", expired);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_device::{VirtualAdapter, VirtualDevice};

    async fn aggregator_with_virtual(device_ids: &[DeviceId]) -> AggregatingAdapter {
        let virtual_adapter = VirtualAdapter::new(16);
        for &id in device_ids {
            virtual_adapter
                .add_device(VirtualDevice::simple(id, "Simple").unwrap())
                .unwrap();
        }

        let mut aggregator = AggregatingAdapter::new(&Tuning::default());
        aggregator
            .add_adapter(Arc::new(virtual_adapter) as Arc<dyn DeviceAdapter>)
            .unwrap();
        aggregator.start().await.unwrap();
        // Let the forwarding task drain the startup scan events.
        tokio::time::sleep(Duration::from_millis(20)).await;
        aggregator
    }

    #[tokio::test]
    async fn merged_scans_show_hosted_devices() {
        let aggregator = aggregator_with_virtual(&[1, 2]).await;

        let merged = aggregator.merged_scans();
        let ids: Vec<DeviceId> = merged.iter().map(|m| m.device_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(merged[0].adapters.len(), 1);
        assert_eq!(merged[0].connection_string, "device/1");
    }

    #[tokio::test]
    async fn routed_connect_and_rpc() {
        let aggregator = aggregator_with_virtual(&[5]).await;

        let conn_id = aggregator.unique_conn_id();
        aggregator.connect(conn_id, "device/5").await.unwrap();

        let response = aggregator
            .send_rpc(conn_id, 8, 0x0004, &[], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.payload.len(), 12);

        aggregator.disconnect(conn_id).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_device_is_not_found_after_probe() {
        let aggregator = aggregator_with_virtual(&[1]).await;
        let conn_id = aggregator.unique_conn_id();

        let err = aggregator.connect(conn_id, "device/42").await.unwrap_err();
        assert_eq!(err.kind(), "device_not_found");
    }

    #[tokio::test]
    async fn bad_connection_strings_rejected() {
        let aggregator = aggregator_with_virtual(&[1]).await;
        let conn_id = aggregator.unique_conn_id();

        assert!(aggregator.connect(conn_id, "bogus").await.is_err());
        assert!(aggregator.connect(conn_id, "adapter/nope").await.is_err());
        assert!(aggregator.connect(conn_id, "adapter/9/1").await.is_err());
    }

    #[tokio::test]
    async fn pinned_connect_bypasses_routing() {
        let aggregator = aggregator_with_virtual(&[7]).await;
        let conn_id = aggregator.unique_conn_id();

        aggregator.connect(conn_id, "adapter/0/7").await.unwrap();
        assert_eq!(aggregator.device_of(conn_id).unwrap(), 7);
    }

    #[tokio::test]
    async fn events_are_retagged_with_adapter_index() {
        let virtual_adapter = VirtualAdapter::new(16);
        virtual_adapter
            .add_device(VirtualDevice::simple(3, "Simple").unwrap())
            .unwrap();

        let mut aggregator = AggregatingAdapter::new(&Tuning::default());
        aggregator
            .add_adapter(Arc::new(virtual_adapter) as Arc<dyn DeviceAdapter>)
            .unwrap();

        let mut monitor = aggregator.base().register_monitor(MonitorFilter::all());
        aggregator.start().await.unwrap();

        let envelope = monitor.rx.recv().await.expect("scan event");
        assert_eq!(envelope.adapter_index, 0);
        assert_eq!(envelope.conn_string, "device/3");
    }
}
