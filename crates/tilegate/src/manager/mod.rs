// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session layer: multi-client, multi-device arbitration.
//!
//! The [`DeviceManager`] owns the aggregated adapter and arbitrates it
//! between external client sessions.  It enforces the process-wide invariant
//! of at most one connection per device, verifies and decrypts signed
//! reports before fan-out, routes broadcasts to pattern monitors, and cleans
//! up everything a session owned when it closes.
//!
//! Every public operation is safe for concurrent invocation, accepts a
//! cancellation signal, and never blocks indefinitely.  Locks are acquired
//! manager-first, adapter-second, connection-last, and no callback runs
//! while any of them is held.

mod session;

pub use session::{SessionEvent, SessionHandle};

use crate::adapter::base::MonitorFilter;
use crate::adapter::{AdapterEvent, AggregatingAdapter, DeviceAdapter};
use crate::auth::AuthChain;
use crate::config::Tuning;
use crate::errors::{Error, Result};
use crate::report::dispatch::{SubscriberHandle, SubscriptionFilter};
use crate::report::{Report, ReportDispatcher};
use crate::scan::{self, MergedScanResult};
use crate::types::{DeviceId, InterfaceKind, RpcResponse, SessionId};
use dashmap::DashMap;
use parking_lot::Mutex;
use session::SessionState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What a broadcast monitor wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastPattern {
    All,
    Device(DeviceId),
    /// Matches reports containing a reading whose stream id has every mask
    /// bit set.
    StreamMask(u16),
}

impl BroadcastPattern {
    fn matches(&self, device_id: DeviceId, report: &Report) -> bool {
        match self {
            BroadcastPattern::All => true,
            BroadcastPattern::Device(want) => *want == device_id,
            BroadcastPattern::StreamMask(mask) => match report {
                Report::Individual(individual) => {
                    individual.reading.stream_id & mask == *mask
                }
                Report::SignedList(signed) => signed
                    .readings()
                    .map(|mut readings| readings.any(|r| r.stream_id & mask == *mask))
                    .unwrap_or(false),
            },
        }
    }
}

/// One broadcast delivery.
#[derive(Debug, Clone)]
pub struct BroadcastEvent {
    pub device_id: DeviceId,
    pub report: Arc<Report>,
}

/// Receiving side of a broadcast monitor.
pub struct BroadcastHandle {
    id: u64,
    pub rx: mpsc::Receiver<BroadcastEvent>,
}

impl BroadcastHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct BroadcastEntry {
    pattern: BroadcastPattern,
    tx: mpsc::Sender<BroadcastEvent>,
}

struct MgrInner {
    adapter: Arc<AggregatingAdapter>,
    sessions: DashMap<SessionId, Arc<SessionState>>,
    owners: DashMap<DeviceId, (SessionId, u32)>,
    dispatcher: ReportDispatcher,
    broadcasts: Mutex<HashMap<u64, BroadcastEntry>>,
    next_broadcast: AtomicU64,
    chain: AuthChain,
    tuning: Tuning,
    next_session: AtomicU32,
    cancel: CancellationToken,
}

/// Multi-client, multi-device session arbiter.
pub struct DeviceManager {
    inner: Arc<MgrInner>,
}

impl DeviceManager {
    #[must_use]
    pub fn new(adapter: Arc<AggregatingAdapter>, chain: AuthChain, tuning: Tuning) -> Self {
        Self {
            inner: Arc::new(MgrInner {
                adapter,
                sessions: DashMap::new(),
                owners: DashMap::new(),
                dispatcher: ReportDispatcher::new(tuning.monitor_queue_depth),
                broadcasts: Mutex::new(HashMap::new()),
                next_broadcast: AtomicU64::new(1),
                chain,
                tuning,
                next_session: AtomicU32::new(1),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Start the aggregated adapter and the event pump.
    pub async fn start(&self) -> Result<()> {
        self.inner.adapter.start().await?;

        let monitor = self
            .inner
            .adapter
            .base()
            .register_monitor(MonitorFilter::all());
        tokio::spawn(pump(self.inner.clone(), monitor));
        Ok(())
    }

    /// Close every session and stop the adapter.
    pub async fn shutdown(&self) -> Result<()> {
        let session_ids: Vec<SessionId> =
            self.inner.sessions.iter().map(|s| *s.key()).collect();
        for sid in session_ids {
            let _ = self.session_close(sid).await;
        }

        self.inner.cancel.cancel();
        self.inner.adapter.stop().await
    }

    /// Allocate a new session.
    pub fn session_open(&self) -> SessionHandle {
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let (state, events) = SessionState::new(id, self.inner.tuning.monitor_queue_depth);
        self.inner.sessions.insert(id, Arc::new(state));
        log::info!("[manager] session {} opened", id);
        SessionHandle { id, events }
    }

    /// Close a session: disconnect owned devices, cancel pending calls,
    /// release monitors, and deliver the final event.
    pub async fn session_close(&self, sid: SessionId) -> Result<()> {
        let session = self.session(sid)?;
        if !session.close() {
            return Ok(());
        }

        // Snapshot owned resources, then release locks before touching the
        // adapter (manager -> adapter lock order).
        let connections: Vec<(DeviceId, u32)> =
            session.connections.lock().drain().collect();
        let subscriptions: Vec<u64> = session.subscriptions.lock().drain(..).collect();
        let monitors: Vec<u64> = session.broadcast_monitors.lock().drain(..).collect();
        session.opened.lock().clear();

        for (device_id, conn_id) in connections {
            self.inner.owners.remove(&device_id);
            // Cancels in-flight RPCs with Disconnected via the connection
            // token before the transport link is released.
            if let Err(err) = self.inner.adapter.disconnect(conn_id).await {
                log::warn!(
                    "[manager] session {}: disconnect of device {:#x} failed: {}",
                    sid,
                    device_id,
                    err
                );
            }
        }

        for sub_id in subscriptions {
            self.inner.dispatcher.unsubscribe(sub_id);
        }

        {
            let mut broadcasts = self.inner.broadcasts.lock();
            for monitor_id in monitors {
                broadcasts.remove(&monitor_id);
            }
        }

        session.notify(SessionEvent::Closed);
        self.inner.sessions.remove(&sid);
        log::info!("[manager] session {} closed", sid);
        Ok(())
    }

    /// Probe all adapters and return merged scan results after `timeout`.
    pub async fn scan(
        &self,
        sid: SessionId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<MergedScanResult>> {
        self.session(sid)?;
        self.inner.adapter.probe().await?;

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(timeout) => {}
        }

        Ok(self.inner.adapter.merged_scans())
    }

    /// Connect the session to a device.
    ///
    /// Fails with `DeviceInUse` when any session (including this one)
    /// already holds the device.
    pub async fn connect(
        &self,
        sid: SessionId,
        device_id: DeviceId,
        cancel: &CancellationToken,
    ) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        let session = self.session(sid)?;
        let conn_id = self.inner.adapter.unique_conn_id();

        // Reserve the device before the (slow) transport connect so two
        // racing sessions cannot both win.
        match self.inner.owners.entry(device_id) {
            Entry::Occupied(_) => return Err(Error::DeviceInUse(device_id)),
            Entry::Vacant(slot) => {
                slot.insert((sid, conn_id));
            }
        }

        let device_connection_string = scan::device_connection_string(device_id);
        let connect = self
            .inner
            .adapter
            .connect(conn_id, &device_connection_string);

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = connect => result,
        };

        match result {
            Ok(()) => {
                session.connections.lock().insert(device_id, conn_id);
                Ok(())
            }
            Err(err) => {
                self.inner.owners.remove(&device_id);
                Err(err)
            }
        }
    }

    /// Disconnect the session from a device it owns.
    pub async fn disconnect(&self, sid: SessionId, device_id: DeviceId) -> Result<()> {
        let session = self.session(sid)?;
        let conn_id = session
            .connection(device_id)
            .ok_or(Error::NotConnected(device_id))?;

        self.inner.adapter.disconnect(conn_id).await?;
        self.release_device(&session, device_id);
        Ok(())
    }

    /// Send an RPC on the session's connection to `device_id`.
    pub async fn send_rpc(
        &self,
        sid: SessionId,
        device_id: DeviceId,
        address: u8,
        rpc_id: u16,
        payload: &[u8],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RpcResponse> {
        let session = self.session(sid)?;
        let conn_id = session
            .connection(device_id)
            .ok_or(Error::NotConnected(device_id))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self
                .inner
                .adapter
                .send_rpc(conn_id, address, rpc_id, payload, timeout) => result,
        }
    }

    /// Enroll the session as a report/trace subscriber for a device.
    ///
    /// Opens the matching interface on first use.
    pub async fn subscribe(
        &self,
        sid: SessionId,
        device_id: DeviceId,
        iface: InterfaceKind,
    ) -> Result<SubscriberHandle> {
        if !matches!(iface, InterfaceKind::Streaming | InterfaceKind::Tracing) {
            return Err(Error::BadArgument(format!(
                "cannot subscribe to the {} interface",
                iface
            )));
        }

        let session = self.session(sid)?;
        let conn_id = session
            .connection(device_id)
            .ok_or(Error::NotConnected(device_id))?;

        let newly_opened = session.opened.lock().insert((device_id, iface));
        if newly_opened {
            if let Err(err) = self.inner.adapter.open_interface(conn_id, iface).await {
                session.opened.lock().remove(&(device_id, iface));
                return Err(err);
            }
        }

        let handle = self
            .inner
            .dispatcher
            .subscribe(SubscriptionFilter::device(device_id));
        session.subscriptions.lock().push(handle.id());
        Ok(handle)
    }

    /// Register a broadcast monitor for the session.
    pub fn broadcast_monitor(
        &self,
        sid: SessionId,
        pattern: BroadcastPattern,
    ) -> Result<BroadcastHandle> {
        let session = self.session(sid)?;

        let (tx, rx) = mpsc::channel(self.inner.tuning.monitor_queue_depth.max(1));
        let id = self.inner.next_broadcast.fetch_add(1, Ordering::Relaxed);
        self.inner
            .broadcasts
            .lock()
            .insert(id, BroadcastEntry { pattern, tx });
        session.broadcast_monitors.lock().push(id);

        Ok(BroadcastHandle { id, rx })
    }

    /// Devices currently connected, with their owning sessions.
    #[must_use]
    pub fn connected_devices(&self) -> Vec<(DeviceId, SessionId)> {
        self.inner
            .owners
            .iter()
            .map(|entry| (*entry.key(), entry.value().0))
            .collect()
    }

    fn session(&self, sid: SessionId) -> Result<Arc<SessionState>> {
        self.inner
            .sessions
            .get(&sid)
            .filter(|s| !s.is_closed())
            .map(|s| s.value().clone())
            .ok_or(Error::SessionClosed(sid))
    }

    fn release_device(&self, session: &SessionState, device_id: DeviceId) {
        self.inner.owners.remove(&device_id);
        session.connections.lock().remove(&device_id);
        session
            .opened
            .lock()
            .retain(|(device, _)| *device != device_id);
    }
}

/// Event pump: verifies reports, fans out to subscribers and broadcast
/// monitors, and tracks disconnects.  A single task processes events in
/// order, which preserves per-device ordering end to end.
async fn pump(
    inner: Arc<MgrInner>,
    mut monitor: crate::adapter::base::MonitorHandle,
) {
    loop {
        let envelope = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            event = monitor.rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let device_id = envelope.device_id;

        match envelope.event {
            AdapterEvent::Report(report) => {
                let Some(device_id) = device_id else { continue };
                match prepare_report(&inner, &report) {
                    Ok(prepared) => {
                        inner.dispatcher.publish_report(device_id, prepared);
                    }
                    Err(err) => {
                        log::warn!(
                            "[manager] audit: dropping report from device {:#x}: {} (kind={})",
                            device_id,
                            err,
                            err.kind()
                        );
                        // Fatal report errors also close the offending
                        // interface; key unavailability does not indict the
                        // device.
                        if err.kind() != "key_unavailable" {
                            if let Some(conn_id) = envelope.conn_id {
                                let _ = inner
                                    .adapter
                                    .close_interface(conn_id, InterfaceKind::Streaming)
                                    .await;
                            }
                            // Let the owning session reopen via subscribe.
                            if let Some(owner) = inner.owners.get(&device_id) {
                                if let Some(session) = inner.sessions.get(&owner.0) {
                                    session
                                        .opened
                                        .lock()
                                        .remove(&(device_id, InterfaceKind::Streaming));
                                }
                            }
                        }
                    }
                }
            }
            AdapterEvent::Trace(data) => {
                let Some(device_id) = device_id else { continue };
                inner.dispatcher.publish_trace(device_id, data);
            }
            AdapterEvent::Broadcast(report) => {
                let Some(device_id) = device_id else { continue };
                deliver_broadcast(&inner, device_id, report);
            }
            AdapterEvent::Disconnection { reason, expected } => {
                let Some(device_id) = device_id else { continue };
                if let Some((_, (sid, _conn))) = inner.owners.remove(&device_id) {
                    if let Some(session) = inner.sessions.get(&sid) {
                        session.connections.lock().remove(&device_id);
                        session
                            .opened
                            .lock()
                            .retain(|(device, _)| *device != device_id);
                        session.notify(SessionEvent::DeviceDisconnected {
                            device_id,
                            reason,
                            expected,
                        });
                    }
                }
            }
            // Scan results live in the aggregator's table; connection and
            // progress events only matter to adapter-level monitors.
            AdapterEvent::DeviceSeen(_)
            | AdapterEvent::Connection
            | AdapterEvent::Progress { .. } => {}
        }
    }
}

/// Verify (and decrypt) a report before fan-out.
fn prepare_report(inner: &MgrInner, report: &Report) -> Result<Arc<Report>> {
    match report {
        Report::Individual(_) => Ok(Arc::new(report.clone())),
        Report::SignedList(signed) => {
            let mut verified = signed.clone();
            verified.verify(&inner.chain)?;
            verified.decrypt(&inner.chain)?;
            Ok(Arc::new(Report::SignedList(verified)))
        }
    }
}

fn deliver_broadcast(inner: &MgrInner, device_id: DeviceId, report: Arc<Report>) {
    let broadcasts = inner.broadcasts.lock();
    for (id, entry) in broadcasts.iter() {
        if !entry.pattern.matches(device_id, &report) {
            continue;
        }

        let event = BroadcastEvent {
            device_id,
            report: report.clone(),
        };
        if entry.tx.try_send(event).is_err() {
            log::debug!("[manager] broadcast monitor {} queue full or gone", id);
        }
    }
}
