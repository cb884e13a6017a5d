// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection interface state machine.
//!
//! ```text
//! states:   NEW -> CONNECTED -> {rpc?, stream?, trace?, script?, debug?} -> DISCONNECTED
//! ```
//!
//! - `connect` moves NEW -> CONNECTED; failure frees the handle.
//! - Interfaces open independently and require CONNECTED.  `script` and
//!   `debug` are mutually exclusive with `streaming` and `tracing`.
//! - An asynchronous disconnect jumps straight to DISCONNECTED, cancels any
//!   in-flight RPC with `Disconnected`, and closes every interface.
//!
//! The table is shared between the adapter's command methods and its event
//! loop; entries carry a cancellation token that in-flight operations watch.

use crate::adapter::AdapterCapabilities;
use crate::errors::{Error, Result};
use crate::types::{ConnectionHandle, DeviceId, InterfaceKind, InterfaceSet};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connected,
    Disconnected,
}

/// Everything tracked for one connection handle.
pub struct ConnectionRecord {
    pub device_id: DeviceId,
    pub conn_string: String,
    pub state: ConnectionState,
    pub interfaces: InterfaceSet,
    /// Cancelled when the connection dies; in-flight RPCs watch it.
    pub cancel: CancellationToken,
    /// Serializes RPCs on this connection in request order.
    pub rpc_lock: Arc<Mutex<()>>,
}

/// Snapshot handed to callers when a connection transitions to DISCONNECTED.
#[derive(Debug, Clone)]
pub struct DisconnectInfo {
    pub device_id: DeviceId,
    pub conn_string: String,
    /// Interfaces that were open at the moment of disconnect.
    pub open_interfaces: InterfaceSet,
}

/// Concurrent table of connection records, keyed by handle.
#[derive(Default)]
pub struct ConnectionTable {
    records: DashMap<ConnectionHandle, ConnectionRecord>,
}

impl ConnectionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a handle in the NEW state before attempting the transport
    /// connect.
    pub fn setup(
        &self,
        conn_id: ConnectionHandle,
        device_id: DeviceId,
        conn_string: impl Into<String>,
    ) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.records.entry(conn_id) {
            Entry::Occupied(_) => Err(Error::BadArgument(format!(
                "connection handle {} already in use",
                conn_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(ConnectionRecord {
                    device_id,
                    conn_string: conn_string.into(),
                    state: ConnectionState::New,
                    interfaces: InterfaceSet::empty(),
                    cancel: CancellationToken::new(),
                    rpc_lock: Arc::new(Mutex::new(())),
                });
                Ok(())
            }
        }
    }

    /// NEW -> CONNECTED after the transport connect succeeded.
    pub fn mark_connected(&self, conn_id: ConnectionHandle) -> Result<()> {
        let mut record = self.get_mut(conn_id)?;
        record.state = ConnectionState::Connected;
        Ok(())
    }

    /// Free a handle whose connect failed, returning it to the pool.
    pub fn teardown(&self, conn_id: ConnectionHandle) {
        self.records.remove(&conn_id);
    }

    /// Transition to DISCONNECTED: cancel in-flight work, close interfaces.
    ///
    /// Idempotent; returns `None` if the handle is unknown or already
    /// disconnected.
    pub fn mark_disconnected(&self, conn_id: ConnectionHandle) -> Option<DisconnectInfo> {
        let mut record = self.records.get_mut(&conn_id)?;
        if record.state == ConnectionState::Disconnected {
            return None;
        }

        let info = DisconnectInfo {
            device_id: record.device_id,
            conn_string: record.conn_string.clone(),
            open_interfaces: record.interfaces,
        };

        record.state = ConnectionState::Disconnected;
        record.interfaces.clear();
        record.cancel.cancel();
        Some(info)
    }

    /// Open an interface, enforcing state and exclusivity rules.
    pub fn open_interface(
        &self,
        conn_id: ConnectionHandle,
        iface: InterfaceKind,
        caps: &AdapterCapabilities,
    ) -> Result<()> {
        if !caps.supports_interface(iface) {
            return Err(Error::BadArgument(format!(
                "adapter does not support the {} interface",
                iface
            )));
        }

        let mut record = self.get_mut(conn_id)?;
        if record.state != ConnectionState::Connected {
            return Err(Error::NotConnected(record.device_id));
        }

        if let Some(conflict) = exclusivity_conflict(iface, record.interfaces) {
            return Err(Error::InterfaceConflict {
                requested: iface.name(),
                open: conflict.name(),
            });
        }

        record.interfaces.insert(iface);
        Ok(())
    }

    /// Close an interface.  Closing one that is not open is a no-op.
    pub fn close_interface(&self, conn_id: ConnectionHandle, iface: InterfaceKind) -> Result<()> {
        let mut record = self.get_mut(conn_id)?;
        record.interfaces.remove(iface);
        Ok(())
    }

    /// Fail unless the connection is CONNECTED with `iface` open.
    pub fn require_interface(&self, conn_id: ConnectionHandle, iface: InterfaceKind) -> Result<()> {
        let record = self.get(conn_id)?;
        match record.state {
            ConnectionState::Connected if record.interfaces.contains(iface) => Ok(()),
            ConnectionState::Connected => Err(Error::InterfaceNotOpen(iface.name())),
            _ => Err(Error::NotConnected(record.device_id)),
        }
    }

    /// Device a handle is bound to.
    pub fn device_of(&self, conn_id: ConnectionHandle) -> Result<DeviceId> {
        Ok(self.get(conn_id)?.device_id)
    }

    /// Cancellation token watched by in-flight operations on this handle.
    pub fn cancel_token(&self, conn_id: ConnectionHandle) -> Result<CancellationToken> {
        Ok(self.get(conn_id)?.cancel.clone())
    }

    /// Per-connection RPC serialization lock.
    pub fn rpc_lock(&self, conn_id: ConnectionHandle) -> Result<Arc<Mutex<()>>> {
        Ok(self.get(conn_id)?.rpc_lock.clone())
    }

    #[must_use]
    pub fn state(&self, conn_id: ConnectionHandle) -> Option<ConnectionState> {
        self.records.get(&conn_id).map(|r| r.state)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Handles currently in the CONNECTED state.
    #[must_use]
    pub fn connected_handles(&self) -> Vec<ConnectionHandle> {
        self.records
            .iter()
            .filter(|r| r.state == ConnectionState::Connected)
            .map(|r| *r.key())
            .collect()
    }

    fn get(
        &self,
        conn_id: ConnectionHandle,
    ) -> Result<dashmap::mapref::one::Ref<'_, ConnectionHandle, ConnectionRecord>> {
        self.records
            .get(&conn_id)
            .ok_or_else(|| Error::BadArgument(format!("unknown connection handle {}", conn_id)))
    }

    fn get_mut(
        &self,
        conn_id: ConnectionHandle,
    ) -> Result<dashmap::mapref::one::RefMut<'_, ConnectionHandle, ConnectionRecord>> {
        self.records
            .get_mut(&conn_id)
            .ok_or_else(|| Error::BadArgument(format!("unknown connection handle {}", conn_id)))
    }
}

/// `script`/`debug` cannot share a connection with `streaming`/`tracing`.
fn exclusivity_conflict(requested: InterfaceKind, open: InterfaceSet) -> Option<InterfaceKind> {
    let group_a = [InterfaceKind::Script, InterfaceKind::Debug];
    let group_b = [InterfaceKind::Streaming, InterfaceKind::Tracing];

    let conflicts: &[InterfaceKind] = if group_a.contains(&requested) {
        &group_b
    } else if group_b.contains(&requested) {
        &group_a
    } else {
        return None;
    };

    conflicts.iter().copied().find(|&iface| open.contains(iface))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_all() -> AdapterCapabilities {
        AdapterCapabilities {
            supports_broadcast: true,
            supports_streaming: true,
            supports_tracing: true,
            supports_debug: true,
            supports_script: true,
            supports_rpc: true,
            requires_probe: false,
            max_concurrent_connections: 8,
        }
    }

    fn connected_table() -> ConnectionTable {
        let table = ConnectionTable::new();
        table.setup(1, 0x10, "device/10").unwrap();
        table.mark_connected(1).unwrap();
        table
    }

    #[test]
    fn connect_lifecycle() {
        let table = ConnectionTable::new();
        table.setup(1, 0x10, "device/10").unwrap();
        assert_eq!(table.state(1), Some(ConnectionState::New));

        table.mark_connected(1).unwrap();
        assert_eq!(table.state(1), Some(ConnectionState::Connected));

        let info = table.mark_disconnected(1).unwrap();
        assert_eq!(info.device_id, 0x10);
        assert_eq!(table.state(1), Some(ConnectionState::Disconnected));

        // Disconnect is idempotent.
        assert!(table.mark_disconnected(1).is_none());
    }

    #[test]
    fn duplicate_handle_rejected() {
        let table = ConnectionTable::new();
        table.setup(1, 0x10, "a").unwrap();
        assert!(table.setup(1, 0x11, "b").is_err());
    }

    #[test]
    fn failed_connect_frees_handle() {
        let table = ConnectionTable::new();
        table.setup(1, 0x10, "a").unwrap();
        table.teardown(1);
        assert!(table.setup(1, 0x11, "b").is_ok());
    }

    #[test]
    fn interfaces_require_connected_state() {
        let table = ConnectionTable::new();
        table.setup(1, 0x10, "a").unwrap();

        let err = table
            .open_interface(1, InterfaceKind::Rpc, &caps_all())
            .unwrap_err();
        assert_eq!(err.kind(), "not_connected");
    }

    #[test]
    fn script_conflicts_with_streaming() {
        let table = connected_table();
        table
            .open_interface(1, InterfaceKind::Streaming, &caps_all())
            .unwrap();

        let err = table
            .open_interface(1, InterfaceKind::Script, &caps_all())
            .unwrap_err();
        assert_eq!(err.kind(), "interface_conflict");

        // And the reverse direction.
        table.close_interface(1, InterfaceKind::Streaming).unwrap();
        table
            .open_interface(1, InterfaceKind::Debug, &caps_all())
            .unwrap();
        let err = table
            .open_interface(1, InterfaceKind::Tracing, &caps_all())
            .unwrap_err();
        assert_eq!(err.kind(), "interface_conflict");
    }

    #[test]
    fn rpc_and_streaming_coexist() {
        let table = connected_table();
        table.open_interface(1, InterfaceKind::Rpc, &caps_all()).unwrap();
        table
            .open_interface(1, InterfaceKind::Streaming, &caps_all())
            .unwrap();
        table
            .open_interface(1, InterfaceKind::Tracing, &caps_all())
            .unwrap();
        assert!(table.require_interface(1, InterfaceKind::Rpc).is_ok());
    }

    #[test]
    fn unsupported_interface_rejected() {
        let table = connected_table();
        let mut caps = caps_all();
        caps.supports_debug = false;

        let err = table
            .open_interface(1, InterfaceKind::Debug, &caps)
            .unwrap_err();
        assert_eq!(err.kind(), "bad_argument");
    }

    #[test]
    fn disconnect_cancels_and_closes_interfaces() {
        let table = connected_table();
        table.open_interface(1, InterfaceKind::Rpc, &caps_all()).unwrap();
        table
            .open_interface(1, InterfaceKind::Streaming, &caps_all())
            .unwrap();

        let cancel = table.cancel_token(1).unwrap();
        assert!(!cancel.is_cancelled());

        let info = table.mark_disconnected(1).unwrap();
        assert!(info.open_interfaces.contains(InterfaceKind::Streaming));
        assert!(cancel.is_cancelled());

        let err = table.require_interface(1, InterfaceKind::Rpc).unwrap_err();
        assert_eq!(err.kind(), "not_connected");
    }

    #[test]
    fn require_interface_distinguishes_not_open() {
        let table = connected_table();
        let err = table.require_interface(1, InterfaceKind::Rpc).unwrap_err();
        assert_eq!(err.kind(), "interface_not_open");
    }
}
