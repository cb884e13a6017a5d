// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The device adapter contract: one implementation per transport.
//!
//! Communication through an adapter is connection oriented.  A host connects
//! to a device, opens interfaces on the connection, interacts through them,
//! and disconnects.  Commands flow from host to device through the trait
//! methods; events flow back through registered monitors (see
//! [`base::AdapterBase`]).
//!
//! Connection handles are allocated by the *host* and passed into `connect`,
//! so events that race the connect completion can already be correlated.
//!
//! # Modules
//!
//! - `base` - shared monitor registry and config store, embedded by adapters
//! - `connection` - per-connection interface state machine
//! - `retry` - error-kind-dispatched retry helpers
//! - `aggregating` - multi-adapter aggregation and routing

pub mod aggregating;
pub mod base;
pub mod connection;
pub mod retry;

pub use aggregating::AggregatingAdapter;
pub use base::{AdapterBase, EventEnvelope, EventKind, EventKindSet, MonitorFilter, MonitorHandle};
pub use connection::{ConnectionState, ConnectionTable};

use crate::errors::Result;
use crate::report::Report;
use crate::scan::ScanResult;
use crate::types::{ConnectionHandle, InterfaceKind, ProgressOperation, RpcResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Capability flags an adapter declares at startup.
#[derive(Debug, Clone, Copy)]
pub struct AdapterCapabilities {
    pub supports_broadcast: bool,
    pub supports_streaming: bool,
    pub supports_tracing: bool,
    pub supports_debug: bool,
    pub supports_script: bool,
    pub supports_rpc: bool,
    /// Whether clients should probe before expecting scan results.
    pub requires_probe: bool,
    pub max_concurrent_connections: usize,
}

impl Default for AdapterCapabilities {
    fn default() -> Self {
        Self {
            supports_broadcast: false,
            supports_streaming: false,
            supports_tracing: false,
            supports_debug: false,
            supports_script: false,
            supports_rpc: true,
            requires_probe: false,
            max_concurrent_connections: 1,
        }
    }
}

impl AdapterCapabilities {
    /// Whether the given interface can be opened on this adapter at all.
    #[must_use]
    pub fn supports_interface(&self, iface: InterfaceKind) -> bool {
        match iface {
            InterfaceKind::Rpc => self.supports_rpc,
            InterfaceKind::Streaming => self.supports_streaming,
            InterfaceKind::Tracing => self.supports_tracing,
            InterfaceKind::Script => self.supports_script,
            InterfaceKind::Debug => self.supports_debug,
        }
    }
}

/// An event emitted by an adapter.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// A scan observation for a device.
    DeviceSeen(ScanResult),
    /// Someone connected to the device.
    Connection,
    /// A report arrived on an open streaming interface.
    Report(Arc<Report>),
    /// A broadcast report arrived without a connection.
    Broadcast(Arc<Report>),
    /// Opaque trace bytes arrived on an open tracing interface.
    Trace(Arc<[u8]>),
    /// The connection dropped.
    Disconnection {
        reason: String,
        /// True when the disconnect was requested through `disconnect`.
        expected: bool,
    },
    /// Progress update for a long-running script/debug operation.
    Progress {
        operation: ProgressOperation,
        finished: u32,
        total: u32,
    },
}

/// The contract every transport implements exactly once.
///
/// All methods that talk to hardware are async; the per-adapter event loop
/// serializes transport I/O internally.  Implementations embed
/// [`AdapterBase`] for monitor fan-out rather than inheriting behavior.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Short adapter name for logs and config.
    fn name(&self) -> &str;

    /// Capability flags, fixed at startup.
    fn capabilities(&self) -> AdapterCapabilities;

    /// Shared monitor registry and config store.
    fn base(&self) -> &AdapterBase;

    /// Whether one more connection is possible right now.
    fn can_connect(&self) -> bool;

    /// Acquire transport resources.  Must release them on failure.
    async fn start(&self) -> Result<()>;

    /// Release transport resources.  Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Force a fresh scan sweep.
    async fn probe(&self) -> Result<()>;

    /// Connect to the device at `conn_string` under the caller-allocated
    /// handle.
    ///
    /// Adapters with `requires_probe` wait at least one full scan interval
    /// before reporting `DeviceNotFound` for a device they have not seen.
    async fn connect(&self, conn_id: ConnectionHandle, conn_string: &str) -> Result<()>;

    /// Disconnect.  Idempotent; an unknown handle is not an error.
    async fn disconnect(&self, conn_id: ConnectionHandle) -> Result<()>;

    async fn open_interface(&self, conn_id: ConnectionHandle, iface: InterfaceKind) -> Result<()>;

    async fn close_interface(&self, conn_id: ConnectionHandle, iface: InterfaceKind) -> Result<()>;

    /// Send an RPC and wait for the terminal response.
    ///
    /// RPCs on one connection are strictly serialized in request order.  An
    /// `async_pending` tile response suspends the caller until the tile
    /// delivers the finish event.
    async fn send_rpc(
        &self,
        conn_id: ConnectionHandle,
        address: u8,
        rpc_id: u16,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<RpcResponse>;

    /// Stream a script blob to the device; progress arrives as events.
    async fn send_script(&self, conn_id: ConnectionHandle, script: &[u8]) -> Result<()>;

    /// Push a high-speed debug/reflash blob.
    async fn send_highspeed(&self, conn_id: ConnectionHandle, data: &[u8]) -> Result<()>;
}

impl std::fmt::Debug for dyn DeviceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAdapter").field("name", &self.name()).finish()
    }
}
