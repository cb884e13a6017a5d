// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-session bookkeeping for the device manager.
//!
//! A session is one external client.  It owns connections (at most one per
//! device, enforced globally by the manager), report subscriptions, and
//! broadcast monitors; closing the session releases all of them.  Sessions
//! receive lifecycle notifications through a bounded event queue.

use crate::types::{ConnectionHandle, DeviceId, InterfaceKind, SessionId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Lifecycle notification delivered to a session's event queue.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A device this session was connected to dropped its connection.
    DeviceDisconnected {
        device_id: DeviceId,
        reason: String,
        expected: bool,
    },
    /// The session itself was closed; no further events follow.
    Closed,
}

/// Receiving side of a session's lifecycle events.
pub struct SessionHandle {
    pub id: SessionId,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Internal per-session state held by the manager.
pub(crate) struct SessionState {
    pub id: SessionId,
    /// Device -> connection handle owned by this session.
    pub connections: Mutex<HashMap<DeviceId, ConnectionHandle>>,
    /// Interfaces this session asked to open, per device.
    pub opened: Mutex<HashSet<(DeviceId, InterfaceKind)>>,
    /// Dispatcher subscription ids owned by this session.
    pub subscriptions: Mutex<Vec<u64>>,
    /// Broadcast monitor ids owned by this session.
    pub broadcast_monitors: Mutex<Vec<u64>>,
    pub events: mpsc::Sender<SessionEvent>,
    closed: AtomicBool,
}

impl SessionState {
    pub fn new(id: SessionId, queue_depth: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        (
            Self {
                id,
                connections: Mutex::new(HashMap::new()),
                opened: Mutex::new(HashSet::new()),
                subscriptions: Mutex::new(Vec::new()),
                broadcast_monitors: Mutex::new(Vec::new()),
                events: tx,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Mark closed; returns false if the session was already closed.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Connection handle this session holds for `device_id`.
    pub fn connection(&self, device_id: DeviceId) -> Option<ConnectionHandle> {
        self.connections.lock().get(&device_id).copied()
    }

    /// Best-effort event delivery; a full queue drops the notification.
    pub fn notify(&self, event: SessionEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.events.try_send(event) {
            log::debug!("[manager] session {} event queue full", self.id);
        }
    }
}
