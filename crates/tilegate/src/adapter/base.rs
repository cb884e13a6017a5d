// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared adapter behavior: monitor registry, event fan-out, config store.
//!
//! Adapters embed an [`AdapterBase`] by composition and call
//! [`AdapterBase::notify`] from their event loops.  Monitors receive events
//! through bounded queues; a full queue drops the event for that monitor
//! only, with a counter.  Events are never delivered while any adapter lock
//! is held.

use crate::adapter::AdapterEvent;
use crate::types::{ConnectionHandle, DeviceId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event classes a monitor can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DeviceSeen,
    Connection,
    Report,
    Broadcast,
    Trace,
    Disconnection,
    Progress,
}

impl EventKind {
    fn bit(self) -> u8 {
        match self {
            EventKind::DeviceSeen => 1 << 0,
            EventKind::Connection => 1 << 1,
            EventKind::Report => 1 << 2,
            EventKind::Broadcast => 1 << 3,
            EventKind::Trace => 1 << 4,
            EventKind::Disconnection => 1 << 5,
            EventKind::Progress => 1 << 6,
        }
    }

    /// Classify an event.
    #[must_use]
    pub fn of(event: &AdapterEvent) -> Self {
        match event {
            AdapterEvent::DeviceSeen(_) => EventKind::DeviceSeen,
            AdapterEvent::Connection => EventKind::Connection,
            AdapterEvent::Report(_) => EventKind::Report,
            AdapterEvent::Broadcast(_) => EventKind::Broadcast,
            AdapterEvent::Trace(_) => EventKind::Trace,
            AdapterEvent::Disconnection { .. } => EventKind::Disconnection,
            AdapterEvent::Progress { .. } => EventKind::Progress,
        }
    }
}

/// Set of event kinds, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKindSet(u8);

impl EventKindSet {
    /// Every event kind.
    #[must_use]
    pub fn all() -> Self {
        Self(0x7F)
    }

    #[must_use]
    pub fn of(kinds: &[EventKind]) -> Self {
        Self(kinds.iter().fold(0, |mask, kind| mask | kind.bit()))
    }

    #[must_use]
    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

/// Which events a monitor wants.
#[derive(Debug, Clone)]
pub struct MonitorFilter {
    /// `None` matches every device, including events with no device context.
    pub devices: Option<HashSet<DeviceId>>,
    pub events: EventKindSet,
}

impl MonitorFilter {
    /// Every event from every device.
    #[must_use]
    pub fn all() -> Self {
        Self {
            devices: None,
            events: EventKindSet::all(),
        }
    }

    /// Every event kind for one device.
    #[must_use]
    pub fn device(device_id: DeviceId) -> Self {
        Self {
            devices: Some(HashSet::from([device_id])),
            events: EventKindSet::all(),
        }
    }

    /// Restrict the event kinds.
    #[must_use]
    pub fn events(mut self, kinds: &[EventKind]) -> Self {
        self.events = EventKindSet::of(kinds);
        self
    }

    fn matches(&self, envelope: &EventEnvelope) -> bool {
        if !self.events.contains(EventKind::of(&envelope.event)) {
            return false;
        }
        match (&self.devices, envelope.device_id) {
            (None, _) => true,
            (Some(devices), Some(device_id)) => devices.contains(&device_id),
            (Some(_), None) => false,
        }
    }
}

/// An event with its delivery context.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    /// Index of the originating adapter within an aggregator (0 standalone).
    pub adapter_index: usize,
    /// Connection string of the device involved, when known.
    pub conn_string: String,
    /// Connection handle, for connection-scoped events.
    pub conn_id: Option<ConnectionHandle>,
    /// Device involved, when known.
    pub device_id: Option<DeviceId>,
    pub event: AdapterEvent,
}

/// Receiving side of a registered monitor.
pub struct MonitorHandle {
    id: u64,
    pub rx: mpsc::Receiver<EventEnvelope>,
    dropped: Arc<AtomicU64>,
}

impl MonitorHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Events dropped because this monitor's queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct MonitorEntry {
    filter: MonitorFilter,
    tx: mpsc::Sender<EventEnvelope>,
    dropped: Arc<AtomicU64>,
}

/// Shared state embedded by every adapter.
pub struct AdapterBase {
    name: String,
    monitors: RwLock<HashMap<u64, MonitorEntry>>,
    next_monitor: AtomicU64,
    queue_depth: usize,
    config: RwLock<HashMap<String, serde_json::Value>>,
}

impl AdapterBase {
    #[must_use]
    pub fn new(name: impl Into<String>, queue_depth: usize) -> Self {
        Self {
            name: name.into(),
            monitors: RwLock::new(HashMap::new()),
            next_monitor: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
            config: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an event monitor.
    pub fn register_monitor(&self, filter: MonitorFilter) -> MonitorHandle {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let dropped = Arc::new(AtomicU64::new(0));
        let id = self.next_monitor.fetch_add(1, Ordering::Relaxed);

        self.monitors.write().insert(
            id,
            MonitorEntry {
                filter,
                tx,
                dropped: dropped.clone(),
            },
        );

        MonitorHandle { id, rx, dropped }
    }

    pub fn remove_monitor(&self, id: u64) -> bool {
        self.monitors.write().remove(&id).is_some()
    }

    /// Fan an event out to every matching monitor.
    ///
    /// Never blocks; a full monitor queue counts a drop for that monitor
    /// only.  Returns the number of monitors that received the event.
    pub fn notify(&self, envelope: EventEnvelope) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let monitors = self.monitors.read();
            for (id, entry) in monitors.iter() {
                if !entry.filter.matches(&envelope) {
                    continue;
                }

                match entry.tx.try_send(envelope.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        entry.dropped.fetch_add(1, Ordering::Relaxed);
                        log::debug!(
                            "[{}] monitor {} queue full, dropping {:?}",
                            self.name,
                            id,
                            EventKind::of(&envelope.event)
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut monitors = self.monitors.write();
            for id in closed {
                monitors.remove(&id);
            }
        }

        delivered
    }

    /// Get a config value set before `start`.
    #[must_use]
    pub fn get_config(&self, key: &str) -> Option<serde_json::Value> {
        self.config.read().get(key).cloned()
    }

    /// Adjust a config value before `start`.
    pub fn set_config(&self, key: impl Into<String>, value: serde_json::Value) {
        self.config.write().insert(key.into(), value);
    }
}
