// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Report and trace fan-out to subscribers with per-subscriber backpressure.
//!
//! Each subscriber owns a bounded queue.  The producer (the adapter event
//! loop) never blocks: when a subscriber's queue is full the item is dropped
//! *for that subscriber only* and its drop counter increments.  Other
//! subscribers are unaffected.  A subscriber therefore observes every item
//! exactly once or a counted drop, never duplicates or reordering.

use crate::report::Report;
use crate::types::DeviceId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which `(device, selector)` pairs a subscriber wants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// `None` subscribes to every device.
    pub device: Option<DeviceId>,
    /// `None` subscribes to every selector.
    pub selector: Option<u16>,
}

impl SubscriptionFilter {
    #[must_use]
    pub fn device(device_id: DeviceId) -> Self {
        Self {
            device: Some(device_id),
            selector: None,
        }
    }

    #[must_use]
    pub fn matches(&self, device_id: DeviceId, selector: u16) -> bool {
        if let Some(want) = self.device {
            if want != device_id {
                return false;
            }
        }
        if let Some(want) = self.selector {
            if want != selector {
                return false;
            }
        }
        true
    }
}

/// One delivery to a subscriber queue.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Report {
        device_id: DeviceId,
        selector: u16,
        report: Arc<Report>,
    },
    Trace {
        device_id: DeviceId,
        data: Arc<[u8]>,
    },
}

/// Receiving side of one subscription.
pub struct SubscriberHandle {
    id: u64,
    pub rx: mpsc::Receiver<StreamItem>,
    dropped: Arc<AtomicU64>,
}

impl SubscriberHandle {
    /// Subscription id, used to unsubscribe.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Items dropped because this subscriber's queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct SubscriberEntry {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<StreamItem>,
    dropped: Arc<AtomicU64>,
}

/// Fan-out hub for assembled reports and trace chunks.
pub struct ReportDispatcher {
    subscribers: RwLock<HashMap<u64, SubscriberEntry>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl ReportDispatcher {
    #[must_use]
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Register a subscriber; the returned handle owns the receive queue.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> SubscriberHandle {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let dropped = Arc::new(AtomicU64::new(0));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers.write().insert(
            id,
            SubscriberEntry {
                filter,
                tx,
                dropped: dropped.clone(),
            },
        );

        log::debug!("[dispatch] subscriber {} registered {:?}", id, filter);
        SubscriberHandle { id, rx, dropped }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers.write().remove(&id).is_some()
    }

    /// Deliver a report to every matching subscriber.
    ///
    /// Returns how many subscribers received it (drops excluded).
    pub fn publish_report(&self, device_id: DeviceId, report: Arc<Report>) -> usize {
        let selector = report.selector();
        self.publish(device_id, Some(selector), || StreamItem::Report {
            device_id,
            selector,
            report: report.clone(),
        })
    }

    /// Deliver a trace chunk to every subscriber of the device.
    ///
    /// Traces have no selector; only the device part of each filter applies.
    pub fn publish_trace(&self, device_id: DeviceId, data: Arc<[u8]>) -> usize {
        self.publish(device_id, None, || StreamItem::Trace {
            device_id,
            data: data.clone(),
        })
    }

    fn publish(
        &self,
        device_id: DeviceId,
        selector: Option<u16>,
        make_item: impl Fn() -> StreamItem,
    ) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for (id, entry) in subscribers.iter() {
                let matches = match selector {
                    Some(selector) => entry.filter.matches(device_id, selector),
                    None => entry
                        .filter
                        .device
                        .map_or(true, |want| want == device_id),
                };
                if !matches {
                    continue;
                }

                match entry.tx.try_send(make_item()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        entry.dropped.fetch_add(1, Ordering::Relaxed);
                        log::debug!(
                            "[dispatch] subscriber {} queue full, dropping item for device {:#x}",
                            id,
                            device_id
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
                log::debug!("[dispatch] subscriber {} gone, removed", id);
            }
        }

        delivered
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
