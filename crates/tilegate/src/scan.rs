// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scan table tracking which devices are visible through which adapters.
//!
//! Every `device_seen` event records one *sighting*: a device observed by one
//! adapter with a signal strength and an expiry deadline.  The table merges
//! sightings per device and serves merged scan results, never returning
//! entries whose last contributing sighting has expired.
//!
//! Access follows a reader-writer discipline: scans are frequent and
//! concurrent, updates come from the adapter event loops.

use crate::types::DeviceId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One device observation reported by one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub device_id: DeviceId,
    /// Adapter-local connection string, not portable across adapter kinds.
    pub connection_string: String,
    /// Higher is better; scale is adapter-specific but comparable per device.
    pub signal_strength: i32,
    /// Monotonic deadline after which this sighting is stale.
    pub expires: Instant,
    pub user_connected: bool,
    pub pending_data: bool,
    pub low_voltage: bool,
    /// Index of the reporting adapter within the aggregator.
    pub adapter_index: usize,
}

impl ScanResult {
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires
    }
}

/// One candidate route to a device, ordered by descending signal strength.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCandidate {
    pub adapter_index: usize,
    pub signal_strength: i32,
    pub connection_string: String,
}

/// A device entry merged across all adapters that can currently see it.
#[derive(Debug, Clone)]
pub struct MergedScanResult {
    pub device_id: DeviceId,
    /// Universal connection string (`device/<hex-uuid>`).
    pub connection_string: String,
    /// Best signal strength among the candidates.
    pub signal_strength: i32,
    /// Candidates sorted by descending signal strength.
    pub adapters: Vec<RouteCandidate>,
    pub user_connected: bool,
    pub pending_data: bool,
    pub low_voltage: bool,
    /// Latest expiry among contributing sightings.
    pub expires: Instant,
}

/// Merged multi-adapter scan table with sighting expiry.
pub struct ScanTable {
    /// device -> adapter index -> latest sighting
    sightings: RwLock<HashMap<DeviceId, HashMap<usize, ScanResult>>>,
    default_validity: Duration,
}

impl ScanTable {
    #[must_use]
    pub fn new(default_validity: Duration) -> Self {
        Self {
            sightings: RwLock::new(HashMap::new()),
            default_validity,
        }
    }

    /// Validity window applied when an adapter reports no expiry of its own.
    #[must_use]
    pub fn default_validity(&self) -> Duration {
        self.default_validity
    }

    /// Record a sighting, replacing any previous sighting of the same device
    /// through the same adapter.
    pub fn record(&self, sighting: ScanResult) {
        let mut sightings = self.sightings.write();
        sightings
            .entry(sighting.device_id)
            .or_default()
            .insert(sighting.adapter_index, sighting);
    }

    /// Merged view of one device, or `None` if every sighting has expired.
    #[must_use]
    pub fn get(&self, device_id: DeviceId, now: Instant) -> Option<MergedScanResult> {
        let sightings = self.sightings.read();
        merge(device_id, sightings.get(&device_id)?, now)
    }

    /// Merged view of all currently visible devices.
    #[must_use]
    pub fn merged(&self, now: Instant) -> Vec<MergedScanResult> {
        let sightings = self.sightings.read();
        let mut results: Vec<MergedScanResult> = sightings
            .iter()
            .filter_map(|(device_id, per_adapter)| merge(*device_id, per_adapter, now))
            .collect();
        results.sort_by_key(|r| r.device_id);
        results
    }

    /// Ordered connect candidates for a device (best signal first).
    #[must_use]
    pub fn route_candidates(&self, device_id: DeviceId, now: Instant) -> Vec<RouteCandidate> {
        self.get(device_id, now)
            .map(|merged| merged.adapters)
            .unwrap_or_default()
    }

    /// Drop expired sightings, returning how many were removed.
    pub fn expire(&self, now: Instant) -> usize {
        let mut sightings = self.sightings.write();
        let mut removed = 0;

        sightings.retain(|_, per_adapter| {
            per_adapter.retain(|_, sighting| {
                let keep = !sighting.is_expired(now);
                if !keep {
                    removed += 1;
                }
                keep
            });
            !per_adapter.is_empty()
        });

        removed
    }

    /// Number of devices with at least one recorded sighting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sightings.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sightings.read().is_empty()
    }
}

/// Universal connection string for a device id.
#[must_use]
pub fn device_connection_string(device_id: DeviceId) -> String {
    format!("device/{:x}", device_id)
}

/// Parse a universal `device/<hex-uuid>` connection string.
#[must_use]
pub fn parse_device_connection_string(conn_string: &str) -> Option<DeviceId> {
    let hex_id = conn_string.strip_prefix("device/")?;
    DeviceId::from_str_radix(hex_id, 16).ok()
}

fn merge(
    device_id: DeviceId,
    per_adapter: &HashMap<usize, ScanResult>,
    now: Instant,
) -> Option<MergedScanResult> {
    let live: Vec<&ScanResult> = per_adapter
        .values()
        .filter(|s| !s.is_expired(now))
        .collect();

    if live.is_empty() {
        return None;
    }

    let mut adapters: Vec<RouteCandidate> = live
        .iter()
        .map(|s| RouteCandidate {
            adapter_index: s.adapter_index,
            signal_strength: s.signal_strength,
            connection_string: s.connection_string.clone(),
        })
        .collect();
    adapters.sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength));

    let expires = live.iter().map(|s| s.expires).max()?;

    Some(MergedScanResult {
        device_id,
        connection_string: device_connection_string(device_id),
        signal_strength: adapters[0].signal_strength,
        user_connected: live.iter().any(|s| s.user_connected),
        pending_data: live.iter().any(|s| s.pending_data),
        low_voltage: live.iter().any(|s| s.low_voltage),
        adapters,
        expires,
    })
}
