// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Aggregated connect routing: best-signal selection, early-disconnect
//! retries, and fallback behavior.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tilegate::adapter::{
    AdapterBase, AdapterCapabilities, AdapterEvent, AggregatingAdapter, DeviceAdapter,
    EventEnvelope,
};
use tilegate::config::Tuning;
use tilegate::errors::{Error, Result};
use tilegate::scan::ScanResult;
use tilegate::types::{ConnectionHandle, DeviceId, InterfaceKind, RpcResponse};

/// Test transport that fails its first `failures` connects with an early
/// disconnect, then succeeds.
struct FlakyAdapter {
    base: AdapterBase,
    device_id: DeviceId,
    signal_strength: i32,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyAdapter {
    fn new(name: &str, device_id: DeviceId, signal_strength: i32, failures: usize) -> Self {
        Self {
            base: AdapterBase::new(name, 16),
            device_id,
            signal_strength,
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn announce(&self) {
        let sighting = ScanResult {
            device_id: self.device_id,
            connection_string: format!("{:x}", self.device_id),
            signal_strength: self.signal_strength,
            expires: Instant::now() + Duration::from_secs(60),
            user_connected: false,
            pending_data: false,
            low_voltage: false,
            adapter_index: 0,
        };
        self.base.notify(EventEnvelope {
            adapter_index: 0,
            conn_string: sighting.connection_string.clone(),
            conn_id: None,
            device_id: Some(self.device_id),
            event: AdapterEvent::DeviceSeen(sighting),
        });
    }
}

#[async_trait]
impl DeviceAdapter for FlakyAdapter {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities::default()
    }

    fn base(&self) -> &AdapterBase {
        &self.base
    }

    fn can_connect(&self) -> bool {
        true
    }

    async fn start(&self) -> Result<()> {
        self.announce();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        self.announce();
        Ok(())
    }

    async fn connect(&self, _conn_id: ConnectionHandle, _conn_string: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::EarlyDisconnect);
        }
        Ok(())
    }

    async fn disconnect(&self, _conn_id: ConnectionHandle) -> Result<()> {
        Ok(())
    }

    async fn open_interface(&self, _conn_id: ConnectionHandle, _iface: InterfaceKind) -> Result<()> {
        Ok(())
    }

    async fn close_interface(
        &self,
        _conn_id: ConnectionHandle,
        _iface: InterfaceKind,
    ) -> Result<()> {
        Ok(())
    }

    async fn send_rpc(
        &self,
        _conn_id: ConnectionHandle,
        _address: u8,
        _rpc_id: u16,
        _payload: &[u8],
        _timeout: Duration,
    ) -> Result<RpcResponse> {
        Ok(RpcResponse::ok(Vec::new()))
    }

    async fn send_script(&self, _conn_id: ConnectionHandle, _script: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn send_highspeed(&self, _conn_id: ConnectionHandle, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

async fn aggregator_over(
    adapters: Vec<Arc<dyn DeviceAdapter>>,
) -> AggregatingAdapter {
    let aggregator =
        AggregatingAdapter::with_adapters(&Tuning::default(), adapters).unwrap();
    aggregator.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    aggregator
}

#[tokio::test]
async fn fallback_connect_retries_best_adapter_first() {
    // Adapter A sees device 5 at -40 and fails three times; B sees it at -80.
    let adapter_a = Arc::new(FlakyAdapter::new("ble0", 5, -40, 3));
    let adapter_b = Arc::new(FlakyAdapter::new("ble1", 5, -80, 0));

    let aggregator = aggregator_over(vec![
        adapter_a.clone() as Arc<dyn DeviceAdapter>,
        adapter_b.clone() as Arc<dyn DeviceAdapter>,
    ])
    .await;

    let conn_id = aggregator.unique_conn_id();
    aggregator.connect(conn_id, "device/5").await.unwrap();

    // A succeeded on its fourth attempt; B was never tried.
    assert_eq!(adapter_a.attempts(), 4);
    assert_eq!(adapter_b.attempts(), 0);
}

#[tokio::test]
async fn exhausted_retries_fall_back_to_next_candidate() {
    // A always early-disconnects; the connect lands on B.
    let adapter_a = Arc::new(FlakyAdapter::new("ble0", 5, -40, usize::MAX));
    let adapter_b = Arc::new(FlakyAdapter::new("ble1", 5, -80, 0));

    let aggregator = aggregator_over(vec![
        adapter_a.clone() as Arc<dyn DeviceAdapter>,
        adapter_b.clone() as Arc<dyn DeviceAdapter>,
    ])
    .await;

    let conn_id = aggregator.unique_conn_id();
    aggregator.connect(conn_id, "device/5").await.unwrap();

    assert_eq!(adapter_a.attempts(), 5);
    assert_eq!(adapter_b.attempts(), 1);
}

#[tokio::test]
async fn all_candidates_failing_surfaces_an_error() {
    let adapter_a = Arc::new(FlakyAdapter::new("ble0", 5, -40, usize::MAX));
    let adapter_b = Arc::new(FlakyAdapter::new("ble1", 5, -80, usize::MAX));

    let aggregator = aggregator_over(vec![
        adapter_a.clone() as Arc<dyn DeviceAdapter>,
        adapter_b.clone() as Arc<dyn DeviceAdapter>,
    ])
    .await;

    let conn_id = aggregator.unique_conn_id();
    let err = aggregator.connect(conn_id, "device/5").await.unwrap_err();
    assert!(err.is_transient());

    assert_eq!(adapter_a.attempts(), 5);
    assert_eq!(adapter_b.attempts(), 5);
}

#[tokio::test]
async fn merged_scan_is_union_of_adapter_views() {
    let adapter_a = Arc::new(FlakyAdapter::new("ble0", 1, -40, 0));
    let adapter_b = Arc::new(FlakyAdapter::new("ble1", 2, -60, 0));

    let aggregator = aggregator_over(vec![
        adapter_a as Arc<dyn DeviceAdapter>,
        adapter_b as Arc<dyn DeviceAdapter>,
    ])
    .await;

    let merged = aggregator.merged_scans();
    let ids: Vec<DeviceId> = merged.iter().map(|m| m.device_id).collect();
    assert_eq!(ids, vec![1, 2]);

    // Each entry is tagged with the adapter that contributed it.
    assert_eq!(merged[0].adapters[0].adapter_index, 0);
    assert_eq!(merged[1].adapters[0].adapter_index, 1);
}

#[tokio::test]
async fn same_device_on_two_adapters_appears_once() {
    let adapter_a = Arc::new(FlakyAdapter::new("ble0", 9, -70, 0));
    let adapter_b = Arc::new(FlakyAdapter::new("ble1", 9, -45, 0));

    let aggregator = aggregator_over(vec![
        adapter_a as Arc<dyn DeviceAdapter>,
        adapter_b as Arc<dyn DeviceAdapter>,
    ])
    .await;

    let merged = aggregator.merged_scans();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].device_id, 9);
    assert_eq!(merged[0].signal_strength, -45);
    assert_eq!(merged[0].adapters.len(), 2);
    // Candidates sorted best-signal-first.
    assert_eq!(merged[0].adapters[0].adapter_index, 1);
}
