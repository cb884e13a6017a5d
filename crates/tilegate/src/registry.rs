// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Explicit plug-in registry for adapter and agent factories.
//!
//! The registry is populated at startup from code (no entry-point discovery
//! machinery) and then consulted while building a
//! [`GatewayInstance`](crate::instance::GatewayInstance) from its
//! configuration document.  It is plain owned state with an explicit
//! lifecycle: construct, register, build, drop.  Several instances can
//! coexist in one process.

use crate::adapter::DeviceAdapter;
use crate::agent::GatewayAgent;
use crate::config::{AdapterAddress, AdapterEntry, AgentEntry, Tuning};
use crate::errors::{Error, Result};
use crate::virtual_device::{VirtualAdapter, VirtualDevice};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds one adapter from its config entry.
pub type AdapterFactory =
    Box<dyn Fn(&AdapterEntry, &Tuning) -> Result<Arc<dyn DeviceAdapter>> + Send + Sync>;

/// Builds one agent from its config entry.
pub type AgentFactory = Box<dyn Fn(&AgentEntry) -> Result<Arc<dyn GatewayAgent>> + Send + Sync>;

/// Name-keyed factories for the plug-ins a gateway instance may host.
#[derive(Default)]
pub struct PluginRegistry {
    adapters: HashMap<String, AdapterFactory>,
    agents: HashMap<String, AgentFactory>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `virtual` adapter installed.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register_adapter("virtual", Box::new(build_virtual_adapter));
        registry
    }

    pub fn register_adapter(&mut self, name: impl Into<String>, factory: AdapterFactory) {
        self.adapters.insert(name.into(), factory);
    }

    pub fn register_agent(&mut self, name: impl Into<String>, factory: AgentFactory) {
        self.agents.insert(name.into(), factory);
    }

    /// Instantiate the adapter named by a config entry.
    pub fn build_adapter(
        &self,
        entry: &AdapterEntry,
        tuning: &Tuning,
    ) -> Result<Arc<dyn DeviceAdapter>> {
        let factory = self
            .adapters
            .get(&entry.name)
            .ok_or_else(|| Error::UnknownAdapter(entry.name.clone()))?;
        factory(entry, tuning)
    }

    /// Instantiate the agent named by a config entry.
    pub fn build_agent(&self, entry: &AgentEntry) -> Result<Arc<dyn GatewayAgent>> {
        let factory = self
            .agents
            .get(&entry.name)
            .ok_or_else(|| Error::UnknownAgent(entry.name.clone()))?;
        factory(entry)
    }

    #[must_use]
    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }
}

/// Factory for the built-in virtual adapter.
///
/// Args: `{"devices": [{"device_id": 1, "name": "Simple"}, ...]}` pre-hosts
/// simple devices with a controller tile at address 8.  The adapter address
/// form `virtual:device=<hex>` adds devices too, one `device` parameter each.
fn build_virtual_adapter(entry: &AdapterEntry, tuning: &Tuning) -> Result<Arc<dyn DeviceAdapter>> {
    let adapter = VirtualAdapter::with_limits(
        tuning.monitor_queue_depth,
        tuning.max_report_bytes,
        tuning.scan_expiration(),
        tuning.async_rpc_deadline(),
    );

    if !entry.port.is_empty() {
        let address = AdapterAddress::parse(&entry.port)?;
        for (key, value) in &address.params {
            if key != "device" {
                continue;
            }
            let device_id = u64::from_str_radix(value, 16).map_err(|_| {
                Error::BadArgument(format!("bad device id {:?} in {:?}", value, entry.port))
            })?;
            adapter.add_device(VirtualDevice::simple(device_id, "vdev")?)?;
        }
    }

    if let Some(devices) = entry.args.get("devices") {
        let devices = devices
            .as_array()
            .ok_or_else(|| Error::BadArgument("virtual adapter devices must be an array".into()))?;

        for spec in devices {
            let device_id = spec
                .get("device_id")
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| {
                    Error::BadArgument("virtual device needs a numeric device_id".into())
                })?;
            let name = spec
                .get("name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("vdev");

            adapter.add_device(VirtualDevice::simple(device_id, name)?)?;
        }
    }

    Ok(Arc::new(adapter))
}
