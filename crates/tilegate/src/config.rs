// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration document.
//!
//! A [`GatewayConfig`] names the adapter and agent plug-ins to instantiate
//! and carries the runtime tunables.  Plug-in entries pass opaque `args`
//! through to the factory registered under `name`; the core never interprets
//! them.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server-side agents re-exporting the session layer.
    #[serde(default)]
    pub agents: Vec<AgentEntry>,

    /// Transport adapters to aggregate.
    #[serde(default)]
    pub adapters: Vec<AdapterEntry>,

    /// Runtime tunables.
    #[serde(default)]
    pub tuning: Tuning,
}

/// One agent plug-in instantiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub name: String,

    /// Opaque constructor arguments, interpreted by the factory.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// One adapter plug-in instantiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterEntry {
    pub name: String,

    /// Adapter address in `transport:param1=value;param2=value` form.
    #[serde(default)]
    pub port: String,

    /// Opaque constructor arguments, interpreted by the factory.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Runtime tunables with spec-mandated defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tuning {
    /// Adapter fallback budget when routing a connect (default 5).
    #[serde(default = "default_max_connect_retries")]
    pub max_connect_retries: usize,

    /// Silent reconnect budget when a disconnect interrupts an RPC (default 3).
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: usize,

    /// Upper bound on a single assembled report (default 1 MiB).
    #[serde(default = "default_max_report_bytes")]
    pub max_report_bytes: usize,

    /// Scan entry lifetime when the adapter does not declare one (seconds).
    #[serde(default = "default_scan_expiration_secs")]
    pub scan_expiration_secs: u64,

    /// Bounded depth of each monitor / subscriber queue.
    #[serde(default = "default_monitor_queue_depth")]
    pub monitor_queue_depth: usize,

    /// Hard deadline for an RPC that answered `async_pending` (seconds).
    #[serde(default = "default_async_rpc_deadline_secs")]
    pub async_rpc_deadline_secs: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            max_connect_retries: default_max_connect_retries(),
            reconnect_attempts: default_reconnect_attempts(),
            max_report_bytes: default_max_report_bytes(),
            scan_expiration_secs: default_scan_expiration_secs(),
            monitor_queue_depth: default_monitor_queue_depth(),
            async_rpc_deadline_secs: default_async_rpc_deadline_secs(),
        }
    }
}

impl Tuning {
    #[must_use]
    pub fn scan_expiration(&self) -> Duration {
        Duration::from_secs(self.scan_expiration_secs)
    }

    #[must_use]
    pub fn async_rpc_deadline(&self) -> Duration {
        Duration::from_secs(self.async_rpc_deadline_secs)
    }
}

fn default_max_connect_retries() -> usize {
    5
}

fn default_reconnect_attempts() -> usize {
    3
}

fn default_max_report_bytes() -> usize {
    1024 * 1024
}

fn default_scan_expiration_secs() -> u64 {
    60
}

fn default_monitor_queue_depth() -> usize {
    16
}

fn default_async_rpc_deadline_secs() -> u64 {
    60
}

impl GatewayConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::BadArgument(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::BadArgument(format!("invalid config: {}", e)))
    }
}

/// Parsed adapter address: `transport:param1=value;param2=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterAddress {
    pub scheme: String,
    pub params: Vec<(String, String)>,
}

impl AdapterAddress {
    /// Parse an adapter address string.
    ///
    /// The scheme is mandatory; parameters are optional and a bare key is
    /// treated as `key=`.
    pub fn parse(address: &str) -> Result<Self> {
        let (scheme, rest) = match address.split_once(':') {
            Some((scheme, rest)) => (scheme, rest),
            None => (address, ""),
        };

        if scheme.is_empty() {
            return Err(Error::BadArgument(format!(
                "adapter address has no scheme: {:?}",
                address
            )));
        }

        let mut params = Vec::new();
        for piece in rest.split(';').filter(|p| !p.is_empty()) {
            match piece.split_once('=') {
                Some((key, value)) => params.push((key.to_string(), value.to_string())),
                None => params.push((piece.to_string(), String::new())),
            }
        }

        Ok(Self {
            scheme: scheme.to_string(),
            params,
        })
    }

    /// Look up a parameter by key.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let tuning = Tuning::default();
        assert_eq!(tuning.max_connect_retries, 5);
        assert_eq!(tuning.reconnect_attempts, 3);
        assert_eq!(tuning.max_report_bytes, 1024 * 1024);
        assert_eq!(tuning.async_rpc_deadline_secs, 60);
    }

    #[test]
    fn parse_minimal_config() {
        let config = GatewayConfig::from_json(
            r#"{
                "agents": [{"name": "tcp", "args": {"port": 5120}}],
                "adapters": [{"name": "virtual", "port": "virtual:device=1"}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.adapters.len(), 1);
        assert_eq!(config.adapters[0].name, "virtual");
        assert_eq!(config.tuning.max_connect_retries, 5);
    }

    #[test]
    fn rejects_malformed_config() {
        assert!(GatewayConfig::from_json("{ nope").is_err());
    }

    #[test]
    fn adapter_address_parsing() {
        let addr = AdapterAddress::parse("bled112:port=/dev/ttyACM0;active-scan=1").unwrap();
        assert_eq!(addr.scheme, "bled112");
        assert_eq!(addr.param("port"), Some("/dev/ttyACM0"));
        assert_eq!(addr.param("active-scan"), Some("1"));
        assert_eq!(addr.param("missing"), None);

        let bare = AdapterAddress::parse("virtual").unwrap();
        assert_eq!(bare.scheme, "virtual");
        assert!(bare.params.is_empty());

        assert!(AdapterAddress::parse(":x=1").is_err());
    }
}
