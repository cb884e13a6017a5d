// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway server configuration.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use tilegate::config::GatewayConfig;

/// Configuration for the TCP gateway server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 5120)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum framed message size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum concurrently connected clients
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Adapter/agent stack for the hosted gateway instance
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_message_size: default_max_message_size(),
            max_sessions: default_max_sessions(),
            gateway: GatewayConfig::default(),
        }
    }
}

fn default_bind_address() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    5120
}

fn default_max_message_size() -> usize {
    4 * 1024 * 1024
}

fn default_max_sessions() -> usize {
    64
}

impl ServerConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        serde_json::from_str(&contents).map_err(|e| format!("invalid config: {}", e))
    }
}
