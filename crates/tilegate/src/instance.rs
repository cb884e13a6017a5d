// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One gateway instance assembled from a configuration document.
//!
//! A [`GatewayInstance`] owns the aggregated adapter stack, the device
//! manager, and the agents re-exporting it.  All state is instance-local;
//! multiple instances can run in one process.  Configuration errors are
//! fatal at build time, before any transport resource is touched.

use crate::adapter::AggregatingAdapter;
use crate::agent::GatewayAgent;
use crate::auth::AuthChain;
use crate::config::GatewayConfig;
use crate::errors::Result;
use crate::manager::DeviceManager;
use crate::registry::PluginRegistry;
use std::sync::Arc;

/// A fully wired gateway: adapters behind a manager, agents in front.
pub struct GatewayInstance {
    manager: Arc<DeviceManager>,
    agents: Vec<Arc<dyn GatewayAgent>>,
}

impl std::fmt::Debug for GatewayInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayInstance")
            .field("agents", &self.agents)
            .finish()
    }
}

impl GatewayInstance {
    /// Build an instance from its configuration document.
    ///
    /// Every named plug-in must exist in the registry; unknown names fail
    /// here with `UnknownAdapter`/`UnknownAgent`.
    pub fn build(
        config: &GatewayConfig,
        registry: &PluginRegistry,
        chain: AuthChain,
    ) -> Result<Self> {
        let mut aggregator = AggregatingAdapter::new(&config.tuning);
        for entry in &config.adapters {
            let adapter = registry.build_adapter(entry, &config.tuning)?;
            log::info!("[instance] adapter '{}' configured", entry.name);
            aggregator.add_adapter(adapter)?;
        }

        let manager = Arc::new(DeviceManager::new(
            Arc::new(aggregator),
            chain,
            config.tuning.clone(),
        ));

        let mut agents = Vec::with_capacity(config.agents.len());
        for entry in &config.agents {
            agents.push(registry.build_agent(entry)?);
            log::info!("[instance] agent '{}' configured", entry.name);
        }

        Ok(Self { manager, agents })
    }

    /// Start adapters, the manager pump, then every agent.
    pub async fn start(&self) -> Result<()> {
        self.manager.start().await?;
        for agent in &self.agents {
            agent.start(self.manager.clone()).await?;
        }
        Ok(())
    }

    /// Stop agents first so no new sessions arrive, then the manager.
    pub async fn shutdown(&self) -> Result<()> {
        for agent in &self.agents {
            agent.stop().await?;
        }
        self.manager.shutdown().await
    }

    /// The session layer, for in-process agents and tests.
    #[must_use]
    pub fn manager(&self) -> Arc<DeviceManager> {
        self.manager.clone()
    }
}
