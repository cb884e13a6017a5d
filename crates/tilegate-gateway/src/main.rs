// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tilegate Gateway Server
//!
//! Aggregates configured device adapters behind one device model and
//! re-exports it to clients over length-prefixed JSON frames on TCP.
//!
//! # Usage
//!
//! ```bash
//! # Start with a virtual device for smoke testing
//! tilegate-gateway --with-virtual-device 1
//!
//! # Full configuration from a file
//! tilegate-gateway --config gateway.json --port 5120
//! ```

mod config;
mod connection;
mod server;

use clap::Parser;
use config::ServerConfig;
use server::TcpAgent;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tilegate::auth::AuthChain;
use tilegate::config::{AdapterEntry, AgentEntry};
use tilegate::instance::GatewayInstance;
use tilegate::registry::PluginRegistry;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Tilegate gateway server - uniform device access over TCP
#[derive(Parser, Debug)]
#[command(name = "tilegate-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "5120")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host a virtual device with this id (repeatable; for smoke testing)
    #[arg(long = "with-virtual-device")]
    virtual_devices: Vec<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            eprintln!("unknown log level: {}", other);
            std::process::exit(1);
        }
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Configuration errors are the only fatal startup condition.
    let mut config = match &args.config {
        Some(path) => match ServerConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    config.port = args.port;
    config.bind_address = args.bind.parse().unwrap_or_else(|_| {
        eprintln!("invalid bind address: {}", args.bind);
        std::process::exit(1);
    });

    if !args.virtual_devices.is_empty() {
        let devices: Vec<serde_json::Value> = args
            .virtual_devices
            .iter()
            .map(|id| serde_json::json!({"device_id": id, "name": "Simple"}))
            .collect();
        config.gateway.adapters.push(AdapterEntry {
            name: "virtual".to_string(),
            port: "virtual".to_string(),
            args: serde_json::json!({ "devices": devices }),
        });
    }

    let bind = SocketAddr::new(config.bind_address, config.port);
    let mut registry = PluginRegistry::standard();
    {
        let max_message_size = config.max_message_size;
        let max_sessions = config.max_sessions;
        registry.register_agent(
            "tcp",
            Box::new(move |entry: &AgentEntry| {
                let bind = entry
                    .args
                    .get("bind")
                    .and_then(serde_json::Value::as_str)
                    .map(str::parse)
                    .transpose()
                    .map_err(|e| {
                        tilegate::Error::BadArgument(format!("tcp agent bind: {}", e))
                    })?
                    .unwrap_or(bind);
                Ok(Arc::new(TcpAgent::new(bind, max_message_size, max_sessions))
                    as Arc<dyn tilegate::agent::GatewayAgent>)
            }),
        );
    }

    // The server always fronts at least one TCP agent.
    if !config.gateway.agents.iter().any(|a| a.name == "tcp") {
        config.gateway.agents.push(AgentEntry {
            name: "tcp".to_string(),
            args: serde_json::Value::Null,
        });
    }

    let instance = match GatewayInstance::build(&config.gateway, &registry, AuthChain::standard()) {
        Ok(instance) => instance,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    instance.start().await?;
    info!(
        "gateway running on {} with {} adapters",
        bind,
        config.gateway.adapters.len()
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    instance.shutdown().await?;
    Ok(())
}
