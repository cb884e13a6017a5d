// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Tilegate - device gateway and transport-multiplexing runtime
//!
//! Tilegate aggregates heterogeneous transport backends (BLE dongles,
//! WebSocket bridges, serial debug links, in-process virtual devices) behind
//! one uniform device model and re-exports it to downstream clients over a
//! server-side transport.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tilegate::auth::AuthChain;
//! use tilegate::config::GatewayConfig;
//! use tilegate::instance::GatewayInstance;
//! use tilegate::registry::PluginRegistry;
//!
//! # async fn example() -> tilegate::Result<()> {
//! let config = GatewayConfig::from_json(r#"{
//!     "adapters": [{"name": "virtual",
//!                   "args": {"devices": [{"device_id": 1, "name": "Simple"}]}}]
//! }"#)?;
//!
//! let instance = GatewayInstance::build(
//!     &config,
//!     &PluginRegistry::standard(),
//!     AuthChain::standard(),
//! )?;
//! instance.start().await?;
//!
//! let manager = instance.manager();
//! let session = manager.session_open();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                         Agents (C7)                                |
//! |        {op, args, token} framing over a server transport           |
//! +--------------------------------------------------------------------+
//! |                      DeviceManager (C6)                            |
//! |   sessions | device ownership | report fan-out | broadcast routing |
//! +--------------------------------------------------------------------+
//! |                   AggregatingAdapter (C2)                          |
//! |     merged scans | best-signal routing | event fan-in              |
//! +--------------------------------------------------------------------+
//! |   DeviceAdapter (C1)  |  connection FSM (C3)  | report pipe (C4/5) |
//! |        BLE / WebSocket / serial / virtual devices (C8)             |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`adapter`] - the transport contract, aggregation and retry machinery
//! - [`report`] - report codecs, assembly, and subscriber fan-out
//! - [`auth`] - key resolution for signing, verification and encryption
//! - [`manager`] - multi-client session arbitration
//! - [`agent`] - the server-side re-export contract
//! - [`virtual_device`] - in-process synthetic devices
//! - [`registry`] / [`instance`] - plug-in wiring from a config document

pub mod adapter;
pub mod agent;
pub mod auth;
pub mod config;
pub mod errors;
pub mod instance;
pub mod manager;
pub mod registry;
pub mod report;
pub mod rpc_frame;
pub mod scan;
pub mod types;
pub mod virtual_device;

pub use errors::{Error, Result};
pub use types::{ConnectionHandle, DeviceId, InterfaceKind, Reading, RpcResponse, SessionId};
