// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway agent contract and the protocol-agnostic operation model.
//!
//! An agent re-exports the session layer over some server-side transport.
//! Each client connection becomes exactly one session; requests are framed
//! `{op, args, token}` structures and every response echoes the request
//! token.  Unsolicited data (reports, traces, broadcasts, disconnects)
//! travels as `{event, args}` frames with no token.
//!
//! Nothing in this module knows about sockets: [`dispatch`] maps one decoded
//! operation onto the [`DeviceManager`], and the hosting agent (see the
//! `tilegate-gateway` binary) owns framing and delivery.

use crate::errors::{Error, Result};
use crate::manager::{BroadcastHandle, BroadcastPattern, DeviceManager};
use crate::report::dispatch::SubscriberHandle;
use crate::scan::MergedScanResult;
use crate::types::{DeviceId, InterfaceKind, RpcResponse, SessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A server-side transport plug-in re-exporting the session layer.
#[async_trait]
pub trait GatewayAgent: Send + Sync {
    /// Agent name for logs and config.
    fn name(&self) -> &str;

    /// Bind the transport and begin accepting clients.
    async fn start(&self, manager: Arc<DeviceManager>) -> Result<()>;

    /// Stop accepting clients and close existing ones.
    async fn stop(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn GatewayAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayAgent").field("name", &self.name()).finish()
    }
}

// ============================================================================
// Wire model
// ============================================================================

/// One client request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    pub token: u64,
    #[serde(flatten)]
    pub op: Operation,
}

/// Operations a client can invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Operation {
    Scan {
        timeout_ms: u64,
    },
    Connect {
        device_id: DeviceId,
    },
    Disconnect {
        device_id: DeviceId,
    },
    SendRpc {
        device_id: DeviceId,
        address: u8,
        rpc_id: u16,
        #[serde(default)]
        payload: String,
        timeout_ms: u64,
    },
    Subscribe {
        device_id: DeviceId,
        interface: String,
    },
    BroadcastMonitor {
        /// `"all"`, `"device:<hex>"`, or `"mask:<hex>"`.
        pattern: String,
    },
}

/// One server frame: a response to a request, or a pushed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Response {
        token: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    Event {
        event: String,
        args: serde_json::Value,
    },
}

impl ServerMessage {
    #[must_use]
    pub fn ok(token: u64, payload: serde_json::Value) -> Self {
        ServerMessage::Response {
            token,
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    #[must_use]
    pub fn fail(token: u64, err: &Error) -> Self {
        ServerMessage::Response {
            token,
            success: false,
            payload: None,
            error: Some(WireError::from(err)),
        }
    }

    #[must_use]
    pub fn event(event: impl Into<String>, args: serde_json::Value) -> Self {
        ServerMessage::Event {
            event: event.into(),
            args,
        }
    }
}

/// Error surfaced to a client: stable kind, message, structured details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<(String, String)>,
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            details: err
                .details()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

/// Side effects of a dispatched operation the transport must service.
pub enum Dispatched {
    /// Plain response payload.
    Value(serde_json::Value),
    /// The client subscribed; pump items from the handle as `report`/`trace`
    /// events.
    Subscription(SubscriberHandle),
    /// The client registered a broadcast monitor; pump `broadcast` events.
    Broadcast(BroadcastHandle),
}

/// Execute one operation against the manager on behalf of a session.
pub async fn dispatch(
    manager: &DeviceManager,
    sid: SessionId,
    op: Operation,
    cancel: &CancellationToken,
) -> Result<Dispatched> {
    match op {
        Operation::Scan { timeout_ms } => {
            let results = manager
                .scan(sid, Duration::from_millis(timeout_ms), cancel)
                .await?;
            Ok(Dispatched::Value(scan_results_json(&results)))
        }
        Operation::Connect { device_id } => {
            manager.connect(sid, device_id, cancel).await?;
            Ok(Dispatched::Value(serde_json::Value::Null))
        }
        Operation::Disconnect { device_id } => {
            manager.disconnect(sid, device_id).await?;
            Ok(Dispatched::Value(serde_json::Value::Null))
        }
        Operation::SendRpc {
            device_id,
            address,
            rpc_id,
            payload,
            timeout_ms,
        } => {
            let payload = hex::decode(&payload)
                .map_err(|e| Error::BadArgument(format!("rpc payload is not hex: {}", e)))?;
            let response = manager
                .send_rpc(
                    sid,
                    device_id,
                    address,
                    rpc_id,
                    &payload,
                    Duration::from_millis(timeout_ms),
                    cancel,
                )
                .await?;
            Ok(Dispatched::Value(rpc_response_json(&response)))
        }
        Operation::Subscribe {
            device_id,
            interface,
        } => {
            let iface = InterfaceKind::parse(&interface)?;
            let handle = manager.subscribe(sid, device_id, iface).await?;
            Ok(Dispatched::Subscription(handle))
        }
        Operation::BroadcastMonitor { pattern } => {
            let pattern = parse_broadcast_pattern(&pattern)?;
            let handle = manager.broadcast_monitor(sid, pattern)?;
            Ok(Dispatched::Broadcast(handle))
        }
    }
}

/// Parse the client-facing broadcast pattern syntax.
pub fn parse_broadcast_pattern(pattern: &str) -> Result<BroadcastPattern> {
    if pattern == "all" {
        return Ok(BroadcastPattern::All);
    }
    if let Some(hex_id) = pattern.strip_prefix("device:") {
        let device_id = DeviceId::from_str_radix(hex_id, 16)
            .map_err(|_| Error::BadArgument(format!("bad device id in pattern {:?}", pattern)))?;
        return Ok(BroadcastPattern::Device(device_id));
    }
    if let Some(hex_mask) = pattern.strip_prefix("mask:") {
        let mask = u16::from_str_radix(hex_mask, 16)
            .map_err(|_| Error::BadArgument(format!("bad stream mask in pattern {:?}", pattern)))?;
        return Ok(BroadcastPattern::StreamMask(mask));
    }
    Err(Error::BadArgument(format!(
        "pattern {:?} must be all, device:<hex>, or mask:<hex>",
        pattern
    )))
}

fn scan_results_json(results: &[MergedScanResult]) -> serde_json::Value {
    let now = Instant::now();
    let entries: Vec<serde_json::Value> = results
        .iter()
        .map(|result| {
            serde_json::json!({
                "device_id": result.device_id,
                "connection_string": result.connection_string,
                "signal_strength": result.signal_strength,
                "user_connected": result.user_connected,
                "pending_data": result.pending_data,
                "low_voltage": result.low_voltage,
                "expires_in_ms": result.expires.saturating_duration_since(now).as_millis() as u64,
                "adapters": result.adapters.iter().map(|candidate| {
                    serde_json::json!({
                        "adapter_index": candidate.adapter_index,
                        "signal_strength": candidate.signal_strength,
                        "connection_string": candidate.connection_string,
                    })
                }).collect::<Vec<_>>(),
            })
        })
        .collect();
    serde_json::Value::Array(entries)
}

fn rpc_response_json(response: &RpcResponse) -> serde_json::Value {
    serde_json::json!({
        "status": response.status,
        "payload": hex::encode(&response.payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frames_roundtrip() {
        let request = ClientRequest {
            token: 9,
            op: Operation::SendRpc {
                device_id: 1,
                address: 8,
                rpc_id: 4,
                payload: String::new(),
                timeout_ms: 1000,
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"op\":\"send_rpc\""));
        assert!(json.contains("\"token\":9"));

        let decoded: ClientRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.token, 9);
        assert!(matches!(decoded.op, Operation::SendRpc { rpc_id: 4, .. }));
    }

    #[test]
    fn response_frames_echo_token() {
        let ok = ServerMessage::ok(5, serde_json::json!({"x": 1}));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"token\":5"));
        assert!(json.contains("\"success\":true"));

        let fail = ServerMessage::fail(6, &Error::DeviceInUse(0x12));
        let json = serde_json::to_string(&fail).unwrap();
        assert!(json.contains("\"kind\":\"device_in_use\""));
        assert!(json.contains("\"token\":6"));
    }

    #[test]
    fn broadcast_pattern_syntax() {
        assert_eq!(parse_broadcast_pattern("all").unwrap(), BroadcastPattern::All);
        assert_eq!(
            parse_broadcast_pattern("device:1f").unwrap(),
            BroadcastPattern::Device(0x1f)
        );
        assert_eq!(
            parse_broadcast_pattern("mask:1000").unwrap(),
            BroadcastPattern::StreamMask(0x1000)
        );
        assert!(parse_broadcast_pattern("bogus").is_err());
        assert!(parse_broadcast_pattern("device:zz").is_err());
    }

    #[test]
    fn wire_error_carries_details() {
        let wire = WireError::from(&Error::DeviceInUse(0x34));
        assert_eq!(wire.kind, "device_in_use");
        assert_eq!(wire.details, vec![("device_id".to_string(), "0x34".to_string())]);
    }
}
