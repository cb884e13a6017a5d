// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for all gateway operations.
//!
//! Every fallible operation in this crate returns [`Error`], a single enum
//! grouped by the layer that produces the condition.  Each variant carries a
//! stable kind identifier (see [`Error::kind`]) that survives refactors and
//! is safe to match on from external tooling, plus a human-readable message
//! and an optional structured detail map.
//!
//! Retry decisions are made by dispatching on [`Error::kind`] rather than by
//! catching and re-raising: see `adapter::retry`.

use std::fmt;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by gateway operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The requested device has not been seen by any adapter.
    DeviceNotFound(String),
    /// Another session already holds the only allowed connection to the device.
    DeviceInUse(u64),
    /// The connection dropped while an operation was in flight.
    Disconnected(String),
    /// The transport backend is unavailable or failed at the link layer.
    TransportUnavailable(String),
    /// The transport dropped the link immediately after connecting.
    ///
    /// Some physical transports fail this way at a low background rate and
    /// the connect path retries it silently.
    EarlyDisconnect,
    /// A suspending operation reached its deadline.
    Timeout,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The tile does not implement the requested RPC id.
    RpcNotFound { address: u8, rpc_id: u16 },
    /// The RPC argument payload did not match the declared format.
    RpcInvalidArgs(String),
    /// The tile returned a response that does not match the declared format.
    RpcInvalidResponse(String),
    /// No tile is present at the addressed slot.
    TileNotFound(u8),
    /// The tile is busy; the caller may retry.
    TileBusy,
    /// An asynchronous RPC is already pending on this connection.
    AsyncRpcInFlight,

    // ========================================================================
    // Report Errors
    // ========================================================================
    /// The report signature did not verify against the resolved key.
    SignatureInvalid,
    /// The encrypted reading region could not be decrypted.
    DecryptionFailed(String),
    /// The report framing or header contents are inconsistent.
    MalformedReport(String),
    /// The declared report length exceeds the assembly buffer bound.
    ReportTooLarge { declared: usize, limit: usize },
    /// No auth provider in the chain could produce the requested key.
    KeyUnavailable { device_id: u64, key_type: u8 },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The operation requires an open connection to the device.
    NotConnected(u64),
    /// The operation requires an interface that has not been opened.
    InterfaceNotOpen(&'static str),
    /// Opening this interface conflicts with one already open.
    InterfaceConflict { requested: &'static str, open: &'static str },
    /// The caller abandoned the wait via its cancellation signal.
    Cancelled,
    /// The session id is unknown or already closed.
    SessionClosed(u32),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// No adapter factory is registered under this name.
    UnknownAdapter(String),
    /// No agent factory is registered under this name.
    UnknownAgent(String),
    /// A configuration value is missing or malformed.
    BadArgument(String),
}

impl Error {
    /// Stable kind identifier for this error.
    ///
    /// The identifier never changes once released; it is the value external
    /// clients and the retry wheel dispatch on.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::DeviceNotFound(_) => "device_not_found",
            Error::DeviceInUse(_) => "device_in_use",
            Error::Disconnected(_) => "disconnected",
            Error::TransportUnavailable(_) => "transport_unavailable",
            Error::EarlyDisconnect => "early_disconnect",
            Error::Timeout => "timeout",
            Error::RpcNotFound { .. } => "rpc_not_found",
            Error::RpcInvalidArgs(_) => "rpc_invalid_args",
            Error::RpcInvalidResponse(_) => "rpc_invalid_response",
            Error::TileNotFound(_) => "tile_not_found",
            Error::TileBusy => "tile_busy",
            Error::AsyncRpcInFlight => "async_rpc_in_flight",
            Error::SignatureInvalid => "signature_invalid",
            Error::DecryptionFailed(_) => "decryption_failed",
            Error::MalformedReport(_) => "malformed_report",
            Error::ReportTooLarge { .. } => "report_too_large",
            Error::KeyUnavailable { .. } => "key_unavailable",
            Error::NotConnected(_) => "not_connected",
            Error::InterfaceNotOpen(_) => "interface_not_open",
            Error::InterfaceConflict { .. } => "interface_conflict",
            Error::Cancelled => "cancelled",
            Error::SessionClosed(_) => "session_closed",
            Error::UnknownAdapter(_) => "unknown_adapter",
            Error::UnknownAgent(_) => "unknown_agent",
            Error::BadArgument(_) => "bad_argument",
        }
    }

    /// Whether the connect path may silently retry this condition.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TileBusy | Error::EarlyDisconnect | Error::Disconnected(_)
        )
    }

    /// Structured detail pairs for operator-facing log records.
    ///
    /// Keys are stable; values are rendered as strings.
    #[must_use]
    pub fn details(&self) -> Vec<(&'static str, String)> {
        match self {
            Error::DeviceInUse(uuid) => vec![("device_id", format!("{:#x}", uuid))],
            Error::RpcNotFound { address, rpc_id } => vec![
                ("address", address.to_string()),
                ("rpc_id", format!("{:#06x}", rpc_id)),
            ],
            Error::TileNotFound(address) => vec![("address", address.to_string())],
            Error::ReportTooLarge { declared, limit } => vec![
                ("declared", declared.to_string()),
                ("limit", limit.to_string()),
            ],
            Error::KeyUnavailable {
                device_id,
                key_type,
            } => vec![
                ("device_id", format!("{:#x}", device_id)),
                ("key_type", key_type.to_string()),
            ],
            Error::NotConnected(uuid) => vec![("device_id", format!("{:#x}", uuid))],
            Error::SessionClosed(sid) => vec![("session_id", sid.to_string())],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Transport
            Error::DeviceNotFound(conn) => write!(f, "device not found: {}", conn),
            Error::DeviceInUse(uuid) => {
                write!(f, "device {:#x} is connected to another session", uuid)
            }
            Error::Disconnected(reason) => write!(f, "connection lost: {}", reason),
            Error::TransportUnavailable(msg) => write!(f, "transport unavailable: {}", msg),
            Error::EarlyDisconnect => write!(f, "transport disconnected immediately after connect"),
            Error::Timeout => write!(f, "operation timed out"),
            // Protocol
            Error::RpcNotFound { address, rpc_id } => {
                write!(f, "rpc {}:{:#06x} not found", address, rpc_id)
            }
            Error::RpcInvalidArgs(msg) => write!(f, "invalid rpc arguments: {}", msg),
            Error::RpcInvalidResponse(msg) => write!(f, "invalid rpc response: {}", msg),
            Error::TileNotFound(address) => write!(f, "tile {} not found", address),
            Error::TileBusy => write!(f, "tile busy"),
            Error::AsyncRpcInFlight => write!(f, "asynchronous rpc already in flight"),
            // Report
            Error::SignatureInvalid => write!(f, "report signature invalid"),
            Error::DecryptionFailed(msg) => write!(f, "report decryption failed: {}", msg),
            Error::MalformedReport(msg) => write!(f, "malformed report: {}", msg),
            Error::ReportTooLarge { declared, limit } => {
                write!(f, "report too large: {} > {}", declared, limit)
            }
            Error::KeyUnavailable {
                device_id,
                key_type,
            } => write!(
                f,
                "no key of type {} available for device {:#x}",
                key_type, device_id
            ),
            // Session
            Error::NotConnected(uuid) => write!(f, "not connected to device {:#x}", uuid),
            Error::InterfaceNotOpen(iface) => write!(f, "interface {} is not open", iface),
            Error::InterfaceConflict { requested, open } => {
                write!(f, "cannot open {} while {} is open", requested, open)
            }
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::SessionClosed(sid) => write!(f, "session {} is closed", sid),
            // Configuration
            Error::UnknownAdapter(name) => write!(f, "unknown adapter: {}", name),
            Error::UnknownAgent(name) => write!(f, "unknown agent: {}", name),
            Error::BadArgument(msg) => write!(f, "bad argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_and_unique_per_variant() {
        let errors = [
            Error::DeviceNotFound("device/5".into()),
            Error::DeviceInUse(5),
            Error::Timeout,
            Error::TileBusy,
            Error::SignatureInvalid,
            Error::Cancelled,
            Error::UnknownAdapter("ble".into()),
        ];

        let kinds: Vec<&str> = errors.iter().map(Error::kind).collect();
        let mut deduped = kinds.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), kinds.len());
    }

    #[test]
    fn transient_classification() {
        assert!(Error::TileBusy.is_transient());
        assert!(Error::EarlyDisconnect.is_transient());
        assert!(Error::Disconnected("link reset".into()).is_transient());
        assert!(!Error::Timeout.is_transient());
        assert!(!Error::RpcNotFound { address: 8, rpc_id: 4 }.is_transient());
    }

    #[test]
    fn details_render_hex_ids() {
        let err = Error::DeviceInUse(0x1234);
        let details = err.details();
        assert_eq!(details, vec![("device_id", "0x1234".to_string())]);
    }
}
