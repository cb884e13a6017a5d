// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP gateway agent: one client connection = one session.
//!
//! Requests are `{op, args, token}` frames; responses echo the token.
//! Subscription data, broadcasts and session lifecycle notifications are
//! pushed as `{event, args}` frames interleaved with responses.  A client
//! dropping its connection closes its session and everything the session
//! owned.

use crate::connection::{FrameReader, FrameWriter};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tilegate::agent::{dispatch, Dispatched, GatewayAgent, ServerMessage};
use tilegate::errors::{Error, Result};
use tilegate::manager::{DeviceManager, SessionEvent, SessionHandle};
use tilegate::report::dispatch::StreamItem;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Gateway agent speaking length-prefixed JSON over TCP.
pub struct TcpAgent {
    bind: SocketAddr,
    max_message_size: usize,
    max_sessions: usize,
    cancel: CancellationToken,
}

impl TcpAgent {
    pub fn new(bind: SocketAddr, max_message_size: usize, max_sessions: usize) -> Self {
        Self {
            bind,
            max_message_size,
            max_sessions,
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl GatewayAgent for TcpAgent {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn start(&self, manager: Arc<DeviceManager>) -> Result<()> {
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|e| Error::TransportUnavailable(format!("bind {}: {}", self.bind, e)))?;
        let local = listener
            .local_addr()
            .map_err(|e| Error::TransportUnavailable(e.to_string()))?;
        info!("gateway agent listening on {}", local);

        let cancel = self.cancel.clone();
        let max_message_size = self.max_message_size;
        let max_sessions = self.max_sessions;

        tokio::spawn(async move {
            let live = Arc::new(tokio::sync::Semaphore::new(max_sessions));
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };

                match accepted {
                    Ok((stream, peer)) => {
                        let Ok(permit) = live.clone().try_acquire_owned() else {
                            warn!("rejecting {}: session limit reached", peer);
                            continue;
                        };

                        let manager = manager.clone();
                        let cancel = cancel.child_token();
                        tokio::spawn(async move {
                            let _permit = permit;
                            handle_client(stream, peer, manager, max_message_size, cancel).await;
                        });
                    }
                    Err(e) => {
                        error!("accept failed: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

/// Serve one client for the lifetime of its session.
async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    manager: Arc<DeviceManager>,
    max_message_size: usize,
    cancel: CancellationToken,
) {
    let SessionHandle { id: sid, events } = manager.session_open();
    info!("client {} connected as session {}", peer, sid);

    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, max_message_size);
    let mut writer = FrameWriter::new(write_half, max_message_size);

    // All outbound frames (responses and events) funnel through one queue so
    // writes never interleave.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(64);
    let writer_cancel = cancel.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = writer_cancel.cancelled() => break,
                message = out_rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            if let Err(e) = writer.write_message(&message).await {
                warn!("write to client failed: {}", e);
                break;
            }
        }
    });

    tokio::spawn(pump_session_events(events, out_tx.clone(), cancel.clone()));

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = reader.read_request() => request,
        };

        let request = match request {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                warn!("session {}: {}", sid, e);
                break;
            }
        };

        let token = request.token;
        match dispatch(&manager, sid, request.op, &cancel).await {
            Ok(Dispatched::Value(payload)) => {
                let _ = out_tx.send(ServerMessage::ok(token, payload)).await;
            }
            Ok(Dispatched::Subscription(handle)) => {
                tokio::spawn(pump_subscription(handle, out_tx.clone(), cancel.clone()));
                let _ = out_tx
                    .send(ServerMessage::ok(token, serde_json::Value::Null))
                    .await;
            }
            Ok(Dispatched::Broadcast(mut handle)) => {
                let events = out_tx.clone();
                let monitor_cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let event = tokio::select! {
                            _ = monitor_cancel.cancelled() => break,
                            event = handle.rx.recv() => match event {
                                Some(event) => event,
                                None => break,
                            },
                        };
                        let frame = ServerMessage::event(
                            "broadcast",
                            serde_json::json!({
                                "device_id": event.device_id,
                                "payload": hex::encode(event.report.encode()),
                            }),
                        );
                        if events.send(frame).await.is_err() {
                            break;
                        }
                    }
                });
                let _ = out_tx
                    .send(ServerMessage::ok(token, serde_json::Value::Null))
                    .await;
            }
            Err(err) => {
                let _ = out_tx.send(ServerMessage::fail(token, &err)).await;
            }
        }
    }

    // Any exit path releases everything the session owned.
    cancel.cancel();
    if let Err(err) = manager.session_close(sid).await {
        warn!("session {} close failed: {}", sid, err);
    }
    let _ = writer_task.await;
    info!("client {} (session {}) disconnected", peer, sid);
}

/// Forward subscription items as `report`/`trace` event frames.
async fn pump_subscription(
    mut handle: tilegate::report::dispatch::SubscriberHandle,
    out: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = handle.rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let frame = match item {
            StreamItem::Report {
                device_id,
                selector,
                report,
            } => ServerMessage::event(
                "report",
                serde_json::json!({
                    "device_id": device_id,
                    "selector": selector,
                    "payload": hex::encode(report.encode()),
                    "dropped": handle.dropped(),
                }),
            ),
            StreamItem::Trace { device_id, data } => ServerMessage::event(
                "trace",
                serde_json::json!({
                    "device_id": device_id,
                    "payload": hex::encode(&data[..]),
                }),
            ),
        };

        if out.send(frame).await.is_err() {
            break;
        }
    }
}

/// Forward session lifecycle notifications as event frames.
async fn pump_session_events(
    mut events: mpsc::Receiver<SessionEvent>,
    out: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let frame = match event {
            SessionEvent::DeviceDisconnected {
                device_id,
                reason,
                expected,
            } => ServerMessage::event(
                "disconnect",
                serde_json::json!({
                    "device_id": device_id,
                    "reason": reason,
                    "expected": expected,
                }),
            ),
            SessionEvent::Closed => ServerMessage::event("closed", serde_json::Value::Null),
        };

        if out.send(frame).await.is_err() {
            break;
        }
    }
}
