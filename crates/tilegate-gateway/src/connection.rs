// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framed client connections: 4-byte big-endian length prefix + JSON body.

use tilegate::agent::{ClientRequest, ServerMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Reading side of one client connection.
pub struct FrameReader {
    stream: OwnedReadHalf,
    max_message_size: usize,
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new(stream: OwnedReadHalf, max_message_size: usize) -> Self {
        Self {
            stream,
            max_message_size,
            buffer: Vec::with_capacity(4096),
        }
    }

    /// Read one request frame.
    ///
    /// Returns `Ok(None)` on a clean close.
    pub async fn read_request(&mut self) -> Result<Option<ClientRequest>, String> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(format!("read error: {}", e)),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Err("empty frame".to_string());
        }
        if len > self.max_message_size {
            return Err(format!(
                "frame too large: {} > {}",
                len, self.max_message_size
            ));
        }

        self.buffer.clear();
        self.buffer.resize(len, 0);
        self.stream
            .read_exact(&mut self.buffer)
            .await
            .map_err(|e| format!("read error: {}", e))?;

        let request: ClientRequest = serde_json::from_slice(&self.buffer)
            .map_err(|e| format!("invalid request frame: {}", e))?;
        Ok(Some(request))
    }
}

/// Writing side of one client connection.
pub struct FrameWriter {
    stream: OwnedWriteHalf,
    max_message_size: usize,
}

impl FrameWriter {
    pub fn new(stream: OwnedWriteHalf, max_message_size: usize) -> Self {
        Self {
            stream,
            max_message_size,
        }
    }

    /// Write one server frame.
    pub async fn write_message(&mut self, message: &ServerMessage) -> Result<(), String> {
        let json = serde_json::to_vec(message).map_err(|e| format!("serialize error: {}", e))?;
        if json.len() > self.max_message_size {
            return Err(format!(
                "frame too large: {} > {}",
                json.len(),
                self.max_message_size
            ));
        }

        let len = (json.len() as u32).to_be_bytes();
        self.stream
            .write_all(&len)
            .await
            .map_err(|e| format!("write error: {}", e))?;
        self.stream
            .write_all(&json)
            .await
            .map_err(|e| format!("write error: {}", e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| format!("write error: {}", e))?;
        Ok(())
    }
}
