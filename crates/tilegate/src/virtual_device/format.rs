// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC argument/result format descriptors.
//!
//! Each RPC declares its argument and result encodings as a compact token
//! string, e.g. `"H6sBBBB"` = one u16, a 6-byte string, four u8s.
//!
//! Tokens:
//! - `B` - u8
//! - `H` - u16 little-endian
//! - `L` - u32 little-endian
//! - `<n>s` - fixed n-byte string
//! - trailing `V` - variable-length byte tail (at most once, last)
//!
//! The dispatcher uses descriptors to validate payload sizes on both the
//! argument and the result side; either payload is capped at the 20-byte RPC
//! limit.

use crate::errors::{Error, Result};
use crate::types::MAX_RPC_PAYLOAD;

/// One decoded RPC argument or result value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcValue {
    U8(u8),
    U16(u16),
    U32(u32),
    Bytes(Vec<u8>),
}

impl RpcValue {
    /// Convenience accessor for numeric values.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            RpcValue::U8(v) => Some(u32::from(*v)),
            RpcValue::U16(v) => Some(u32::from(*v)),
            RpcValue::U32(v) => Some(*v),
            RpcValue::Bytes(_) => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RpcValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    U8,
    U16,
    U32,
    Bytes(usize),
}

impl Token {
    fn size(self) -> usize {
        match self {
            Token::U8 => 1,
            Token::U16 => 2,
            Token::U32 => 4,
            Token::Bytes(n) => n,
        }
    }
}

/// A parsed format descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    tokens: Vec<Token>,
    variable_tail: bool,
}

impl FormatDescriptor {
    /// Parse a token string.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut variable_tail = false;
        let mut chars = spec.chars().peekable();
        let mut digits = String::new();

        while let Some(ch) = chars.next() {
            if variable_tail {
                return Err(Error::BadArgument(format!(
                    "format {:?}: V must be the final token",
                    spec
                )));
            }

            match ch {
                '0'..='9' => digits.push(ch),
                's' => {
                    let count: usize = digits.parse().map_err(|_| {
                        Error::BadArgument(format!("format {:?}: s needs a length prefix", spec))
                    })?;
                    digits.clear();
                    tokens.push(Token::Bytes(count));
                }
                'B' | 'H' | 'L' | 'V' if !digits.is_empty() => {
                    return Err(Error::BadArgument(format!(
                        "format {:?}: digits must be followed by s",
                        spec
                    )));
                }
                'B' => tokens.push(Token::U8),
                'H' => tokens.push(Token::U16),
                'L' => tokens.push(Token::U32),
                'V' => variable_tail = true,
                other => {
                    return Err(Error::BadArgument(format!(
                        "format {:?}: unknown token {:?}",
                        spec, other
                    )));
                }
            }
        }

        if !digits.is_empty() {
            return Err(Error::BadArgument(format!(
                "format {:?}: trailing digits without s",
                spec
            )));
        }

        let descriptor = Self {
            tokens,
            variable_tail,
        };

        if descriptor.fixed_size() > MAX_RPC_PAYLOAD {
            return Err(Error::BadArgument(format!(
                "format {:?}: fixed size {} exceeds the {}-byte rpc payload",
                spec,
                descriptor.fixed_size(),
                MAX_RPC_PAYLOAD
            )));
        }

        Ok(descriptor)
    }

    /// Bytes occupied by the fixed (non-`V`) portion.
    #[must_use]
    pub fn fixed_size(&self) -> usize {
        self.tokens.iter().map(|t| t.size()).sum()
    }

    /// Whether the descriptor is empty (no arguments / no result payload).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && !self.variable_tail
    }

    /// Pack values into a payload, validating counts, widths, and the
    /// 20-byte cap.
    pub fn pack(&self, values: &[RpcValue]) -> Result<Vec<u8>> {
        let expected = self.tokens.len() + usize::from(self.variable_tail);
        if values.len() != expected {
            return Err(Error::RpcInvalidArgs(format!(
                "expected {} values, got {}",
                expected,
                values.len()
            )));
        }

        let mut out = Vec::with_capacity(self.fixed_size());

        for (token, value) in self.tokens.iter().zip(values.iter()) {
            match (token, value) {
                (Token::U8, RpcValue::U8(v)) => out.push(*v),
                (Token::U16, RpcValue::U16(v)) => out.extend_from_slice(&v.to_le_bytes()),
                (Token::U32, RpcValue::U32(v)) => out.extend_from_slice(&v.to_le_bytes()),
                (Token::Bytes(n), RpcValue::Bytes(bytes)) => {
                    if bytes.len() != *n {
                        return Err(Error::RpcInvalidArgs(format!(
                            "expected {}-byte string, got {}",
                            n,
                            bytes.len()
                        )));
                    }
                    out.extend_from_slice(bytes);
                }
                (token, value) => {
                    return Err(Error::RpcInvalidArgs(format!(
                        "value {:?} does not match token {:?}",
                        value, token
                    )));
                }
            }
        }

        if self.variable_tail {
            let tail = values
                .last()
                .and_then(RpcValue::as_bytes)
                .ok_or_else(|| Error::RpcInvalidArgs("V token requires a bytes value".into()))?;
            out.extend_from_slice(tail);
        }

        if out.len() > MAX_RPC_PAYLOAD {
            return Err(Error::RpcInvalidArgs(format!(
                "packed payload {} exceeds {} bytes",
                out.len(),
                MAX_RPC_PAYLOAD
            )));
        }

        Ok(out)
    }

    /// Unpack a payload, validating its size against the descriptor.
    pub fn unpack(&self, payload: &[u8]) -> Result<Vec<RpcValue>> {
        let fixed = self.fixed_size();

        if self.variable_tail {
            if payload.len() < fixed {
                return Err(Error::RpcInvalidArgs(format!(
                    "payload {} shorter than fixed portion {}",
                    payload.len(),
                    fixed
                )));
            }
        } else if payload.len() != fixed {
            return Err(Error::RpcInvalidArgs(format!(
                "payload {} does not match declared size {}",
                payload.len(),
                fixed
            )));
        }

        let mut values = Vec::with_capacity(self.tokens.len() + 1);
        let mut offset = 0;

        for token in &self.tokens {
            match token {
                Token::U8 => {
                    values.push(RpcValue::U8(payload[offset]));
                    offset += 1;
                }
                Token::U16 => {
                    values.push(RpcValue::U16(u16::from_le_bytes([
                        payload[offset],
                        payload[offset + 1],
                    ])));
                    offset += 2;
                }
                Token::U32 => {
                    values.push(RpcValue::U32(u32::from_le_bytes([
                        payload[offset],
                        payload[offset + 1],
                        payload[offset + 2],
                        payload[offset + 3],
                    ])));
                    offset += 4;
                }
                Token::Bytes(n) => {
                    values.push(RpcValue::Bytes(payload[offset..offset + n].to_vec()));
                    offset += n;
                }
            }
        }

        if self.variable_tail {
            values.push(RpcValue::Bytes(payload[offset..].to_vec()));
        }

        Ok(values)
    }
}
