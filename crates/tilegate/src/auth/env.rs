// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Auth provider backed by the `IOTILE_SIGNING_KEY` environment variable.

use super::{AuthProvider, KeyPurpose, KeyType};
use crate::errors::{Error, Result};
use crate::types::DeviceId;

/// Environment variable holding the hex-encoded 32-byte root key.
pub const SIGNING_KEY_ENV: &str = "IOTILE_SIGNING_KEY";

/// Provider that serves one root key from the process environment.
///
/// The key applies to every device and every keyed key type; deployments
/// needing per-device keys put a more specific provider ahead of this one in
/// the chain.
#[derive(Debug, Default)]
pub struct EnvAuthProvider;

impl EnvAuthProvider {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn read_key(&self) -> Result<Option<Vec<u8>>> {
        let hex_key = match std::env::var(SIGNING_KEY_ENV) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };

        let key = hex::decode(hex_key.trim()).map_err(|e| {
            Error::BadArgument(format!("{} is not valid hex: {}", SIGNING_KEY_ENV, e))
        })?;

        if key.len() != super::crypto::KEY_LEN {
            return Err(Error::BadArgument(format!(
                "{} must decode to {} bytes, got {}",
                SIGNING_KEY_ENV,
                super::crypto::KEY_LEN,
                key.len()
            )));
        }

        Ok(Some(key))
    }
}

impl AuthProvider for EnvAuthProvider {
    fn name(&self) -> &str {
        "env"
    }

    fn get_key(
        &self,
        _device_id: DeviceId,
        key_type: KeyType,
        _purpose: KeyPurpose,
    ) -> Result<Option<Vec<u8>>> {
        if key_type == KeyType::None {
            return Ok(None);
        }

        self.read_key()
    }
}
