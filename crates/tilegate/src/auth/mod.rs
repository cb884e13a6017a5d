// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key resolution for report signing, verification and encryption.
//!
//! The gateway defines *where* keys come from, never *policy*: an
//! [`AuthProvider`] resolves a key for `(device_id, key_type, purpose)` or
//! declines, and providers compose into an [`AuthChain`] where the first
//! provider to return a key wins.  A report whose key no provider can
//! resolve is still delivered, marked unauthenticated, for subscribers to
//! reject by policy.

pub mod crypto;
mod env;

pub use env::EnvAuthProvider;

use crate::errors::{Error, Result};
use crate::types::DeviceId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Root key class a report is signed with, carried in the report flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// No key: the signature is an integrity-only hash.
    None,
    Device,
    User,
    Broadcast,
}

impl KeyType {
    /// Two-bit wire encoding used in the report flags.
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            KeyType::None => 0,
            KeyType::Device => 1,
            KeyType::User => 2,
            KeyType::Broadcast => 3,
        }
    }

    /// Decode the two-bit wire encoding.
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => KeyType::None,
            1 => KeyType::Device,
            2 => KeyType::User,
            _ => KeyType::Broadcast,
        }
    }
}

/// What the requested key will be used for.
///
/// Providers may refuse certain purposes (a verify-only provider never hands
/// out signing keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    Sign,
    Verify,
    Encrypt,
    Decrypt,
}

/// A source of root keys.
pub trait AuthProvider: Send + Sync {
    /// Provider name for log records.
    fn name(&self) -> &str;

    /// Resolve a key, or decline with `Ok(None)`.
    ///
    /// Errors are reserved for provider-internal failures (e.g. a malformed
    /// key in the environment); declining is not an error.
    fn get_key(
        &self,
        device_id: DeviceId,
        key_type: KeyType,
        purpose: KeyPurpose,
    ) -> Result<Option<Vec<u8>>>;
}

/// Ordered chain of providers; the first to return a key wins.
#[derive(Clone, Default)]
pub struct AuthChain {
    providers: Vec<Arc<dyn AuthProvider>>,
}

impl AuthChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// The default chain: environment-provided signing key only.
    #[must_use]
    pub fn standard() -> Self {
        let mut chain = Self::new();
        chain.push(Arc::new(EnvAuthProvider::new()));
        chain
    }

    pub fn push(&mut self, provider: Arc<dyn AuthProvider>) {
        self.providers.push(provider);
    }

    /// Resolve a key through the chain.
    pub fn get_key(
        &self,
        device_id: DeviceId,
        key_type: KeyType,
        purpose: KeyPurpose,
    ) -> Result<Option<Vec<u8>>> {
        for provider in &self.providers {
            match provider.get_key(device_id, key_type, purpose)? {
                Some(key) => {
                    log::debug!(
                        "[auth] provider '{}' resolved {:?} key for device {:#x}",
                        provider.name(),
                        key_type,
                        device_id
                    );
                    return Ok(Some(key));
                }
                None => continue,
            }
        }
        Ok(None)
    }

    /// Resolve a key, failing with `KeyUnavailable` when no provider has one.
    pub fn require_key(
        &self,
        device_id: DeviceId,
        key_type: KeyType,
        purpose: KeyPurpose,
    ) -> Result<Vec<u8>> {
        self.get_key(device_id, key_type, purpose)?
            .ok_or(Error::KeyUnavailable {
                device_id,
                key_type: key_type.bits(),
            })
    }
}

/// In-memory provider with explicitly installed keys.
///
/// Used by tests and by hosts that provision keys programmatically.
#[derive(Default)]
pub struct MemoryAuthProvider {
    keys: RwLock<HashMap<(DeviceId, KeyType), Vec<u8>>>,
}

impl MemoryAuthProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, device_id: DeviceId, key_type: KeyType, key: Vec<u8>) {
        self.keys.write().insert((device_id, key_type), key);
    }
}

impl AuthProvider for MemoryAuthProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn get_key(
        &self,
        device_id: DeviceId,
        key_type: KeyType,
        _purpose: KeyPurpose,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.keys.read().get(&(device_id, key_type)).cloned())
    }
}
