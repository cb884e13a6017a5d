// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retry wheel dispatching on error kinds.
//!
//! Transient conditions are retried with fixed budgets; everything else
//! surfaces unchanged.  `Timeout` is never retried.
//!
//! Budgets:
//! - `TileBusy` on an RPC: 4 retries, 10 ms gap.
//! - Early disconnect on connect: 5 attempts total (the observed failure
//!   rate of BLE-style links is 1-2 %, so 5 attempts makes a spurious
//!   failure vanishingly rare).

use crate::errors::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Extra attempts after the first when a tile reports busy.
pub const BUSY_RETRY_LIMIT: usize = 4;
/// Gap between busy retries.
pub const BUSY_RETRY_GAP: Duration = Duration::from_millis(10);
/// Total connect attempts when the link drops right after connecting.
pub const EARLY_DISCONNECT_ATTEMPTS: usize = 5;

/// Run an RPC operation, retrying `TileBusy` responses.
pub async fn with_busy_retry<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(Error::TileBusy) if attempt < BUSY_RETRY_LIMIT => {
                attempt += 1;
                log::debug!("[retry] tile busy, retry {}/{}", attempt, BUSY_RETRY_LIMIT);
                sleep(BUSY_RETRY_GAP).await;
            }
            other => return other,
        }
    }
}

/// Run a connect operation, retrying early disconnects.
pub async fn with_early_disconnect_retry<T, F, Fut>(mut op: F, attempts: usize) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Err(Error::EarlyDisconnect) if attempt < attempts => {
                log::debug!(
                    "[retry] early disconnect on connect, attempt {}/{}",
                    attempt,
                    attempts
                );
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn busy_retries_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = with_busy_retry(move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::TileBusy)
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn busy_budget_exhausts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<()> = with_busy_retry(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::TileBusy)
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), Error::TileBusy);
        // Initial attempt plus four retries.
        assert_eq!(calls.load(Ordering::SeqCst), 1 + BUSY_RETRY_LIMIT);
    }

    #[tokio::test]
    async fn timeout_is_never_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<()> = with_busy_retry(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Timeout)
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), Error::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn early_disconnect_succeeds_on_fourth_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = with_early_disconnect_retry(
            move || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(Error::EarlyDisconnect)
                    } else {
                        Ok(())
                    }
                }
            },
            EARLY_DISCONNECT_ATTEMPTS,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn early_disconnect_budget_exhausts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<()> = with_early_disconnect_retry(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::EarlyDisconnect)
                }
            },
            EARLY_DISCONNECT_ATTEMPTS,
        )
        .await;

        assert_eq!(result.unwrap_err(), Error::EarlyDisconnect);
        assert_eq!(calls.load(Ordering::SeqCst), EARLY_DISCONNECT_ATTEMPTS);
    }

    #[tokio::test]
    async fn non_transient_connect_errors_surface_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<()> = with_early_disconnect_retry(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::DeviceNotFound("device/5".into()))
                }
            },
            EARLY_DISCONNECT_ATTEMPTS,
        )
        .await;

        assert_eq!(result.unwrap_err().kind(), "device_not_found");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
