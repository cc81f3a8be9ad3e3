// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry policy for provider operations.
//!
//! A transient provider error (reset, broken pipe, stale handle) gets a
//! bounded number of reconnect-and-retry rounds. The default policy is a
//! single retry with no delay between the reconnect and the retry.
//!
//! # Example
//!
//! ```
//! use mirror_store::RetryConfig;
//! use std::time::Duration;
//!
//! // Inline: one reconnect-and-retry, then give up on the provider
//! let inline = RetryConfig::inline();
//! assert_eq!(inline.max_retries, 1);
//! assert_eq!(inline.delay_for(0), Duration::ZERO);
//!
//! // Startup: a few attempts with backoff while opening connections
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, 2);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for connection/operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::inline()`] - One immediate retry after reconnecting
/// - [`RetryConfig::startup()`] - Short backoff while opening providers
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first failed attempt.
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::inline()
    }
}

impl RetryConfig {
    /// A single immediate retry. Anything that still fails is treated as a
    /// durable failure of that provider.
    #[must_use]
    pub fn inline() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Initial provider connection at startup.
    /// 3 attempts, failing after well under a second.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[must_use]
    pub fn test() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: usize) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        self.initial_delay
            .mul_f64(self.factor.max(1.0).powi(exp))
            .min(self.max_delay.max(self.initial_delay))
    }
}

/// Run `operation` until it succeeds or the retries are used up.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if retries > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, retries);
                }
                return Ok(val);
            }
            Err(err) => {
                if retries >= config.max_retries {
                    return Err(err);
                }
                let delay = config.delay_for(retries);
                retries += 1;
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, retries, config.max_retries + 1, err, delay
                );
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
        }
    }
}
