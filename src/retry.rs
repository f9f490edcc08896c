// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff for cache-adapter connections.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for connection retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::startup()
    }
}

impl RetryConfig {
    /// Fast-fail retry for initial connections: five attempts with
    /// exponential backoff, so configuration errors surface quickly.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Quick retry for individual operations; if it still fails, let the
    /// caller handle it.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Minimal delays for tests.
    #[cfg(test)]
    pub(crate) fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

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
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(value);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= config.max_retries {
                    return Err(err);
                }
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, config.max_retries, err, delay
                );
                sleep(delay).await;
                delay = delay.mul_f64(config.factor).min(config.max_delay);
            }
        }
    }
}
