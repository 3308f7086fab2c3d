// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Linear, capped reconnection backoff.

use std::time::Duration;

use skylark_config::model::ReconnectConfig;

/// `delay(n) = clamp((n - immediate_attempts) * step, 0, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub immediate_attempts: u32,
    pub step: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for BackoffPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            immediate_attempts: config.immediate_attempts,
            step: Duration::from_secs(config.step_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the login attempt following `retry` consecutive failures.
    pub fn delay(&self, retry: u32) -> Duration {
        let over = retry.saturating_sub(self.immediate_attempts);
        self.step.saturating_mul(over).min(self.max_delay)
    }
}
