// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session supervision settings derived from [`SkylarkConfig`].

use std::time::Duration;

use skylark_config::SkylarkConfig;

use crate::backoff::BackoffPolicy;
use crate::fetch::FetchDeadlines;

/// Archive sync policy applied after every fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub automatic: bool,
    /// How far back to sync when nothing is stored for the account.
    pub period: Duration,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub resource: String,
    pub backoff: BackoffPolicy,
    pub fetch: FetchDeadlines,
    pub sync: SyncPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SkylarkConfig::default())
    }
}

impl From<&SkylarkConfig> for SessionConfig {
    fn from(config: &SkylarkConfig) -> Self {
        Self {
            resource: config.runtime.resource.clone(),
            backoff: BackoffPolicy::from(&config.reconnect),
            fetch: FetchDeadlines::from(&config.fetch),
            sync: SyncPolicy {
                automatic: config.sync.automatic,
                period: config.sync.period(),
                page_size: config.sync.page_size,
            },
        }
    }
}
