// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Skylark messaging runtime.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Skylark configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SkylarkConfig {
    /// Process-wide settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// History database settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// History store behaviour.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Reconnection backoff policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Background fetch windows.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Message archive synchronization.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Process-wide runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Resource name sessions bind to.
    #[serde(default = "default_resource")]
    pub resource: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            resource: default_resource(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_resource() -> String {
    "skylark".to_string()
}

/// History database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite history database.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL journal mode. Required for reads to run alongside writes.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("skylark").join("history.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("history.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_true() -> bool {
    true
}

/// History store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    /// Half-width of the duplicate search window for entries without a stanza id.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Half-width of the duplicate search window for entries with a stanza id.
    #[serde(default = "default_dedup_window_with_id_secs")]
    pub dedup_window_with_id_secs: u64,

    /// Buffered notifications per subscriber before it starts lagging.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            dedup_window_with_id_secs: default_dedup_window_with_id_secs(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl HistoryConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn dedup_window_with_id(&self) -> Duration {
        Duration::from_secs(self.dedup_window_with_id_secs)
    }
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_dedup_window_with_id_secs() -> u64 {
    3600
}

fn default_notification_capacity() -> usize {
    256
}

/// Reconnection backoff configuration.
///
/// The delay before attempt `n` is `min((n - immediate_attempts) * step, max_delay)`,
/// never negative.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Retries that reconnect without waiting.
    #[serde(default = "default_immediate_attempts")]
    pub immediate_attempts: u32,

    /// Linear delay increment per retry after the immediate ones.
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,

    /// Upper bound for the reconnect delay.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            immediate_attempts: default_immediate_attempts(),
            step_secs: default_step_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

fn default_immediate_attempts() -> u32 {
    2
}

fn default_step_secs() -> u64 {
    5
}

fn default_max_delay_secs() -> u64 {
    30
}

/// Background fetch window configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    /// Window when every target session is already connected.
    #[serde(default = "default_short_secs")]
    pub short_secs: u64,

    /// Window when some target session has to reconnect first.
    #[serde(default = "default_long_secs")]
    pub long_secs: u64,

    /// Time kept in reserve at the end of the long window.
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,

    /// Wait after the last awaited session connects.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            short_secs: default_short_secs(),
            long_secs: default_long_secs(),
            safety_margin_secs: default_safety_margin_secs(),
            grace_secs: default_grace_secs(),
        }
    }
}

fn default_short_secs() -> u64 {
    5
}

fn default_long_secs() -> u64 {
    20
}

fn default_safety_margin_secs() -> u64 {
    4
}

fn default_grace_secs() -> u64 {
    2
}

/// Message archive synchronization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Sync the archive automatically after every fresh session.
    #[serde(default = "default_true")]
    pub automatic: bool,

    /// How far back to sync when no history is stored yet.
    #[serde(default = "default_period_hours")]
    pub period_hours: u64,

    /// Messages requested per archive page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            automatic: true,
            period_hours: default_period_hours(),
            page_size: default_page_size(),
        }
    }
}

impl SyncConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_hours * 3600)
    }
}

fn default_period_hours() -> u64 {
    72
}

fn default_page_size() -> u32 {
    100
}
