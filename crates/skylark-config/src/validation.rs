// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks constraints between values that serde attributes cannot express.

use crate::diagnostic::{ConfigError, LOG_LEVELS};
use crate::model::SkylarkConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every violation instead of failing on the first one.
pub fn validate_config(config: &SkylarkConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let level = config.runtime.log_level.trim().to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigError::log_level(&config.runtime.log_level));
    }

    if config.runtime.resource.trim().is_empty() {
        errors.push(ConfigError::Empty {
            key: "runtime.resource",
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Empty {
            key: "storage.database_path",
        });
    }

    let history = &config.history;
    if history.dedup_window_with_id_secs < history.dedup_window_secs {
        errors.push(ConfigError::WindowOrder {
            shorter: "history.dedup_window_secs",
            shorter_secs: history.dedup_window_secs,
            longer: "history.dedup_window_with_id_secs",
            longer_secs: history.dedup_window_with_id_secs,
            strict: false,
        });
    }

    if history.notification_capacity == 0 {
        errors.push(ConfigError::Zero {
            key: "history.notification_capacity",
        });
    }

    // A zero step only makes sense when every retry is immediate.
    if config.reconnect.step_secs == 0 && config.reconnect.max_delay_secs > 0 {
        errors.push(ConfigError::Zero {
            key: "reconnect.step_secs",
        });
    }

    let fetch = &config.fetch;
    if fetch.long_secs <= fetch.safety_margin_secs {
        errors.push(ConfigError::WindowOrder {
            shorter: "fetch.safety_margin_secs",
            shorter_secs: fetch.safety_margin_secs,
            longer: "fetch.long_secs",
            longer_secs: fetch.long_secs,
            strict: true,
        });
    }

    if fetch.short_secs > fetch.long_secs {
        errors.push(ConfigError::WindowOrder {
            shorter: "fetch.short_secs",
            shorter_secs: fetch.short_secs,
            longer: "fetch.long_secs",
            longer_secs: fetch.long_secs,
            strict: false,
        });
    }

    if config.sync.page_size == 0 {
        errors.push(ConfigError::Zero {
            key: "sync.page_size",
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
