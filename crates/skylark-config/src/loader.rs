// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./skylark.toml` > `~/.config/skylark/skylark.toml` > `/etc/skylark/skylark.toml`
//! with environment variable overrides via `SKYLARK_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::SkylarkConfig;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/skylark/skylark.toml";

/// Configuration file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "skylark.toml";

/// Sections recognized in `SKYLARK_<SECTION>_<KEY>` variables.
const ENV_SECTIONS: [&str; 6] = ["runtime", "storage", "history", "reconnect", "fetch", "sync"];

/// The per-user configuration file under the XDG config directory.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("skylark").join(LOCAL_CONFIG_FILE))
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/skylark/skylark.toml` (system-wide)
/// 3. `~/.config/skylark/skylark.toml` (user XDG config)
/// 4. `./skylark.toml` (local directory)
/// 5. `SKYLARK_*` environment variables
pub fn load_config() -> Result<SkylarkConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<SkylarkConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SkylarkConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<SkylarkConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SkylarkConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
///
/// Returns the Figment before extraction so callers can inspect metadata.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(SkylarkConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

/// Map `SKYLARK_FETCH_LONG_SECS` to `fetch.long_secs`.
///
/// Only the first underscore after a known section name becomes a dot, so
/// keys that contain underscores stay intact.
pub fn env_key_to_path(key: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

fn env_provider() -> Env {
    Env::prefixed("SKYLARK_").map(|key| env_key_to_path(key.as_str()).into())
}
