// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracing subscriber setup for the command-line tools.

use tracing_subscriber::EnvFilter;

/// The filter used when `RUST_LOG` is not set.
pub fn default_directive(log_level: &str) -> String {
    format!("skylark={log_level},warn")
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides `log_level`.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    // A subscriber may already be installed (tests); keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_scopes_level_to_skylark() {
        assert_eq!(default_directive("debug"), "skylark=debug,warn");
        assert!(EnvFilter::try_new(default_directive("info")).is_ok());
    }
}
