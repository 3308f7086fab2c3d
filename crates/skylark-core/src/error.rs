// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Skylark messaging runtime.

use std::time::Duration;

use thiserror::Error;

use crate::types::{AuthFailure, BareJid};

/// The primary error type used across Skylark crates and collaborator traits.
#[derive(Debug, Error)]
pub enum SkylarkError {
    /// Configuration errors (invalid TOML, missing required fields, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Persistence failures. The failed operation left no partial writes behind.
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Transient transport failures reported by the protocol client.
    #[error("connection error: {message}")]
    Connection {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The server rejected the account's credentials.
    #[error("authentication failed for {account}: {reason}")]
    Authentication { account: BareJid, reason: AuthFailure },

    /// The server certificate chain was not trusted.
    #[error("certificate rejected for {account}: {message}")]
    Certificate { account: BareJid, message: String },

    /// A string could not be parsed as a messaging address.
    #[error("invalid address `{0}`")]
    InvalidAddress(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SkylarkError {
    /// Wrap any error as a storage failure.
    pub fn storage(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        SkylarkError::Storage {
            source: source.into(),
        }
    }

    /// Build a connection error without an underlying cause.
    pub fn connection(message: impl Into<String>) -> Self {
        SkylarkError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Whether a failed login with this error should leave the account
    /// inactive rather than be retried.
    pub fn is_account_fatal(&self) -> bool {
        matches!(
            self,
            SkylarkError::Authentication { .. } | SkylarkError::Certificate { .. }
        )
    }
}
