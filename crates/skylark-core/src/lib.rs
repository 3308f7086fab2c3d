// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Skylark messaging runtime.
//!
//! This crate provides the domain types, the closed set of protocol events,
//! the collaborator traits and the error type shared by every other crate in
//! the workspace.

pub mod error;
pub mod events;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::SkylarkError;
pub use events::{EventKind, MessageStanza, ProtocolEvent};
pub use types::{BareJid, EntryId, Jid, MessageState};

pub use traits::{
    AccountDirectory, CertificateCheck, ClientFactory, EventHandler, EventRegistry,
    ProtocolClient, SyncWatermark, TrustEvaluator,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuthFailure;

    #[test]
    fn error_display_is_readable() {
        let account = BareJid::new("me@example.org").unwrap();
        let err = SkylarkError::Authentication {
            account: account.clone(),
            reason: AuthFailure::NotAuthorized,
        };
        assert_eq!(
            err.to_string(),
            "authentication failed for me@example.org: not_authorized"
        );

        let err = SkylarkError::Certificate {
            account,
            message: "untrusted chain".into(),
        };
        assert!(err.to_string().contains("untrusted chain"));

        let err = SkylarkError::storage(std::io::Error::other("disk full"));
        assert_eq!(err.to_string(), "storage error: disk full");

        let err = SkylarkError::Timeout {
            duration: std::time::Duration::from_secs(5),
        };
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SkylarkError>();
    }

    #[test]
    fn traits_are_object_safe() {
        fn _client(_: &dyn ProtocolClient) {}
        fn _registry(_: &dyn EventRegistry) {}
        fn _handler(_: &dyn EventHandler) {}
        fn _factory(_: &dyn ClientFactory) {}
        fn _directory(_: &dyn AccountDirectory) {}
        fn _trust(_: &dyn TrustEvaluator) {}
        fn _watermark(_: &dyn SyncWatermark) {}
        fn _check(_: &dyn CertificateCheck) {}
    }
}
