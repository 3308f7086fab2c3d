// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Account settings, platform trust and sync watermark seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::error::SkylarkError;
use crate::types::{AccountConfig, BareJid, LastError, PeerCertificate, ServerCertificate};

/// Read/write access to configured accounts.
pub trait AccountDirectory: Send + Sync {
    /// Every configured account, active or not.
    fn accounts(&self) -> Vec<BareJid>;

    fn config(&self, account: &BareJid) -> Option<AccountConfig>;

    fn password(&self, account: &BareJid) -> Option<SecretString>;

    /// Marks the account inactive so it is not logged in again.
    fn deactivate(&self, account: &BareJid) -> Result<(), SkylarkError>;

    /// Remembers the server certificate so the user can review and accept it.
    fn store_certificate(
        &self,
        account: &BareJid,
        certificate: ServerCertificate,
    ) -> Result<(), SkylarkError>;

    fn record_last_error(&self, account: &BareJid, error: LastError);
}

/// Platform trust evaluation of a certificate chain.
pub trait TrustEvaluator: Send + Sync {
    fn evaluate(&self, domain: &str, chain: &[PeerCertificate]) -> bool;
}

/// Source of the point in time up to which an account's history is synced.
#[async_trait]
pub trait SyncWatermark: Send + Sync {
    async fn last_synced(&self, account: &BareJid) -> Result<Option<DateTime<Utc>>, SkylarkError>;
}
