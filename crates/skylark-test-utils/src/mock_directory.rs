// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory account directory, trust evaluator and sync watermark.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use skylark_core::types::{AccountConfig, LastError, PeerCertificate, ServerCertificate};
use skylark_core::{AccountDirectory, BareJid, SkylarkError, SyncWatermark, TrustEvaluator};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct StoredAccount {
    config: AccountConfig,
    password: Option<String>,
    last_error: Option<LastError>,
}

/// Accounts kept in memory, ordered by address.
#[derive(Default)]
pub struct InMemoryAccountDirectory {
    accounts: Mutex<BTreeMap<BareJid, StoredAccount>>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account.
    pub fn insert(&self, config: AccountConfig, password: &str) {
        lock(&self.accounts).insert(
            config.jid.clone(),
            StoredAccount {
                config,
                password: Some(password.to_string()),
                last_error: None,
            },
        );
    }

    /// Add an account with no stored password.
    pub fn insert_without_password(&self, config: AccountConfig) {
        lock(&self.accounts).insert(
            config.jid.clone(),
            StoredAccount {
                config,
                password: None,
                last_error: None,
            },
        );
    }

    pub fn set_active(&self, account: &BareJid, active: bool) {
        if let Some(stored) = lock(&self.accounts).get_mut(account) {
            stored.config.active = active;
        }
    }

    /// Mark the stored server certificate as accepted by the user.
    pub fn accept_certificate(&self, account: &BareJid) -> bool {
        let mut accounts = lock(&self.accounts);
        let Some(cert) = accounts
            .get_mut(account)
            .and_then(|stored| stored.config.server_certificate.as_mut())
        else {
            return false;
        };
        cert.accepted = true;
        true
    }

    pub fn last_error(&self, account: &BareJid) -> Option<LastError> {
        lock(&self.accounts).get(account).and_then(|s| s.last_error)
    }

    pub fn remove(&self, account: &BareJid) {
        lock(&self.accounts).remove(account);
    }
}

impl AccountDirectory for InMemoryAccountDirectory {
    fn accounts(&self) -> Vec<BareJid> {
        lock(&self.accounts).keys().cloned().collect()
    }

    fn config(&self, account: &BareJid) -> Option<AccountConfig> {
        lock(&self.accounts).get(account).map(|s| s.config.clone())
    }

    fn password(&self, account: &BareJid) -> Option<SecretString> {
        lock(&self.accounts)
            .get(account)
            .and_then(|s| s.password.clone())
            .map(SecretString::from)
    }

    fn deactivate(&self, account: &BareJid) -> Result<(), SkylarkError> {
        match lock(&self.accounts).get_mut(account) {
            Some(stored) => {
                stored.config.active = false;
                Ok(())
            }
            None => Err(SkylarkError::Internal(format!("unknown account {account}"))),
        }
    }

    fn store_certificate(
        &self,
        account: &BareJid,
        certificate: ServerCertificate,
    ) -> Result<(), SkylarkError> {
        match lock(&self.accounts).get_mut(account) {
            Some(stored) => {
                stored.config.server_certificate = Some(certificate);
                Ok(())
            }
            None => Err(SkylarkError::Internal(format!("unknown account {account}"))),
        }
    }

    fn record_last_error(&self, account: &BareJid, error: LastError) {
        if let Some(stored) = lock(&self.accounts).get_mut(account) {
            stored.last_error = Some(error);
        }
    }
}

/// Platform trust that always answers the same.
pub struct StaticTrust {
    trusted: bool,
}

impl StaticTrust {
    pub fn new(trusted: bool) -> Self {
        Self { trusted }
    }
}

impl TrustEvaluator for StaticTrust {
    fn evaluate(&self, _domain: &str, _chain: &[PeerCertificate]) -> bool {
        self.trusted
    }
}

/// Watermark values set by the test.
#[derive(Default)]
pub struct MockWatermark {
    values: Mutex<HashMap<BareJid, DateTime<Utc>>>,
}

impl MockWatermark {
    pub fn set(&self, account: &BareJid, at: DateTime<Utc>) {
        lock(&self.values).insert(account.clone(), at);
    }
}

#[async_trait]
impl SyncWatermark for MockWatermark {
    async fn last_synced(&self, account: &BareJid) -> Result<Option<DateTime<Utc>>, SkylarkError> {
        Ok(lock(&self.values).get(account).copied())
    }
}
