// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server certificate validation and pinning.
//!
//! A chain is accepted when the platform trusts it for the account's domain.
//! Failing that, only an exact match of the leaf's SHA-1 fingerprint against
//! a certificate the user explicitly accepted for the account is trusted.

use std::sync::Arc;

use sha1::{Digest, Sha1};
use skylark_core::types::{PeerCertificate, ServerCertificate};
use skylark_core::{AccountDirectory, BareJid, CertificateCheck, TrustEvaluator};
use tracing::{debug, warn};

/// Lowercase hex SHA-1 of a DER certificate.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha1::digest(der))
}

/// Identity of a rejected chain: its leaf and, when present, the issuer.
///
/// Returns `None` for an empty chain.
pub fn describe_chain(chain: &[PeerCertificate]) -> Option<ServerCertificate> {
    let leaf = chain.first()?;
    let issuer = chain.get(1);
    Some(ServerCertificate {
        cert_name: leaf.subject.clone(),
        cert_hash_sha1: fingerprint(&leaf.der),
        issuer_name: issuer.map(|c| c.subject.clone()),
        issuer_hash_sha1: issuer.map(|c| fingerprint(&c.der)),
        accepted: false,
    })
}

/// Validates server chains for every account's client.
pub struct CertificateValidator {
    directory: Arc<dyn AccountDirectory>,
    trust: Arc<dyn TrustEvaluator>,
}

impl CertificateValidator {
    pub fn new(directory: Arc<dyn AccountDirectory>, trust: Arc<dyn TrustEvaluator>) -> Self {
        Self { directory, trust }
    }

    fn pinned(&self, account: &BareJid, leaf: &PeerCertificate) -> bool {
        let Some(stored) = self
            .directory
            .config(account)
            .and_then(|config| config.server_certificate)
        else {
            return false;
        };
        stored.accepted && stored.cert_hash_sha1.eq_ignore_ascii_case(&fingerprint(&leaf.der))
    }
}

impl CertificateCheck for CertificateValidator {
    fn accept(&self, account: &BareJid, chain: &[PeerCertificate]) -> bool {
        let Some(leaf) = chain.first() else {
            warn!(account = %account, "server presented an empty certificate chain");
            return false;
        };
        if self.trust.evaluate(account.domain(), chain) {
            return true;
        }
        let pinned = self.pinned(account, leaf);
        debug!(account = %account, pinned, "platform trust failed, checked pinned certificate");
        pinned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylark_core::types::AccountConfig;
    use skylark_test_utils::{InMemoryAccountDirectory, StaticTrust};

    fn cert(der: &[u8], subject: &str) -> PeerCertificate {
        PeerCertificate {
            der: der.to_vec(),
            subject: subject.to_string(),
        }
    }

    fn account() -> BareJid {
        BareJid::new("me@example.org").unwrap()
    }

    fn setup(trusted: bool, stored: Option<ServerCertificate>) -> CertificateValidator {
        let directory = InMemoryAccountDirectory::new();
        let mut config = AccountConfig::new(account());
        config.server_certificate = stored;
        directory.insert(config, "secret");
        CertificateValidator::new(Arc::new(directory), Arc::new(StaticTrust::new(trusted)))
    }

    #[test]
    fn fingerprint_is_lowercase_hex_sha1() {
        assert_eq!(fingerprint(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn platform_trust_accepts() {
        let validator = setup(true, None);
        assert!(validator.accept(&account(), &[cert(b"leaf", "example.org")]));
    }

    #[test]
    fn empty_chain_is_rejected_even_if_trusted() {
        let validator = setup(true, None);
        assert!(!validator.accept(&account(), &[]));
    }

    #[test]
    fn accepted_pin_matches_leaf_only() {
        let mut stored = describe_chain(&[cert(b"leaf", "example.org")]).unwrap();
        stored.accepted = true;
        let validator = setup(false, Some(stored));

        assert!(validator.accept(&account(), &[cert(b"leaf", "example.org"), cert(b"ca", "CA")]));
        // A pinned issuer does not vouch for a different leaf.
        assert!(!validator.accept(&account(), &[cert(b"other", "example.org"), cert(b"leaf", "x")]));
    }

    #[test]
    fn unaccepted_pin_is_ignored() {
        let stored = describe_chain(&[cert(b"leaf", "example.org")]).unwrap();
        let validator = setup(false, Some(stored));
        assert!(!validator.accept(&account(), &[cert(b"leaf", "example.org")]));
    }

    #[test]
    fn describe_chain_records_leaf_and_issuer() {
        let info = describe_chain(&[cert(b"leaf", "example.org"), cert(b"ca", "Example CA")]).unwrap();
        assert_eq!(info.cert_name, "example.org");
        assert_eq!(info.cert_hash_sha1, fingerprint(b"leaf"));
        assert_eq!(info.issuer_name.as_deref(), Some("Example CA"));
        assert_eq!(info.issuer_hash_sha1, Some(fingerprint(b"ca")));
        assert!(!info.accepted);
        assert_eq!(describe_chain(&[]), None);
    }
}
