// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol client seam and its typed event registry.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SkylarkError;
use crate::events::{EventKind, ProtocolEvent};
use crate::types::{
    ArchivePage, ArchiveQuery, BareJid, ClientSettings, ConnectionState, PeerCertificate,
};

/// Receives events a protocol client emits for the kinds it registered for.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: &ProtocolEvent);
}

/// Per-client registry of event handlers.
///
/// Handlers are identified by their `Arc` allocation, so unregistering must
/// pass the same `Arc` that was registered.
pub trait EventRegistry: Send + Sync {
    fn register(&self, handler: Arc<dyn EventHandler>, kinds: &[EventKind]);

    fn unregister(&self, handler: &Arc<dyn EventHandler>, kinds: &[EventKind]);
}

/// One stateful protocol session for one account.
#[async_trait]
pub trait ProtocolClient: Send + Sync + 'static {
    /// The account this client logs in as.
    fn account(&self) -> &BareJid;

    fn state(&self) -> ConnectionState;

    /// Whether push notifications are enabled for this session.
    fn push_enabled(&self) -> bool;

    /// Applies credentials and connection settings before the next login.
    fn configure(&self, settings: ClientSettings);

    /// Starts connecting. Outcome is reported through events.
    async fn login(&self) -> Result<(), SkylarkError>;

    /// Closes the stream. `force` drops the socket without a closing handshake.
    async fn disconnect(&self, force: bool);

    /// Sends a whitespace keepalive.
    async fn keepalive(&self);

    /// Requests a stream-management ack. Returns `false` when stream
    /// management was not negotiated for this session.
    async fn send_ack(&self) -> bool;

    /// Switches client-state indication and mobile optimizations.
    async fn set_foreground(&self, foreground: bool);

    /// Requests one page of the message archive. Archived messages arrive as
    /// events before the page result is returned.
    async fn query_archive(&self, query: ArchiveQuery) -> Result<ArchivePage, SkylarkError>;

    fn event_registry(&self) -> Arc<dyn EventRegistry>;
}

/// Decides whether a server certificate chain is acceptable for an account.
pub trait CertificateCheck: Send + Sync {
    fn accept(&self, account: &BareJid, chain: &[PeerCertificate]) -> bool;
}

/// Builds protocol clients for accounts.
pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        account: &BareJid,
        settings: ClientSettings,
        certificates: Arc<dyn CertificateCheck>,
    ) -> Result<Arc<dyn ProtocolClient>, SkylarkError>;
}
