// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session supervision for the Skylark messaging runtime.
//!
//! The [`ConnectionSupervisor`] owns one protocol session per active account
//! and keeps it alive:
//! - reconnects with linear backoff after disconnects
//! - deactivates accounts on authentication or certificate failures
//! - replays the message archive after every fresh session
//! - follows network availability and foreground/background transitions
//! - coordinates short background fetch windows granted by the host

pub mod archive;
pub mod backoff;
pub mod certificate;
pub mod config;
pub mod fetch;
pub mod registry;
pub mod scheduler;
pub mod supervisor;

pub use archive::{SyncReport, sync_archive};
pub use backoff::BackoffPolicy;
pub use certificate::{CertificateValidator, describe_chain, fingerprint};
pub use config::{SessionConfig, SyncPolicy};
pub use fetch::{BackgroundFetchCoordinator, FetchDeadlines, FetchResult, FetchTicket, SessionFlush};
pub use registry::{Session, SessionRegistry, SessionSnapshot};
pub use scheduler::ScheduledTask;
pub use supervisor::{Collaborators, ConnectionSupervisor, EnsureOutcome, Subscription};
