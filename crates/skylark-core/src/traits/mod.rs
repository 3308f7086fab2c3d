// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits at the seams of the runtime.
//!
//! The protocol library, the account/settings store and platform trust
//! evaluation live outside Skylark. They are consumed through these traits.

pub mod accounts;
pub mod client;

pub use accounts::{AccountDirectory, SyncWatermark, TrustEvaluator};
pub use client::{CertificateCheck, ClientFactory, EventHandler, EventRegistry, ProtocolClient};
