// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Skylark integration tests.
//!
//! Provides mock collaborators and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without a network or a real server.
//!
//! # Components
//!
//! - [`MockProtocolClient`] - Scriptable protocol client with call recording
//! - [`MockClientFactory`] - Factory that keeps every client it builds
//! - [`InMemoryAccountDirectory`] - Account settings kept in memory
//! - [`TestHarness`] - Supervisor plus a temp-file history store

pub mod harness;
pub mod mock_client;
pub mod mock_directory;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_client::{ClientCall, LoginBehavior, MockClientFactory, MockProtocolClient};
pub use mock_directory::{InMemoryAccountDirectory, MockWatermark, StaticTrust};
