// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Internal typed event plumbing for Skylark.
//!
//! Two directions are covered here:
//! - outbound notifications (history changes, session lifecycle) published on
//!   a broadcast [`EventBus`] that any number of observers can subscribe to;
//! - inbound protocol events, routed to [`EventHandler`](skylark_core::EventHandler)s
//!   by a per-client [`HandlerRegistry`].

pub mod bus;
pub mod events;
pub mod registry;

pub use bus::{Envelope, EventBus};
pub use events::{ChatAction, EntryChange, HistoryEvent, SupervisorEvent};
pub use registry::HandlerRegistry;
