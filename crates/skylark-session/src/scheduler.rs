// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cancellable delayed tasks.
//!
//! A [`ScheduledTask`] runs its work once after a delay unless cancelled
//! first. Dropping the handle cancels it, so storing a new task in the place
//! of an old one replaces the timer instead of stacking a second one.
//! Cancelling a task whose delay already elapsed does not interrupt the
//! work, except where the work itself watches the token it is given.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
    delay: Duration,
}

impl ScheduledTask {
    /// Run `work` after `delay`.
    pub fn after<F>(delay: Duration, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::with_token(delay, move |_| work)
    }

    /// Run the future built by `make` after `delay`. The future receives the
    /// task's token so long-running work can stop early when cancelled.
    pub fn with_token<M, F>(delay: Duration, make: M) -> Self
    where
        M: FnOnce(CancellationToken) -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let watch = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = watch.cancelled() => {}
                _ = tokio::time::sleep(delay) => make(child).await,
            }
        });
        Self {
            token,
            handle,
            delay,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("delay", &self.delay)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}
