// SPDX-FileCopyrightText: 2026 Skylark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message archive synchronization.
//!
//! Requests the newest page of archived messages after a watermark, then
//! walks backward page by page. Messages themselves arrive as
//! archive-message events on the client's registry; this loop only drives
//! the paging.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use skylark_core::types::{ArchiveQuery, PageRequest};
use skylark_core::{ProtocolClient, SkylarkError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of a completed or cancelled sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub pages: u32,
    pub messages: u64,
    pub cancelled: bool,
}

/// Page backward through the archive from `start` until a short page, a
/// page without a cursor, or the first page of the result set.
pub async fn sync_archive(
    client: Arc<dyn ProtocolClient>,
    start: DateTime<Utc>,
    page_size: u32,
    cancel: CancellationToken,
) -> Result<SyncReport, SkylarkError> {
    let account = client.account().clone();
    let query_id = format!("sync-{}", uuid::Uuid::new_v4());
    let mut request = PageRequest::Last { max: page_size };
    let mut report = SyncReport::default();

    loop {
        let query = ArchiveQuery {
            query_id: query_id.clone(),
            start,
            page: request,
        };
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.cancelled = true;
                debug!(account = %account, pages = report.pages, "archive sync cancelled");
                return Ok(report);
            }
            page = client.query_archive(query) => page?,
        };
        report.pages += 1;
        report.messages += u64::from(page.received);

        let cursor = match page.first {
            Some(cursor) if page.received >= page_size && page.index != Some(0) => cursor,
            _ => break,
        };
        request = PageRequest::Before {
            cursor,
            max: page_size,
        };
    }

    info!(account = %account, pages = report.pages, messages = report.messages, "archive sync finished");
    Ok(report)
}
