use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use postlink_adapters::{extract_time_datetime, PageRenderer};
use postlink_storage::ReconciliationStore;
use tracing::{info, warn};

/// Posts published within this many days keep getting re-checked.
pub const TIMESTAMP_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampSummary {
    pub candidates: usize,
    pub updated: usize,
    pub missing: usize,
    pub failed: usize,
}

impl fmt::Display for TimestampSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked {} posts: {} updated, {} without timestamp, {} failed",
            self.candidates, self.updated, self.missing, self.failed
        )
    }
}

/// Backfills post publish times from the rendered permalink page.
pub struct TimestampReconciler<'a> {
    store: &'a dyn ReconciliationStore,
    renderer: &'a dyn PageRenderer,
}

impl<'a> TimestampReconciler<'a> {
    pub fn new(store: &'a dyn ReconciliationStore, renderer: &'a dyn PageRenderer) -> Self {
        Self { store, renderer }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<TimestampSummary> {
        let since = now - Duration::days(TIMESTAMP_WINDOW_DAYS);
        let posts = self
            .store
            .posts_needing_timestamp(since)
            .await
            .context("loading timestamp candidates")?;
        info!(candidates = posts.len(), %since, "syncing post timestamps");

        let mut summary = TimestampSummary {
            candidates: posts.len(),
            ..TimestampSummary::default()
        };

        for post in &posts {
            let html = match self.renderer.render(&post.url).await {
                Ok(html) => html,
                Err(err) => {
                    warn!(post_id = post.id.as_str(), url = post.url.as_str(), error = %err, "render failed");
                    summary.failed += 1;
                    continue;
                }
            };

            let parsed = extract_time_datetime(&html)
                .ok()
                .flatten()
                .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                .map(|ts| ts.with_timezone(&Utc));
            let Some(timestamp) = parsed else {
                warn!(post_id = post.id.as_str(), "no usable time element");
                summary.missing += 1;
                continue;
            };

            match self.store.set_post_timestamp(&post.id, timestamp).await {
                Ok(_) => {
                    info!(post_id = post.id.as_str(), %timestamp, "timestamp updated");
                    summary.updated += 1;
                }
                Err(err) => {
                    warn!(post_id = post.id.as_str(), error = %err, "failed to store timestamp");
                    summary.failed += 1;
                }
            }
        }

        info!(%summary, "timestamp sync finished");
        Ok(summary)
    }
}
