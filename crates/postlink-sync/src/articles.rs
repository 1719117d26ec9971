use std::fmt;

use anyhow::{Context, Result};
use futures::future::join_all;
use postlink_adapters::{filter_article_urls, parse_sitemap, scrape_article};
use postlink_storage::{HttpGet, ReconciliationStore};
use tracing::{debug, info, warn};

/// Article pages fetched concurrently per batch.
pub const ARTICLE_BATCH_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArticleIngestSummary {
    pub found: usize,
    pub added: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for ArticleIngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found {} article urls: {} added, {} skipped, {} failed",
            self.found, self.added, self.skipped, self.failed
        )
    }
}

enum UrlOutcome {
    Added,
    Skipped,
}

/// Crawls the blog sitemap into the article catalog.
pub struct ArticleIngestor<'a> {
    http: &'a dyn HttpGet,
    store: &'a dyn ReconciliationStore,
    sitemap_url: &'a str,
    domain: &'a str,
}

impl<'a> ArticleIngestor<'a> {
    pub fn new(
        http: &'a dyn HttpGet,
        store: &'a dyn ReconciliationStore,
        sitemap_url: &'a str,
        domain: &'a str,
    ) -> Self {
        Self {
            http,
            store,
            sitemap_url,
            domain,
        }
    }

    /// The sitemap itself must load; individual article pages may fail.
    pub async fn run(&self) -> Result<ArticleIngestSummary> {
        let xml = self
            .http
            .get_text(self.sitemap_url)
            .await
            .with_context(|| format!("fetching sitemap {}", self.sitemap_url))?;
        let locs = parse_sitemap(&xml).context("parsing sitemap")?;
        let urls = filter_article_urls(&locs, self.domain);
        info!(sitemap = self.sitemap_url, locs = locs.len(), articles = urls.len(), "sitemap loaded");

        let mut summary = ArticleIngestSummary {
            found: urls.len(),
            ..ArticleIngestSummary::default()
        };

        for batch in urls.chunks(ARTICLE_BATCH_SIZE) {
            let outcomes = join_all(batch.iter().map(|url| self.ingest_url(url))).await;
            for (url, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(UrlOutcome::Added) => summary.added += 1,
                    Ok(UrlOutcome::Skipped) => summary.skipped += 1,
                    Err(err) => {
                        warn!(url = url.as_str(), error = %format!("{err:#}"), "article ingest failed");
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(%summary, "article ingest finished");
        Ok(summary)
    }

    async fn ingest_url(&self, url: &str) -> Result<UrlOutcome> {
        if self.store.article_exists(url).await? {
            debug!(url, "article already stored");
            return Ok(UrlOutcome::Skipped);
        }

        let html = self.http.get_text(url).await?;
        let Some(draft) = scrape_article(url, &html)? else {
            debug!(url, "page has no title");
            return Ok(UrlOutcome::Skipped);
        };

        if self.store.upsert_article(&draft).await? {
            info!(url, title = draft.title.as_str(), "article added");
            Ok(UrlOutcome::Added)
        } else {
            Ok(UrlOutcome::Skipped)
        }
    }
}
