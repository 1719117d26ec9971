//! Assigns unmapped posts to catalog articles: verbatim headline containment
//! first, OCR token overlap as the fallback.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use postlink_adapters::{OcrEngine, OcrError};
use postlink_core::{clean_title, token_set, Article, MatchResult, MatchStrategy, Post};
use postlink_storage::ReconciliationStore;
use tracing::{info, info_span, warn, Instrument};

/// Cleaned article titles must be longer than this to be used for containment.
pub const MIN_CONTAINMENT_LEN: usize = 10;

/// Overlap that is always enough, whatever the title length.
const MIN_ABSOLUTE_SCORE: usize = 2;

const OCR_TIMEOUT: Duration = Duration::from_secs(30);

/// First article (in catalog order) whose cleaned title is a substring of the
/// post's cleaned title.
pub fn match_by_title<'a>(post: &Post, articles: &'a [Article]) -> Option<MatchResult<'a>> {
    let post_title = clean_title(&post.title);
    articles
        .iter()
        .find(|article| {
            let article_title = clean_title(&article.title);
            article_title.len() > MIN_CONTAINMENT_LEN && post_title.contains(&article_title)
        })
        .map(|article| MatchResult {
            article,
            strategy: MatchStrategy::TitleMatch,
        })
}

fn passes_threshold(score: usize, article_tokens: usize) -> bool {
    score >= MIN_ABSOLUTE_SCORE || score * 2 > article_tokens
}

/// Best-scoring article for a set of OCR tokens. Ties keep the earlier article.
pub fn match_by_ocr_tokens<'a>(
    ocr_tokens: &BTreeSet<String>,
    articles: &'a [Article],
) -> Option<MatchResult<'a>> {
    let mut best: Option<MatchResult<'a>> = None;
    let mut best_score = 0;

    for article in articles {
        let article_tokens = token_set(&article.title);
        if article_tokens.is_empty() {
            continue;
        }
        let score = article_tokens.intersection(ocr_tokens).count();
        if score > best_score && passes_threshold(score, article_tokens.len()) {
            best_score = score;
            best = Some(MatchResult {
                article,
                strategy: MatchStrategy::OcrFuzzy { score },
            });
        }
    }
    best
}

pub fn match_by_ocr_text<'a>(text: &str, articles: &'a [Article]) -> Option<MatchResult<'a>> {
    match_by_ocr_tokens(&token_set(text), articles)
}

/// Runs both strategies for one post. OCR is optional; without an engine only
/// containment is attempted.
pub struct MatchEngine<'e> {
    ocr: Option<&'e dyn OcrEngine>,
}

impl<'e> MatchEngine<'e> {
    pub fn new(ocr: Option<&'e dyn OcrEngine>) -> Self {
        Self { ocr }
    }

    /// Containment, then OCR when an engine is configured and the post has a
    /// remote image. A stalled OCR call counts as a failure after 30 s.
    pub async fn try_match_post<'a>(
        &self,
        post: &Post,
        articles: &'a [Article],
    ) -> Result<Option<MatchResult<'a>>, OcrError> {
        if let Some(hit) = match_by_title(post, articles) {
            return Ok(Some(hit));
        }

        let (Some(ocr), Some(image)) = (self.ocr, post.image.as_deref()) else {
            return Ok(None);
        };
        if !post.has_remote_image() {
            return Ok(None);
        }

        let text = tokio::time::timeout(OCR_TIMEOUT, ocr.recognize(image))
            .await
            .map_err(|_| OcrError::Network(format!("timed out after {}s", OCR_TIMEOUT.as_secs())))??;
        Ok(match_by_ocr_text(&text, articles))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchingSummary {
    pub examined: usize,
    pub title_matches: usize,
    pub ocr_matches: usize,
    pub unmatched: usize,
    /// Matched, but the post was mapped by someone else mid-run.
    pub skipped: usize,
    pub ocr_failures: usize,
    pub write_failures: usize,
}

impl fmt::Display for MatchingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined {} posts: {} title matches, {} ocr matches, {} unmatched, {} skipped ({} ocr failures, {} write failures)",
            self.examined,
            self.title_matches,
            self.ocr_matches,
            self.unmatched,
            self.skipped,
            self.ocr_failures,
            self.write_failures
        )
    }
}

/// Matches every unmapped post, one at a time, and writes hits back as
/// automated mappings.
pub async fn run_matching(
    store: &dyn ReconciliationStore,
    ocr: Option<&dyn OcrEngine>,
) -> Result<MatchingSummary> {
    let articles = store.list_articles().await.context("loading articles")?;
    let posts = store
        .list_unmapped_posts()
        .await
        .context("loading unmapped posts")?;
    info!(articles = articles.len(), posts = posts.len(), "matching unmapped posts");

    let engine = MatchEngine::new(ocr);
    let mut summary = MatchingSummary::default();

    for post in &posts {
        summary.examined += 1;
        let span = info_span!("match_post", post_id = post.id.as_str());
        let outcome = engine.try_match_post(post, &articles).instrument(span).await;

        let hit = match outcome {
            Ok(Some(hit)) => hit,
            Ok(None) => {
                summary.unmatched += 1;
                continue;
            }
            Err(err) => {
                warn!(post_id = post.id.as_str(), error = %err, "ocr failed; leaving post unmapped");
                summary.ocr_failures += 1;
                summary.unmatched += 1;
                continue;
            }
        };

        match store
            .update_post_mapping(&post.id, &hit.article.url, None, false)
            .await
        {
            Ok(false) => {
                info!(post_id = post.id.as_str(), "post mapped during the run; keeping existing mapping");
                summary.skipped += 1;
            }
            Ok(true) => {
                info!(
                    post_id = post.id.as_str(),
                    blog_url = hit.article.url.as_str(),
                    strategy = %hit.strategy,
                    "mapped post"
                );
                match hit.strategy {
                    MatchStrategy::TitleMatch => summary.title_matches += 1,
                    MatchStrategy::OcrFuzzy { .. } => summary.ocr_matches += 1,
                }
            }
            Err(err) => {
                warn!(post_id = post.id.as_str(), error = %err, "failed to store mapping");
                summary.write_failures += 1;
            }
        }
    }

    info!(%summary, "matching finished");
    Ok(summary)
}
