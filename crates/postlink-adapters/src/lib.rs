//! Clients for the external sources postlink reads from: the blog sitemap and
//! article pages, the social graph API, the OCR service, and the headless
//! browser.

pub mod browser;
pub mod graph;
pub mod ocr;
pub mod sitemap;

use postlink_storage::FetchError;
use scraper::{Html, Selector};
use thiserror::Error;

pub use browser::{extract_time_datetime, BrowserError, BrowserlessRenderer, PageRenderer, RenderOptions};
pub use graph::{
    object_key_for, post_from_media, post_id_for, post_title_from_caption, select_display_image,
    GraphClient, MediaItem, DEFAULT_GRAPH_URL, MEDIA_FETCH_LIMIT,
};
pub use ocr::{HttpOcrEngine, OcrEngine, OcrError};
pub use sitemap::{category_from_url, filter_article_urls, parse_sitemap, scrape_article};

pub const CRATE_NAME: &str = "postlink-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("graph api error: {0}")]
    Graph(String),
    #[error("no business account could be resolved")]
    AccountNotFound,
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))
}

fn select_first_text(document: &Html, css: &str) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(&n.text().collect::<String>())))
}

fn select_first_attr(document: &Html, css: &str, attr: &str) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(text_or_none))
}
