use std::collections::HashSet;

use postlink_core::ArticleDraft;
use scraper::Html;
use url::Url;

use crate::{select_first_attr, select_first_text, selector, text_or_none, AdapterError};

const TAG_SEGMENT: &str = "tag";
const UNCATEGORIZED: &str = "Uncategorized";

/// Every `<url><loc>` entry, trimmed, in document order.
pub fn parse_sitemap(xml: &str) -> Result<Vec<String>, AdapterError> {
    let document = Html::parse_document(xml);
    let sel = selector("url > loc")?;
    Ok(document
        .select(&sel)
        .filter_map(|loc| text_or_none(&loc.text().collect::<String>()))
        .collect())
}

fn non_empty_segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn host_matches(url: &Url, domain: &str) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.trim_start_matches("www.");
    let domain = domain.trim_start_matches("www.");
    host.eq_ignore_ascii_case(domain) || host.ends_with(&format!(".{domain}"))
}

/// Keeps article URLs on `domain`. Tag listings are dropped, and single-segment
/// paths are category index pages rather than articles.
pub fn filter_article_urls<I, S>(urls: I, domain: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter_map(|raw| {
            let raw = raw.as_ref().trim();
            let parsed = Url::parse(raw).ok()?;
            if !host_matches(&parsed, domain) {
                return None;
            }
            let segments = non_empty_segments(&parsed);
            if segments.len() <= 1 || segments.contains(&TAG_SEGMENT) {
                return None;
            }
            Some(raw.to_string())
        })
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// First path segment with its first letter upper-cased.
pub fn category_from_url(url: &str) -> String {
    let first = Url::parse(url)
        .ok()
        .and_then(|u| non_empty_segments(&u).first().map(|s| s.to_string()));
    let Some(segment) = first else {
        return UNCATEGORIZED.to_string();
    };
    let mut chars = segment.chars();
    match chars.next() {
        Some(head) => head.to_uppercase().chain(chars).collect(),
        None => UNCATEGORIZED.to_string(),
    }
}

/// Extracts the article fields from a fetched page. `None` when the page has no
/// usable title.
pub fn scrape_article(url: &str, html: &str) -> Result<Option<ArticleDraft>, AdapterError> {
    let document = Html::parse_document(html);

    let title = match select_first_text(&document, "h1")? {
        Some(title) => Some(title),
        None => select_first_text(&document, "title")?,
    };
    let Some(title) = title else {
        return Ok(None);
    };

    let image = match select_first_attr(&document, r#"meta[property="og:image"]"#, "content")? {
        Some(image) => Some(image),
        None => select_first_attr(&document, "img[src]", "src")?,
    };
    let description = match select_first_attr(&document, r#"meta[name="description"]"#, "content")? {
        Some(description) => Some(description),
        None => select_first_attr(&document, r#"meta[property="og:description"]"#, "content")?,
    };

    Ok(Some(ArticleDraft {
        title,
        url: url.to_string(),
        image,
        category: Some(category_from_url(url)),
        description,
    }))
}
