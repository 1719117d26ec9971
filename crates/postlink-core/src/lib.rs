//! Core domain model and text normalization for postlink.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "postlink-core";

/// Tokens dropped by [`normalize`] regardless of length.
pub const STOP_WORDS: &[&str] = &["the", "and", "with", "for", "from", "best", "top", "how"];

/// Tokens must be strictly longer than this to survive [`normalize`].
pub const MIN_TOKEN_LEN: usize = 3;

/// Long-form catalog item, the reconciliation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub image: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Scraped article before it has been assigned an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleDraft {
    pub title: String,
    pub url: String,
    pub image: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

/// Short-form social post with an optional article mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub url: String,
    pub image: Option<String>,
    #[serde(rename = "type")]
    pub media_type: String,
    pub blog_url: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub manual_edit: bool,
}

impl Post {
    /// Whether the image can be handed to the OCR service.
    pub fn has_remote_image(&self) -> bool {
        self.image
            .as_deref()
            .is_some_and(|image| image.starts_with("http"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MatchStrategy {
    TitleMatch,
    OcrFuzzy { score: usize },
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TitleMatch => f.write_str("title-match"),
            Self::OcrFuzzy { score } => write!(f, "ocr-fuzzy({score})"),
        }
    }
}

/// Outcome of matching one post against the catalog. Never persisted as-is;
/// only the article URL is written back onto the post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult<'a> {
    pub article: &'a Article,
    pub strategy: MatchStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl FromStr for JobState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(UnknownValue {
                kind: "job state",
                value: other.to_string(),
            }),
        }
    }
}

/// Process-wide job bookkeeping, stored as a single well-known row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    pub script_name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub output: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobName {
    IngestPosts,
    IngestArticles,
    RunMatching,
    SyncTimestamps,
}

impl JobName {
    pub const ALL: [JobName; 4] = [
        Self::IngestPosts,
        Self::IngestArticles,
        Self::RunMatching,
        Self::SyncTimestamps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IngestPosts => "ingest-posts",
            Self::IngestArticles => "ingest-articles",
            Self::RunMatching => "run-matching",
            Self::SyncTimestamps => "sync-timestamps",
        }
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobName {
    type Err = UnknownValue;

    /// Accepts the canonical names plus the legacy script names the admin UI
    /// still sends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ingest-posts" | "sync-insta" | "fetch-api" => Ok(Self::IngestPosts),
            "ingest-articles" | "sync-blog" => Ok(Self::IngestArticles),
            "run-matching" | "auto-map" => Ok(Self::RunMatching),
            "sync-timestamps" | "time-sync" => Ok(Self::SyncTimestamps),
            other => Err(UnknownValue {
                kind: "job",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

/// Lower-cases and keeps only `[a-z0-9 ]`. Other whitespace is dropped, not
/// turned into spaces.
pub fn clean_title(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ')
        .collect()
}

/// Tokenizes text for fuzzy matching: lower-case, strip punctuation, split on
/// whitespace, drop short tokens and stop-words.
pub fn normalize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .filter(|token| token.len() > MIN_TOKEN_LEN && !STOP_WORDS.contains(token))
        .map(ToString::to_string)
        .collect()
}

/// Set form of [`normalize`]; duplicates collapse.
pub fn token_set(text: &str) -> BTreeSet<String> {
    normalize(text).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_stop_words_and_short_tokens() {
        assert_eq!(normalize("The Best Guide!!"), vec!["guide".to_string()]);
        assert_eq!(
            normalize("How to grow TOMATOES with ease, from seed"),
            vec!["grow", "tomatoes", "ease", "seed"]
        );
    }

    #[test]
    fn normalize_is_total() {
        assert!(normalize("").is_empty());
        assert!(normalize("!!! ??? ...").is_empty());
    }

    #[test]
    fn normalize_splits_on_newlines_from_ocr_output() {
        assert_eq!(normalize("URBAN\nGARDEN\tguide"), vec!["urban", "garden", "guide"]);
    }

    #[test]
    fn clean_title_keeps_spaces_only() {
        assert_eq!(clean_title("Top 10: Travel's Best!"), "top 10 travels best");
        assert_eq!(clean_title("line\nbreak"), "linebreak");
    }

    #[test]
    fn token_set_collapses_duplicates() {
        let set = token_set("garden garden GARDEN urban");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn job_name_accepts_legacy_aliases() {
        assert_eq!("sync-insta".parse::<JobName>().unwrap(), JobName::IngestPosts);
        assert_eq!("fetch-api".parse::<JobName>().unwrap(), JobName::IngestPosts);
        assert_eq!("sync-blog".parse::<JobName>().unwrap(), JobName::IngestArticles);
        assert_eq!("auto-map".parse::<JobName>().unwrap(), JobName::RunMatching);
        assert_eq!("time-sync".parse::<JobName>().unwrap(), JobName::SyncTimestamps);
        for name in JobName::ALL {
            assert_eq!(name.as_str().parse::<JobName>().unwrap(), name);
        }
        assert!("rm-rf".parse::<JobName>().is_err());
    }

    #[test]
    fn match_strategy_display() {
        assert_eq!(MatchStrategy::TitleMatch.to_string(), "title-match");
        assert_eq!(MatchStrategy::OcrFuzzy { score: 3 }.to_string(), "ocr-fuzzy(3)");
    }

    #[test]
    fn remote_image_requires_http_prefix() {
        let mut post = Post {
            id: "ig-1".into(),
            title: "t".into(),
            url: "u".into(),
            image: Some("https://cdn/x.jpg".into()),
            media_type: "image".into(),
            blog_url: None,
            timestamp: None,
            manual_edit: false,
        };
        assert!(post.has_remote_image());
        post.image = Some("/local/x.jpg".into());
        assert!(!post.has_remote_image());
        post.image = None;
        assert!(!post.has_remote_image());
    }
}
