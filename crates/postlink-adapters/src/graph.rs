use chrono::{DateTime, Utc};
use postlink_core::Post;
use postlink_storage::{FetchError, HttpGet};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use url::Url;

use crate::AdapterError;

pub const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com/v21.0";
pub const MEDIA_FETCH_LIMIT: usize = 50;

const MEDIA_FIELDS: &str = "id,caption,media_type,media_url,permalink,thumbnail_url,timestamp";
const ACCOUNT_FIELDS: &str = "name,instagram_business_account{id,username}";
const TITLE_MAX_CHARS: usize = 60;
const DEFAULT_CAPTION: &str = "Instagram Post";
const POST_ID_PREFIX: &str = "ig-";

#[derive(Debug, Clone, Deserialize)]
struct Paged<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct LinkedPage {
    #[serde(default)]
    instagram_business_account: Option<BusinessAccount>,
}

#[derive(Debug, Clone, Deserialize)]
struct BusinessAccount {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

/// One entry of the media listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaItem {
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
    pub media_type: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Read-only client for the social graph API.
pub struct GraphClient<'a> {
    http: &'a dyn HttpGet,
    base_url: String,
    access_token: String,
}

impl<'a> GraphClient<'a> {
    pub fn new(http: &'a dyn HttpGet, base_url: &str, access_token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.trim().to_string(),
        }
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, AdapterError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .map_err(|e| AdapterError::Message(format!("invalid graph url: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("access_token", &self.access_token);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, AdapterError> {
        let body = self.http.get_text(url.as_str()).await.map_err(graph_failure)?;
        let value: JsonValue = serde_json::from_str(&body)?;
        if let Some(message) = graph_error_message(&value) {
            return Err(AdapterError::Graph(message));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Uses `configured` when present; otherwise scans the pages linked to the
    /// token. A page whose account username equals `preferred_username` wins,
    /// else the last linked account found.
    pub async fn resolve_account_id(
        &self,
        configured: Option<&str>,
        preferred_username: &str,
    ) -> Result<String, AdapterError> {
        if let Some(id) = configured.map(str::trim).filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        let url = self.endpoint("me/accounts", &[("fields", ACCOUNT_FIELDS)])?;
        let pages: Paged<LinkedPage> = self.get_json(&url).await?;

        let mut found = None;
        for account in pages.data.into_iter().filter_map(|p| p.instagram_business_account) {
            let username = account.username.clone().unwrap_or_default();
            info!(account_id = account.id.as_str(), username = username.as_str(), "found linked business account");
            let preferred = username.eq_ignore_ascii_case(preferred_username);
            found = Some(account.id);
            if preferred {
                break;
            }
        }
        found.ok_or(AdapterError::AccountNotFound)
    }

    pub async fn recent_media(&self, account_id: &str, limit: usize) -> Result<Vec<MediaItem>, AdapterError> {
        let limit = limit.to_string();
        let url = self.endpoint(
            &format!("{account_id}/media"),
            &[("fields", MEDIA_FIELDS), ("limit", &limit)],
        )?;
        let media: Paged<MediaItem> = self.get_json(&url).await?;
        debug!(count = media.data.len(), "fetched media listing");
        Ok(media.data)
    }
}

/// `error.message` of a graph error envelope.
fn graph_error_message(value: &JsonValue) -> Option<String> {
    let error = value.get("error")?;
    let message = error
        .get("message")
        .and_then(JsonValue::as_str)
        .unwrap_or("unknown error");
    Some(message.to_string())
}

/// The API answers bad tokens and ids with a 4xx whose body is an error
/// envelope; surface its message. Anything else keeps the fetch error, minus
/// the query that holds the access token.
fn graph_failure(err: FetchError) -> AdapterError {
    let message = match &err {
        FetchError::HttpStatus { detail, .. } => serde_json::from_str::<JsonValue>(detail)
            .ok()
            .and_then(|body| graph_error_message(&body)),
        _ => None,
    };
    match message {
        Some(message) => AdapterError::Graph(message),
        None => AdapterError::Fetch(err.without_query()),
    }
}

/// Thumbnail for videos (falling back to the media URL), the media URL otherwise.
pub fn select_display_image(item: &MediaItem) -> Option<&str> {
    let url = if item.media_type.eq_ignore_ascii_case("VIDEO") {
        item.thumbnail_url.as_deref().or(item.media_url.as_deref())
    } else {
        item.media_url.as_deref()
    };
    url.filter(|u| !u.trim().is_empty())
}

pub fn post_id_for(item: &MediaItem) -> String {
    format!("{POST_ID_PREFIX}{}", item.id)
}

/// Deterministic bucket key so re-ingesting a post overwrites its image.
pub fn object_key_for(item: &MediaItem) -> String {
    format!("posts/{}.jpg", post_id_for(item))
}

/// First 60 characters of the caption plus an ellipsis, without quote characters.
pub fn post_title_from_caption(caption: Option<&str>) -> String {
    let caption = caption.filter(|c| !c.is_empty()).unwrap_or(DEFAULT_CAPTION);
    let title = match caption.char_indices().nth(TITLE_MAX_CHARS) {
        Some((idx, _)) => format!("{}...", &caption[..idx]),
        None => caption.to_string(),
    };
    title.replace(['\'', '"'], "")
}

fn parse_graph_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Canonical post for a media item whose image now lives at `image_url`.
pub fn post_from_media(item: &MediaItem, image_url: String) -> Post {
    Post {
        id: post_id_for(item),
        title: post_title_from_caption(item.caption.as_deref()),
        url: item
            .permalink
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| format!("https://www.instagram.com/p/{}/", item.id)),
        image: Some(image_url),
        media_type: item.media_type.to_lowercase(),
        blog_url: None,
        timestamp: item.timestamp.as_deref().and_then(parse_graph_timestamp),
        manual_edit: false,
    }
}
