use std::time::Duration;

use async_trait::async_trait;
use postlink_storage::strip_error_query;
use scraper::Html;
use thiserror::Error;

use crate::{select_first_attr, AdapterError};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("network error: {0}")]
    Network(String),
    #[error("browser api error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl From<reqwest::Error> for BrowserError {
    fn from(err: reqwest::Error) -> Self {
        BrowserError::Network(strip_error_query(err).to_string())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub navigation_timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// Loads a page in a real browser and returns the rendered DOM as HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, BrowserError>;
}

/// Client for a Browserless `/content` endpoint.
pub struct BrowserlessRenderer {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    options: RenderOptions,
}

impl BrowserlessRenderer {
    pub fn new(base_url: &str, token: Option<&str>, options: RenderOptions) -> Result<Self, BrowserError> {
        // Leave headroom over the in-browser navigation timeout.
        let client = reqwest::Client::builder()
            .timeout(options.navigation_timeout + options.settle_delay + Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            options,
        })
    }

    fn request_body(&self, url: &str) -> serde_json::Value {
        serde_json::json!({
            "url": url,
            "gotoOptions": {
                "waitUntil": "domcontentloaded",
                "timeout": self.options.navigation_timeout.as_millis() as u64,
            },
            "waitForTimeout": self.options.settle_delay.as_millis() as u64,
        })
    }
}

#[async_trait]
impl PageRenderer for BrowserlessRenderer {
    async fn render(&self, url: &str) -> Result<String, BrowserError> {
        let mut request = self.client.post(format!("{}/content", self.base_url));
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }

        let resp = request.json(&self.request_body(url)).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }
}

/// The `datetime` attribute of the first `<time>` element, if it has one.
pub fn extract_time_datetime(html: &str) -> Result<Option<String>, AdapterError> {
    let document = Html::parse_document(html);
    select_first_attr(&document, "time", "datetime")
}
