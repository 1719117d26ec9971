use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const DEFAULT_OCR_URL: &str = "https://api.ocr.space/parse/image";

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("ocr request failed: {0}")]
    Network(String),
    #[error("ocr service returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("ocr could not process image: {0}")]
    Processing(String),
}

impl From<reqwest::Error> for OcrError {
    fn from(err: reqwest::Error) -> Self {
        OcrError::Network(err.to_string())
    }
}

/// Text recognition over a publicly reachable image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image_url: &str) -> Result<String, OcrError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrResponse {
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
    #[serde(default)]
    is_errored_on_processing: bool,
    #[serde(default)]
    error_message: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: String,
}

/// OCR.space-compatible HTTP engine (English).
pub struct HttpOcrEngine {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpOcrEngine {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

fn error_text(value: Option<&JsonValue>) -> String {
    match value {
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        _ => "unknown error".to_string(),
    }
}

fn collect_text(response: OcrResponse) -> Result<String, OcrError> {
    if response.is_errored_on_processing {
        return Err(OcrError::Processing(error_text(response.error_message.as_ref())));
    }
    Ok(response
        .parsed_results
        .into_iter()
        .map(|r| r.parsed_text)
        .collect::<Vec<_>>()
        .join("\n"))
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn recognize(&self, image_url: &str) -> Result<String, OcrError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .form(&[("url", image_url), ("language", "eng"), ("OCREngine", "2")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(OcrError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: OcrResponse = resp.json().await?;
        collect_text(parsed)
    }
}
