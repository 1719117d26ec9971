use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};

/// Whether a failed GET is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

impl RetryDisposition {
    /// 5xx and 429 are transient; everything else is final.
    pub fn for_status(status: StatusCode) -> Self {
        let transient = status.is_server_error() || status.as_u16() == 429;
        if transient {
            Self::Retryable
        } else {
            Self::NonRetryable
        }
    }

    /// Timeouts and connection failures are transient; decode errors are not.
    pub fn for_error(err: &reqwest::Error) -> Self {
        match (err.is_timeout(), err.is_connect(), err.is_request()) {
            (false, false, false) => Self::NonRetryable,
            _ => Self::Retryable,
        }
    }

    fn allows(self, attempt: usize, policy: &BackoffPolicy) -> bool {
        self == Self::Retryable && attempt < policy.max_retries
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = u32::try_from(attempt_index)
            .ok()
            .and_then(|shift| 1u32.checked_shl(shift))
            .unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_host_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 16,
            per_host_concurrency: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {detail}")]
    HttpStatus {
        status: u16,
        url: String,
        detail: String,
    },
    #[error("fetcher is shut down")]
    Closed,
}

impl FetchError {
    /// Same error with query strings dropped from any URL it mentions. Query
    /// parameters carry API tokens and error text ends up in job output.
    pub fn without_query(self) -> Self {
        match self {
            Self::Request(err) => Self::Request(strip_error_query(err)),
            Self::HttpStatus { status, url, detail } => Self::HttpStatus {
                status,
                url: redact_query(&url),
                detail,
            },
            Self::Closed => Self::Closed,
        }
    }
}

/// `url` without its query string or fragment.
pub fn redact_query(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    }
}

/// Rewrites the URL a reqwest error reports so its query is not displayed.
pub fn strip_error_query(err: reqwest::Error) -> reqwest::Error {
    match err.url().cloned() {
        Some(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            err.with_url(url)
        }
        None => err,
    }
}

/// GET access used by the ingestors; lets pipelines run against canned pages.
#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError>;

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        Ok(self.get(url).await?.text())
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_host_limit: usize,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_host_limit: config.per_host_concurrency.max(1),
            per_host: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    /// Underlying client, for callers that need non-GET verbs.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn per_host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = self.per_host.lock().await;
        map.entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    /// GET with the concurrency limits and retry policy applied.
    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let host = host_key(url);
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let host_limit = self.per_host_semaphore(&host).await;
        let _host = host_limit.acquire().await.map_err(|_| FetchError::Closed)?;

        let shown_url = redact_query(url);
        let span = info_span!("http_get", host = host.as_str(), url = shown_url.as_str());
        async {
            let mut attempt = 0;
            loop {
                match self.attempt(url).await {
                    Step::Done(result) => return result,
                    Step::Failed(disposition, err) if disposition.allows(attempt, &self.backoff) => {
                        debug!(attempt, error = %err, "retrying request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                    }
                    Step::Failed(_, err) => return Err(err),
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, url: &str) -> Step {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                let disposition = RetryDisposition::for_error(&err);
                return Step::Failed(disposition, FetchError::Request(strip_error_query(err)));
            }
        };

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            let err = FetchError::HttpStatus {
                status: status.as_u16(),
                url: redact_query(&final_url),
                detail: truncate_detail(&detail),
            };
            return Step::Failed(RetryDisposition::for_status(status), err);
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = match resp.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => return Step::Done(Err(FetchError::Request(strip_error_query(err)))),
        };
        Step::Done(Ok(FetchedResponse {
            status,
            final_url,
            content_type,
            body,
        }))
    }
}

enum Step {
    Done(Result<FetchedResponse, FetchError>),
    Failed(RetryDisposition, FetchError),
}

#[async_trait]
impl HttpGet for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.fetch_bytes(url).await
    }
}

fn host_key(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(ToString::to_string))
        .unwrap_or_else(|| "<unknown-host>".to_string())
}

fn truncate_detail(body: &str) -> String {
    const LIMIT: usize = 300;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_stop_at_the_policy_limit() {
        let policy = BackoffPolicy::default();
        assert!(RetryDisposition::Retryable.allows(1, &policy));
        assert!(!RetryDisposition::Retryable.allows(2, &policy));
        assert!(!RetryDisposition::NonRetryable.allows(0, &policy));
    }

    #[test]
    fn doubling_delay_is_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        let disposition = |code| RetryDisposition::for_status(code);
        assert_eq!(disposition(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(disposition(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(disposition(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
        assert_eq!(disposition(StatusCode::FORBIDDEN), RetryDisposition::NonRetryable);
    }

    #[test]
    fn host_key_falls_back_for_garbage() {
        assert_eq!(host_key("https://nibsnetwork.com/a/b"), "nibsnetwork.com");
        assert_eq!(host_key("not a url"), "<unknown-host>");
    }

    #[test]
    fn query_strings_are_dropped_from_reported_urls() {
        assert_eq!(
            redact_query("https://graph.test/v21.0/42/media?fields=id&access_token=SECRET#x"),
            "https://graph.test/v21.0/42/media"
        );
        assert_eq!(redact_query("not a url?token=SECRET"), "not a url");

        let err = FetchError::HttpStatus {
            status: 400,
            url: "https://graph.test/me/accounts?access_token=SECRET".to_string(),
            detail: "expired".to_string(),
        }
        .without_query();
        let shown = err.to_string();
        assert!(!shown.contains("SECRET"), "{shown}");
        assert!(shown.contains("https://graph.test/me/accounts"));
    }

    #[tokio::test]
    async fn transport_errors_hide_the_query() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            backoff: BackoffPolicy {
                max_retries: 0,
                ..BackoffPolicy::default()
            },
            ..HttpClientConfig::default()
        })
        .unwrap();
        // Port 1 on loopback refuses connections.
        let err = fetcher
            .fetch_bytes("http://127.0.0.1:1/media?access_token=SECRET")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
        let shown = format!("{:#}", anyhow::Error::from(err));
        assert!(shown.contains("127.0.0.1"), "{shown}");
        assert!(!shown.contains("SECRET"), "{shown}");
    }

    #[test]
    fn error_detail_is_truncated() {
        let long = "x".repeat(1000);
        let detail = truncate_detail(&long);
        assert_eq!(detail.len(), 303);
        assert!(detail.ends_with("..."));
        assert_eq!(truncate_detail("  short  "), "short");
    }
}
