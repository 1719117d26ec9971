//! Reconciliation pipelines and the job runner that drives them.

pub mod articles;
pub mod jobs;
pub mod matching;
pub mod posts;
pub mod timestamps;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use postlink_adapters::ocr::DEFAULT_OCR_URL;
use postlink_adapters::{
    BrowserlessRenderer, HttpOcrEngine, OcrEngine, PageRenderer, RenderOptions, DEFAULT_GRAPH_URL,
};
use postlink_storage::{
    FsObjectStore, HttpClientConfig, HttpFetcher, HttpGet, HttpObjectStore, ObjectStore,
    ReconciliationStore,
};
use tracing::warn;

pub use articles::{ArticleIngestSummary, ArticleIngestor, ARTICLE_BATCH_SIZE};
pub use jobs::{build_scheduler, JobRunner, JobTracker, Pipelines};
pub use matching::{
    match_by_ocr_text, match_by_ocr_tokens, match_by_title, run_matching, MatchEngine, MatchingSummary,
    MIN_CONTAINMENT_LEN,
};
pub use posts::{PostIngestSummary, PostIngestor};
pub use timestamps::{TimestampReconciler, TimestampSummary, TIMESTAMP_WINDOW_DAYS};

pub const CRATE_NAME: &str = "postlink-sync";

pub const DEFAULT_SITEMAP_URL: &str = "https://nibsnetwork.com/sitemap.xml";
pub const DEFAULT_TARGET_DOMAIN: &str = "nibsnetwork.com";
pub const DEFAULT_ACCOUNT_USERNAME: &str = "nibsnetwork";

/// Where post images are uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreConfig {
    Filesystem {
        dir: PathBuf,
        public_url: String,
    },
    Http {
        endpoint: String,
        bucket: String,
        token: Option<String>,
        public_url: Option<String>,
    },
}

impl ObjectStoreConfig {
    /// Whether stored images are only reachable from this machine.
    pub fn is_loopback(&self) -> bool {
        let public_url = match self {
            Self::Filesystem { public_url, .. } => Some(public_url.as_str()),
            Self::Http { public_url, .. } => public_url.as_deref(),
        };
        public_url.is_some_and(|url| {
            let host = url.split("://").nth(1).unwrap_or(url);
            host.starts_with("localhost") || host.starts_with("127.") || host.starts_with("[::1]")
        })
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub sitemap_url: String,
    pub target_domain: String,
    pub graph_url: String,
    pub access_token: Option<String>,
    pub business_account_id: Option<String>,
    pub account_username: String,
    pub ocr_url: String,
    pub ocr_api_key: Option<String>,
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,
    pub object_store: ObjectStoreConfig,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub cron_ingest: String,
    pub cron_match: String,
    pub web_port: u16,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

const DEFAULT_OBJECT_STORE_DIR: &str = "./media";
const DEFAULT_OBJECT_STORE_PUBLIC_URL: &str = "http://localhost:3001/media";
const DEFAULT_CRON_INGEST: &str = "0 0 6 * * *";
const DEFAULT_CRON_MATCH: &str = "0 30 6 * * *";

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            sitemap_url: DEFAULT_SITEMAP_URL.to_string(),
            target_domain: DEFAULT_TARGET_DOMAIN.to_string(),
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            access_token: None,
            business_account_id: None,
            account_username: DEFAULT_ACCOUNT_USERNAME.to_string(),
            ocr_url: DEFAULT_OCR_URL.to_string(),
            ocr_api_key: None,
            browserless_url: None,
            browserless_token: None,
            object_store: ObjectStoreConfig::Filesystem {
                dir: PathBuf::from(DEFAULT_OBJECT_STORE_DIR),
                public_url: DEFAULT_OBJECT_STORE_PUBLIC_URL.to_string(),
            },
            user_agent: "postlink-bot/0.1".to_string(),
            http_timeout_secs: 30,
            scheduler_enabled: false,
            cron_ingest: DEFAULT_CRON_INGEST.to_string(),
            cron_match: DEFAULT_CRON_MATCH.to_string(),
            web_port: 3001,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let object_store = match env_opt("OBJECT_STORE_ENDPOINT") {
            Some(endpoint) => ObjectStoreConfig::Http {
                public_url: env_opt("OBJECT_STORE_PUBLIC_URL"),
                endpoint,
                bucket: env_or("OBJECT_STORE_BUCKET", "media"),
                token: env_opt("OBJECT_STORE_TOKEN"),
            },
            None => ObjectStoreConfig::Filesystem {
                dir: PathBuf::from(env_or("OBJECT_STORE_DIR", DEFAULT_OBJECT_STORE_DIR)),
                public_url: env_or("OBJECT_STORE_PUBLIC_URL", DEFAULT_OBJECT_STORE_PUBLIC_URL),
            },
        };

        Self {
            database_url: env_opt("DATABASE_URL"),
            sitemap_url: env_or("POSTLINK_SITEMAP_URL", DEFAULT_SITEMAP_URL),
            target_domain: env_or("POSTLINK_TARGET_DOMAIN", DEFAULT_TARGET_DOMAIN),
            graph_url: env_or("GRAPH_API_URL", DEFAULT_GRAPH_URL),
            access_token: env_opt("INSTAGRAM_ACCESS_TOKEN"),
            business_account_id: env_opt("INSTAGRAM_BUSINESS_ACCOUNT_ID"),
            account_username: env_or("INSTAGRAM_USERNAME", DEFAULT_ACCOUNT_USERNAME),
            ocr_url: env_or("OCR_API_URL", DEFAULT_OCR_URL),
            ocr_api_key: env_opt("OCR_API_KEY"),
            browserless_url: env_opt("BROWSERLESS_URL"),
            browserless_token: env_opt("BROWSERLESS_TOKEN"),
            object_store,
            user_agent: env_or("POSTLINK_USER_AGENT", &defaults.user_agent),
            http_timeout_secs: env_opt("POSTLINK_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            scheduler_enabled: env_opt("POSTLINK_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            cron_ingest: env_or("POSTLINK_CRON_INGEST", DEFAULT_CRON_INGEST),
            cron_match: env_or("POSTLINK_CRON_MATCH", DEFAULT_CRON_MATCH),
            web_port: env_opt("POSTLINK_WEB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.web_port),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow!("DATABASE_URL is not set"))
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout(),
            user_agent: Some(self.user_agent.clone()),
            ..HttpClientConfig::default()
        }
    }
}

/// Builds the external clients described by `config` and wires them around
/// `store`. OCR and the browser are optional: without them matching runs
/// containment only and timestamp sync refuses to start.
pub fn pipelines_from_config(
    config: SyncConfig,
    store: Arc<dyn ReconciliationStore>,
) -> Result<Pipelines> {
    let fetcher = HttpFetcher::new(config.http_client_config()).context("building http client")?;

    let objects: Arc<dyn ObjectStore> = match &config.object_store {
        ObjectStoreConfig::Filesystem { dir, public_url } => {
            Arc::new(FsObjectStore::new(dir.clone(), public_url))
        }
        ObjectStoreConfig::Http {
            endpoint,
            bucket,
            token,
            public_url,
        } => Arc::new(HttpObjectStore::new(
            fetcher.client().clone(),
            endpoint,
            bucket,
            token.as_deref(),
            public_url.as_deref(),
        )),
    };

    let ocr: Option<Arc<dyn OcrEngine>> = match &config.ocr_api_key {
        Some(key) => Some(Arc::new(
            HttpOcrEngine::new(&config.ocr_url, key, config.http_timeout())
                .context("building ocr client")?,
        )),
        None => {
            warn!("OCR_API_KEY is not set; matching will use title containment only");
            None
        }
    };

    if ocr.is_some() && config.object_store.is_loopback() {
        warn!("OBJECT_STORE_PUBLIC_URL points at this host; a remote OCR service cannot fetch those images");
    }

    let renderer: Option<Arc<dyn PageRenderer>> = match &config.browserless_url {
        Some(url) => Some(Arc::new(
            BrowserlessRenderer::new(url, config.browserless_token.as_deref(), RenderOptions::default())
                .context("building browser client")?,
        )),
        None => None,
    };

    let http: Arc<dyn HttpGet> = Arc::new(fetcher);
    Ok(Pipelines::new(config, store, http, objects, ocr, renderer))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_client_config_carries_overrides() {
        let config = SyncConfig {
            user_agent: "test-agent".to_string(),
            http_timeout_secs: 7,
            ..SyncConfig::default()
        };
        let http = config.http_client_config();
        assert_eq!(http.timeout, Duration::from_secs(7));
        assert_eq!(http.user_agent.as_deref(), Some("test-agent"));
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn defaults_point_at_the_live_blog() {
        let config = SyncConfig::default();
        assert_eq!(config.sitemap_url, "https://nibsnetwork.com/sitemap.xml");
        assert_eq!(config.graph_url, "https://graph.facebook.com/v21.0");
        assert_eq!(config.web_port, 3001);
        assert!(!config.scheduler_enabled);
    }

    #[test]
    fn default_media_url_is_served_locally() {
        let config = SyncConfig::default();
        match &config.object_store {
            ObjectStoreConfig::Filesystem { public_url, .. } => {
                assert_eq!(public_url, &format!("http://localhost:{}/media", config.web_port));
            }
            other => panic!("unexpected default object store: {other:?}"),
        }
        assert!(config.object_store.is_loopback());

        let bucket = ObjectStoreConfig::Http {
            endpoint: "https://s3.example.com".to_string(),
            bucket: "media".to_string(),
            token: None,
            public_url: Some("https://cdn.example.com/media".to_string()),
        };
        assert!(!bucket.is_loopback());
    }
}
