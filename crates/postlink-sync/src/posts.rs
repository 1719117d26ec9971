use std::fmt;

use anyhow::{anyhow, Context, Result};
use postlink_adapters::{
    object_key_for, post_from_media, post_id_for, select_display_image, GraphClient, MediaItem,
    MEDIA_FETCH_LIMIT,
};
use postlink_core::Post;
use postlink_storage::{HttpGet, ObjectStore, PostWriteMode, ReconciliationStore};
use tracing::{info, warn};

use crate::SyncConfig;

const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostIngestSummary {
    pub fetched: usize,
    pub stored: usize,
    pub without_image: usize,
    pub failed: usize,
}

impl fmt::Display for PostIngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched {} media items: {} stored, {} without image, {} failed",
            self.fetched, self.stored, self.without_image, self.failed
        )
    }
}

/// Pulls recent media from the graph API, mirrors each image into the object
/// store, and upserts the resulting posts in one batch.
pub struct PostIngestor<'a> {
    http: &'a dyn HttpGet,
    store: &'a dyn ReconciliationStore,
    objects: &'a dyn ObjectStore,
    config: &'a SyncConfig,
}

impl<'a> PostIngestor<'a> {
    pub fn new(
        http: &'a dyn HttpGet,
        store: &'a dyn ReconciliationStore,
        objects: &'a dyn ObjectStore,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            http,
            store,
            objects,
            config,
        }
    }

    pub async fn run(&self) -> Result<PostIngestSummary> {
        let token = self
            .config
            .access_token
            .as_deref()
            .ok_or_else(|| anyhow!("INSTAGRAM_ACCESS_TOKEN is not set"))?;

        let graph = GraphClient::new(self.http, &self.config.graph_url, token);
        let account_id = graph
            .resolve_account_id(
                self.config.business_account_id.as_deref(),
                &self.config.account_username,
            )
            .await
            .context("resolving business account")?;
        let media = graph
            .recent_media(&account_id, MEDIA_FETCH_LIMIT)
            .await
            .context("listing recent media")?;
        info!(account_id = account_id.as_str(), items = media.len(), "fetched media");

        let mut summary = PostIngestSummary {
            fetched: media.len(),
            ..PostIngestSummary::default()
        };
        let mut posts = Vec::with_capacity(media.len());

        for item in &media {
            let Some(image_url) = select_display_image(item) else {
                warn!(post_id = post_id_for(item).as_str(), "media item has no image");
                summary.without_image += 1;
                continue;
            };
            match self.mirror(item, image_url).await {
                Ok(post) => posts.push(post),
                Err(err) => {
                    warn!(post_id = post_id_for(item).as_str(), error = %format!("{err:#}"), "skipping media item");
                    summary.failed += 1;
                }
            }
        }

        if !posts.is_empty() {
            self.store
                .upsert_posts(&posts, PostWriteMode::Automated)
                .await
                .context("upserting posts")?;
        }
        summary.stored = posts.len();

        info!(%summary, "post ingest finished");
        Ok(summary)
    }

    async fn mirror(&self, item: &MediaItem, image_url: &str) -> Result<Post> {
        let image = self
            .http
            .get(image_url)
            .await
            .with_context(|| format!("downloading {image_url}"))?;
        let public_url = self
            .objects
            .put(&object_key_for(item), &image.body, IMAGE_CONTENT_TYPE)
            .await
            .context("uploading image")?;
        Ok(post_from_media(item, public_url))
    }
}
