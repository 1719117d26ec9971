//! Relational persistence for articles, posts, and the job status row.
//!
//! Every operation is a single statement, so a crash mid-batch leaves earlier
//! writes committed and the batch can simply be re-run.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postlink_core::{Article, ArticleDraft, JobState, JobStatus, Post};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Id of the one row in `script_status`.
pub const JOB_STATUS_ROW_ID: i32 = 1;

/// Bind parameters per post row; keeps multi-row inserts under the protocol limit.
const POST_COLUMNS: usize = 8;
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Who is writing a post batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostWriteMode {
    /// Ingestion: refreshes source fields, never touches `blog_url` or `manual_edit`.
    Automated,
    /// Human save: also overwrites `blog_url` and pins `manual_edit = true`.
    Manual,
}

#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Creates missing tables and columns. Safe to re-run.
    async fn ensure_schema(&self) -> Result<()>;

    async fn article_exists(&self, url: &str) -> Result<bool>;

    /// Returns `true` when a row was inserted, `false` when the URL already existed.
    async fn upsert_article(&self, draft: &ArticleDraft) -> Result<bool>;

    /// Newest first.
    async fn list_articles(&self) -> Result<Vec<Article>>;

    async fn upsert_posts(&self, posts: &[Post], mode: PostWriteMode) -> Result<u64>;

    async fn list_posts(&self) -> Result<Vec<Post>>;

    async fn list_unmapped_posts(&self) -> Result<Vec<Post>>;

    /// Returns `false` when no post has `post_id`. Automated writes
    /// (`manual == false`) only fill an empty `blog_url` and also return
    /// `false` when the post is already mapped.
    async fn update_post_mapping(
        &self,
        post_id: &str,
        blog_url: &str,
        title: Option<&str>,
        manual: bool,
    ) -> Result<bool>;

    /// Posts with no timestamp, or one at or after `since`.
    async fn posts_needing_timestamp(&self, since: DateTime<Utc>) -> Result<Vec<Post>>;

    async fn set_post_timestamp(&self, post_id: &str, timestamp: DateTime<Utc>) -> Result<bool>;

    async fn job_status(&self) -> Result<JobStatus>;

    async fn set_job_status(&self, status: &JobStatus) -> Result<()>;
}

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS blog_articles (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        url TEXT UNIQUE NOT NULL,
        image TEXT,
        category TEXT,
        description TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "ALTER TABLE blog_articles ADD COLUMN IF NOT EXISTS image TEXT",
    "ALTER TABLE blog_articles ADD COLUMN IF NOT EXISTS description TEXT",
    "ALTER TABLE blog_articles ADD COLUMN IF NOT EXISTS category TEXT",
    r#"
    CREATE TABLE IF NOT EXISTS instagram_posts (
        id TEXT PRIMARY KEY,
        title TEXT,
        url TEXT,
        image TEXT,
        type TEXT,
        blog_url TEXT,
        "timestamp" TIMESTAMPTZ,
        manual_edit BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    "ALTER TABLE instagram_posts ADD COLUMN IF NOT EXISTS blog_url TEXT",
    r#"ALTER TABLE instagram_posts ADD COLUMN IF NOT EXISTS "timestamp" TIMESTAMPTZ"#,
    "ALTER TABLE instagram_posts ADD COLUMN IF NOT EXISTS manual_edit BOOLEAN NOT NULL DEFAULT FALSE",
    r#"
    CREATE TABLE IF NOT EXISTS script_status (
        id INTEGER PRIMARY KEY,
        status TEXT NOT NULL DEFAULT 'idle',
        script_name TEXT,
        start_time TIMESTAMPTZ,
        end_time TIMESTAMPTZ,
        output TEXT
    )
    "#,
    "INSERT INTO script_status (id, status) VALUES (1, 'idle') ON CONFLICT (id) DO NOTHING",
];

// Casts tolerate tables created by older tooling (INTEGER ids, TIMESTAMP without zone).
const ARTICLE_COLUMNS: &str = r#"
    id::BIGINT AS id, title, url, image, category, description,
    created_at::TIMESTAMPTZ AS created_at
"#;

const POST_SELECT: &str = r#"
    SELECT id,
           COALESCE(title, '') AS title,
           COALESCE(url, '') AS url,
           image,
           COALESCE(type, '') AS type,
           blog_url,
           "timestamp"::TIMESTAMPTZ AS "timestamp",
           COALESCE(manual_edit, FALSE) AS manual_edit
      FROM instagram_posts
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

}

fn article_from_row(row: &PgRow) -> Result<Article> {
    Ok(Article {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        image: row.try_get("image")?,
        category: row.try_get("category")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn post_from_row(row: &PgRow) -> Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        image: row.try_get("image")?,
        media_type: row.try_get("type")?,
        blog_url: row.try_get("blog_url")?,
        timestamp: row.try_get("timestamp")?,
        manual_edit: row.try_get("manual_edit")?,
    })
}

/// Keeps the last occurrence of each id; Postgres rejects a multi-row upsert
/// that touches the same row twice.
fn dedup_by_id(posts: &[Post]) -> Vec<&Post> {
    let mut last_index: BTreeMap<&str, usize> = BTreeMap::new();
    for (idx, post) in posts.iter().enumerate() {
        last_index.insert(post.id.as_str(), idx);
    }
    posts
        .iter()
        .enumerate()
        .filter(|(idx, post)| last_index.get(post.id.as_str()) == Some(idx))
        .map(|(_, post)| post)
        .collect()
}

#[async_trait]
impl ReconciliationStore for PgStore {
    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("database schema verified");
        Ok(())
    }

    async fn article_exists(&self, url: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i32>("SELECT 1 FROM blog_articles WHERE url = $1 LIMIT 1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn upsert_article(&self, draft: &ArticleDraft) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO blog_articles (title, url, image, category, description, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(&draft.title)
        .bind(&draft.url)
        .bind(&draft.image)
        .bind(&draft.category)
        .bind(&draft.description)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_articles(&self) -> Result<Vec<Article>> {
        let rows = sqlx::query(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM blog_articles ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(article_from_row).collect()
    }

    async fn upsert_posts(&self, posts: &[Post], mode: PostWriteMode) -> Result<u64> {
        let unique = dedup_by_id(posts);
        let mut affected = 0u64;

        for chunk in unique.chunks(MAX_BIND_PARAMS / POST_COLUMNS) {
            let manual = mode == PostWriteMode::Manual;
            let mut qb = QueryBuilder::<Postgres>::new(
                r#"INSERT INTO instagram_posts (id, title, url, image, type, blog_url, "timestamp", manual_edit) "#,
            );
            qb.push_values(chunk.iter(), |mut row, post| {
                row.push_bind(post.id.clone())
                    .push_bind(post.title.clone())
                    .push_bind(post.url.clone())
                    .push_bind(post.image.clone())
                    .push_bind(post.media_type.clone())
                    .push_bind(post.blog_url.clone())
                    .push_bind(post.timestamp)
                    .push_bind(manual);
            });
            qb.push(
                r#"
                ON CONFLICT (id) DO UPDATE SET
                    title = EXCLUDED.title,
                    url = EXCLUDED.url,
                    image = EXCLUDED.image,
                    type = EXCLUDED.type,
                    "timestamp" = EXCLUDED."timestamp"
                "#,
            );
            if manual {
                qb.push(", blog_url = EXCLUDED.blog_url, manual_edit = TRUE");
            }

            affected += qb.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(affected)
    }

    async fn list_posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            r#"{POST_SELECT} ORDER BY "timestamp" DESC NULLS LAST, id"#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(post_from_row).collect()
    }

    async fn list_unmapped_posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!("{POST_SELECT} WHERE blog_url IS NULL ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(post_from_row).collect()
    }

    async fn update_post_mapping(
        &self,
        post_id: &str,
        blog_url: &str,
        title: Option<&str>,
        manual: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE instagram_posts
               SET blog_url = $1,
                   title = COALESCE($2, title),
                   manual_edit = COALESCE(manual_edit, FALSE) OR $3
             WHERE id = $4
               AND ($3 OR blog_url IS NULL)
            "#,
        )
        .bind(blog_url)
        .bind(title)
        .bind(manual)
        .bind(post_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn posts_needing_timestamp(&self, since: DateTime<Utc>) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            r#"{POST_SELECT} WHERE "timestamp" IS NULL OR "timestamp" >= $1 ORDER BY id"#
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(post_from_row).collect()
    }

    async fn set_post_timestamp(&self, post_id: &str, timestamp: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(r#"UPDATE instagram_posts SET "timestamp" = $1 WHERE id = $2"#)
            .bind(timestamp)
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn job_status(&self) -> Result<JobStatus> {
        let row = sqlx::query(
            r#"
            SELECT status, script_name,
                   start_time::TIMESTAMPTZ AS start_time,
                   end_time::TIMESTAMPTZ AS end_time,
                   output
              FROM script_status
             WHERE id = $1
            "#,
        )
        .bind(JOB_STATUS_ROW_ID)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(JobStatus::default());
        };
        let status: String = row.try_get("status")?;
        Ok(JobStatus {
            status: status
                .parse::<JobState>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            script_name: row.try_get("script_name")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            output: row.try_get("output")?,
        })
    }

    async fn set_job_status(&self, status: &JobStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO script_status (id, status, script_name, start_time, end_time, output)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                script_name = EXCLUDED.script_name,
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                output = EXCLUDED.output
            "#,
        )
        .bind(JOB_STATUS_ROW_ID)
        .bind(status.status.as_str())
        .bind(&status.script_name)
        .bind(status.start_time)
        .bind(status.end_time)
        .bind(&status.output)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_article_id: i64,
    articles: Vec<Article>,
    posts: BTreeMap<String, Post>,
    job: JobStatus,
}

/// Process-local store with the same semantics as [`PgStore`]; used by tests
/// and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn post(&self, post_id: &str) -> Option<Post> {
        self.state.lock().await.posts.get(post_id).cloned()
    }

    pub async fn article_count(&self) -> usize {
        self.state.lock().await.articles.len()
    }
}

#[async_trait]
impl ReconciliationStore for MemoryStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn article_exists(&self, url: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.articles.iter().any(|a| a.url == url))
    }

    async fn upsert_article(&self, draft: &ArticleDraft) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.articles.iter().any(|a| a.url == draft.url) {
            return Ok(false);
        }
        state.next_article_id += 1;
        let article = Article {
            id: state.next_article_id,
            title: draft.title.clone(),
            url: draft.url.clone(),
            image: draft.image.clone(),
            category: draft.category.clone(),
            description: draft.description.clone(),
            created_at: Utc::now(),
        };
        state.articles.push(article);
        Ok(true)
    }

    async fn list_articles(&self) -> Result<Vec<Article>> {
        let state = self.state.lock().await;
        let mut articles = state.articles.clone();
        articles.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(articles)
    }

    async fn upsert_posts(&self, posts: &[Post], mode: PostWriteMode) -> Result<u64> {
        let mut state = self.state.lock().await;
        let stored = &mut state.posts;
        let mut affected = 0u64;
        for post in dedup_by_id(posts) {
            affected += 1;
            match stored.get_mut(&post.id) {
                Some(existing) => {
                    existing.title = post.title.clone();
                    existing.url = post.url.clone();
                    existing.image = post.image.clone();
                    existing.media_type = post.media_type.clone();
                    existing.timestamp = post.timestamp;
                    if mode == PostWriteMode::Manual {
                        existing.blog_url = post.blog_url.clone();
                        existing.manual_edit = true;
                    }
                }
                None => {
                    let mut fresh = post.clone();
                    fresh.manual_edit = mode == PostWriteMode::Manual;
                    stored.insert(fresh.id.clone(), fresh);
                }
            }
        }
        Ok(affected)
    }

    async fn list_posts(&self) -> Result<Vec<Post>> {
        let state = self.state.lock().await;
        let mut posts: Vec<Post> = state.posts.values().cloned().collect();
        // Newest first, untimed posts last; BTreeMap order breaks ties by id.
        posts.sort_by(|a, b| match (a.timestamp, b.timestamp) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Ok(posts)
    }

    async fn list_unmapped_posts(&self) -> Result<Vec<Post>> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .values()
            .filter(|p| p.blog_url.is_none())
            .cloned()
            .collect())
    }

    async fn update_post_mapping(
        &self,
        post_id: &str,
        blog_url: &str,
        title: Option<&str>,
        manual: bool,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(post) = state.posts.get_mut(post_id) else {
            return Ok(false);
        };
        if !manual && post.blog_url.is_some() {
            return Ok(false);
        }
        post.blog_url = Some(blog_url.to_string());
        if let Some(title) = title {
            post.title = title.to_string();
        }
        post.manual_edit |= manual;
        Ok(true)
    }

    async fn posts_needing_timestamp(&self, since: DateTime<Utc>) -> Result<Vec<Post>> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .values()
            .filter(|p| p.timestamp.map_or(true, |ts| ts >= since))
            .cloned()
            .collect())
    }

    async fn set_post_timestamp(&self, post_id: &str, timestamp: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(post) = state.posts.get_mut(post_id) else {
            return Ok(false);
        };
        post.timestamp = Some(timestamp);
        Ok(true)
    }

    async fn job_status(&self) -> Result<JobStatus> {
        Ok(self.state.lock().await.job.clone())
    }

    async fn set_job_status(&self, status: &JobStatus) -> Result<()> {
        self.state.lock().await.job = status.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn draft(title: &str, url: &str) -> ArticleDraft {
        ArticleDraft {
            title: title.to_string(),
            url: url.to_string(),
            image: None,
            category: Some("Garden".to_string()),
            description: None,
        }
    }

    fn post(id: &str, title: &str) -> Post {
        Post {
            id: id.to_string(),
            title: title.to_string(),
            url: format!("https://www.instagram.com/p/{id}/"),
            image: Some(format!("https://cdn.example.com/posts/{id}.jpg")),
            media_type: "image".to_string(),
            blog_url: None,
            timestamp: None,
            manual_edit: false,
        }
    }

    #[tokio::test]
    async fn article_upsert_is_idempotent_on_url() {
        let store = MemoryStore::new();
        assert!(store.upsert_article(&draft("First Title", "https://a/x/1")).await.unwrap());
        assert!(!store.upsert_article(&draft("Second Title", "https://a/x/1")).await.unwrap());

        let articles = store.list_articles().await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "First Title");
        assert!(store.article_exists("https://a/x/1").await.unwrap());
        assert!(!store.article_exists("https://a/x/2").await.unwrap());
    }

    #[tokio::test]
    async fn articles_list_newest_first() {
        let store = MemoryStore::new();
        store.upsert_article(&draft("One", "https://a/x/1")).await.unwrap();
        store.upsert_article(&draft("Two", "https://a/x/2")).await.unwrap();
        let titles: Vec<_> = store
            .list_articles()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, vec!["Two", "One"]);
    }

    #[tokio::test]
    async fn automated_upsert_never_touches_mapping() {
        let store = MemoryStore::new();
        store.upsert_posts(&[post("ig-1", "caption")], PostWriteMode::Automated).await.unwrap();
        store
            .update_post_mapping("ig-1", "https://a/x/1", None, true)
            .await
            .unwrap();

        let mut refreshed = post("ig-1", "new caption");
        refreshed.blog_url = None;
        store.upsert_posts(&[refreshed], PostWriteMode::Automated).await.unwrap();

        let stored = store.post("ig-1").await.unwrap();
        assert_eq!(stored.title, "new caption");
        assert_eq!(stored.blog_url.as_deref(), Some("https://a/x/1"));
        assert!(stored.manual_edit);
        assert!(store.list_unmapped_posts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn manual_upsert_overwrites_mapping_and_pins_flag() {
        let store = MemoryStore::new();
        store.upsert_posts(&[post("ig-1", "caption")], PostWriteMode::Automated).await.unwrap();
        assert!(!store.post("ig-1").await.unwrap().manual_edit);

        let mut edited = post("ig-1", "caption");
        edited.blog_url = Some("https://a/x/9".to_string());
        store.upsert_posts(&[edited], PostWriteMode::Manual).await.unwrap();

        let stored = store.post("ig-1").await.unwrap();
        assert_eq!(stored.blog_url.as_deref(), Some("https://a/x/9"));
        assert!(stored.manual_edit);
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_batch_keep_the_last() {
        let store = MemoryStore::new();
        let affected = store
            .upsert_posts(&[post("ig-1", "old"), post("ig-1", "new")], PostWriteMode::Automated)
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(store.post("ig-1").await.unwrap().title, "new");
    }

    #[tokio::test]
    async fn mapping_update_sets_title_only_when_given() {
        let store = MemoryStore::new();
        store.upsert_posts(&[post("ig-1", "caption")], PostWriteMode::Automated).await.unwrap();

        assert!(store
            .update_post_mapping("ig-1", "https://a/x/1", None, false)
            .await
            .unwrap());
        let stored = store.post("ig-1").await.unwrap();
        assert_eq!(stored.title, "caption");
        assert!(!stored.manual_edit);

        store
            .update_post_mapping("ig-1", "https://a/x/2", Some("Edited"), true)
            .await
            .unwrap();
        let stored = store.post("ig-1").await.unwrap();
        assert_eq!(stored.title, "Edited");
        assert_eq!(stored.blog_url.as_deref(), Some("https://a/x/2"));
        assert!(stored.manual_edit);

        assert!(!store
            .update_post_mapping("ig-404", "https://a/x/2", None, true)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn automated_mapping_never_replaces_an_existing_one() {
        let store = MemoryStore::new();
        store.upsert_posts(&[post("ig-1", "caption")], PostWriteMode::Automated).await.unwrap();
        store
            .update_post_mapping("ig-1", "https://a/x/human", None, true)
            .await
            .unwrap();

        assert!(!store
            .update_post_mapping("ig-1", "https://a/x/auto", None, false)
            .await
            .unwrap());
        let stored = store.post("ig-1").await.unwrap();
        assert_eq!(stored.blog_url.as_deref(), Some("https://a/x/human"));
        assert!(stored.manual_edit);

        assert!(store
            .update_post_mapping("ig-1", "https://a/x/again", None, true)
            .await
            .unwrap());
        assert_eq!(
            store.post("ig-1").await.unwrap().blog_url.as_deref(),
            Some("https://a/x/again")
        );
    }

    #[tokio::test]
    async fn timestamp_candidates_are_missing_or_recent() {
        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).single().unwrap();
        let mut old = post("ig-old", "old");
        old.timestamp = Some(now - Duration::days(30));
        let mut recent = post("ig-recent", "recent");
        recent.timestamp = Some(now - Duration::days(2));
        let missing = post("ig-missing", "missing");
        store
            .upsert_posts(&[old, recent, missing], PostWriteMode::Automated)
            .await
            .unwrap();

        let ids: Vec<_> = store
            .posts_needing_timestamp(now - Duration::days(7))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["ig-missing", "ig-recent"]);
    }

    #[tokio::test]
    async fn posts_list_newest_first_with_untimed_last() {
        let store = MemoryStore::new();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().unwrap();
        let mut a = post("ig-a", "a");
        a.timestamp = Some(base);
        let mut b = post("ig-b", "b");
        b.timestamp = Some(base + Duration::days(1));
        let c = post("ig-c", "c");
        store.upsert_posts(&[a, c, b], PostWriteMode::Automated).await.unwrap();

        let ids: Vec<_> = store.list_posts().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["ig-b", "ig-a", "ig-c"]);
    }

    #[tokio::test]
    async fn job_status_defaults_to_idle_and_round_trips() {
        let store = MemoryStore::new();
        assert_eq!(store.job_status().await.unwrap().status, JobState::Idle);

        let running = JobStatus {
            status: JobState::Running,
            script_name: Some("run-matching".to_string()),
            start_time: Some(Utc::now()),
            end_time: None,
            output: None,
        };
        store.set_job_status(&running).await.unwrap();
        assert_eq!(store.job_status().await.unwrap(), running);
    }

    #[test]
    fn post_chunks_stay_under_bind_limit() {
        assert!((MAX_BIND_PARAMS / POST_COLUMNS) * POST_COLUMNS <= MAX_BIND_PARAMS);
    }
}
