//! JSON admin API over the reconciliation store and the job runner.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use postlink_core::{JobName, Post};
use postlink_storage::{PostWriteMode, ReconciliationStore};
use postlink_sync::{JobRunner, ObjectStoreConfig, Pipelines};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "postlink-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReconciliationStore>,
    pub runner: JobRunner,
    /// Local media bucket served under `/media`, when images are kept on disk.
    pub media_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(pipelines: Arc<Pipelines>) -> Self {
        let media_dir = match &pipelines.config().object_store {
            ObjectStoreConfig::Filesystem { dir, .. } => Some(dir.clone()),
            ObjectStoreConfig::Http { .. } => None,
        };
        Self {
            store: pipelines.store(),
            runner: JobRunner::new(pipelines),
            media_dir,
        }
    }
}

/// Post as the admin UI reads it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: String,
    pub title: String,
    pub url: String,
    pub image: Option<String>,
    #[serde(rename = "type")]
    pub media_type: String,
    pub blog_url: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub manual_edit: bool,
}

impl From<Post> for PostView {
    fn from(post: Post) -> Self {
        Self {
            id: post.id,
            title: post.title,
            url: post.url,
            image: post.image,
            media_type: post.media_type,
            blog_url: post.blog_url,
            timestamp: post.timestamp,
            manual_edit: post.manual_edit,
        }
    }
}

/// Post as the admin UI sends it back.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostInput {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(rename = "type", default)]
    pub media_type: String,
    #[serde(default)]
    pub blog_url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<PostInput> for Post {
    fn from(input: PostInput) -> Self {
        Self {
            id: input.id,
            title: input.title,
            url: input.url,
            image: input.image,
            media_type: input.media_type,
            blog_url: input.blog_url,
            timestamp: input.timestamp,
            manual_edit: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SavePostsRequest {
    posts: Option<Vec<PostInput>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateMappingRequest {
    post_id: Option<String>,
    blog_url: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunScriptRequest {
    script: Option<String>,
}

pub fn app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/api/ping", get(ping_handler))
        .route("/api/articles", get(articles_handler))
        .route("/api/posts", get(posts_handler))
        .route("/api/save-posts", post(save_posts_handler))
        .route("/api/update-post-mapping", post(update_mapping_handler))
        .route("/api/script-status", get(script_status_handler))
        .route("/api/run-script", post(run_script_handler));
    if let Some(dir) = &state.media_dir {
        router = router.nest_service("/media", ServeDir::new(dir));
    }
    router.with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "admin api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn ping_handler() -> Response {
    Json(json!({ "status": "ok", "time": Utc::now().to_rfc3339() })).into_response()
}

async fn articles_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_articles().await {
        Ok(articles) => Json(articles).into_response(),
        Err(err) => server_error(err),
    }
}

async fn posts_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_posts().await {
        Ok(posts) => Json(posts.into_iter().map(PostView::from).collect::<Vec<_>>()).into_response(),
        Err(err) => server_error(err),
    }
}

async fn save_posts_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SavePostsRequest>, JsonRejection>,
) -> Response {
    let Some(posts) = payload.ok().and_then(|Json(body)| body.posts) else {
        return client_error(StatusCode::BAD_REQUEST, "Invalid posts data");
    };
    let posts: Vec<Post> = posts.into_iter().map(Post::from).collect();

    info!(count = posts.len(), "saving posts from admin");
    match state.store.upsert_posts(&posts, PostWriteMode::Manual).await {
        Ok(_) => Json(json!({ "success": true, "message": "Saved to database successfully" })).into_response(),
        Err(err) => server_error(err),
    }
}

async fn update_mapping_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateMappingRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = payload else {
        return client_error(StatusCode::BAD_REQUEST, "Missing postId or blogUrl");
    };
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(post_id), Some(blog_url)) = (non_empty(body.post_id), non_empty(body.blog_url)) else {
        return client_error(StatusCode::BAD_REQUEST, "Missing postId or blogUrl");
    };
    let title = non_empty(body.title);

    info!(post_id = post_id.as_str(), blog_url = blog_url.as_str(), "manual mapping update");
    match state
        .store
        .update_post_mapping(&post_id, &blog_url, title.as_deref(), true)
        .await
    {
        Ok(true) => Json(json!({ "success": true })).into_response(),
        Ok(false) => client_error(StatusCode::NOT_FOUND, &format!("Unknown post {post_id}")),
        Err(err) => server_error(err),
    }
}

async fn script_status_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.runner.tracker().current().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => server_error(err),
    }
}

async fn run_script_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RunScriptRequest>, JsonRejection>,
) -> Response {
    let script = payload
        .ok()
        .and_then(|Json(body)| body.script)
        .unwrap_or_default();
    let Ok(job) = script.parse::<JobName>() else {
        warn!(script = script.as_str(), "unknown script requested");
        let available = JobName::ALL.map(|j| j.as_str()).join(", ");
        return client_error(
            StatusCode::BAD_REQUEST,
            &format!("Unknown script. Available: {available}"),
        );
    };

    match state.runner.trigger(job).await {
        Ok(_) => (
            StatusCode::ACCEPTED,
            Json(json!({ "success": true, "message": "Script started", "script": job.as_str() })),
        )
            .into_response(),
        Err(err) => server_error(err),
    }
}

fn client_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn server_error(err: impl std::fmt::Display) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use postlink_core::{ArticleDraft, JobState};
    use postlink_storage::{FsObjectStore, HttpClientConfig, HttpFetcher, MemoryStore, ObjectStore};
    use postlink_sync::SyncConfig;
    use serde_json::Value;
    use tower::ServiceExt;

    struct Harness {
        store: Arc<MemoryStore>,
        app: Router,
        _media: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let media = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let pipelines = Pipelines::new(
            SyncConfig::default(),
            store.clone(),
            Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap()),
            Arc::new(FsObjectStore::new(media.path(), "http://localhost/media")),
            None,
            None,
        );
        Harness {
            store,
            app: app(AppState::new(Arc::new(pipelines))),
            _media: media,
        }
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn sample_post(id: &str, day: Option<u32>) -> Post {
        Post {
            id: id.to_string(),
            title: format!("post {id}"),
            url: format!("https://www.instagram.com/p/{id}/"),
            image: None,
            media_type: "image".to_string(),
            blog_url: None,
            timestamp: day.map(|d| Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap()),
            manual_edit: false,
        }
    }

    #[tokio::test]
    async fn mirrored_images_are_served_from_the_media_dir() {
        let media = tempfile::tempdir().unwrap();
        let objects = FsObjectStore::new(media.path(), "http://localhost:3001/media");
        let public_url = objects
            .put("posts/ig-7.jpg", &[0xff, 0xd8, 0xff], "image/jpeg")
            .await
            .unwrap();
        assert_eq!(public_url, "http://localhost:3001/media/posts/ig-7.jpg");

        let config = SyncConfig {
            object_store: ObjectStoreConfig::Filesystem {
                dir: media.path().to_path_buf(),
                public_url: "http://localhost:3001/media".to_string(),
            },
            ..SyncConfig::default()
        };
        let pipelines = Pipelines::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap()),
            Arc::new(objects),
            None,
            None,
        );
        let app = app(AppState::new(Arc::new(pipelines)));

        let resp = app.clone().oneshot(get("/media/posts/ig-7.jpg")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), &[0xff, 0xd8, 0xff]);

        let resp = app.oneshot(get("/media/posts/missing.jpg")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ping_reports_ok() {
        let h = harness();
        let (status, body) = send(&h.app, get("/api/ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["time"].is_string());
    }

    #[tokio::test]
    async fn posts_use_camel_case_and_recency_order() {
        let h = harness();
        h.store
            .upsert_posts(
                &[sample_post("a", Some(1)), sample_post("b", None), sample_post("c", Some(9))],
                PostWriteMode::Automated,
            )
            .await
            .unwrap();

        let (status, body) = send(&h.app, get("/api/posts")).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(body[0].get("blogUrl").is_some());
        assert_eq!(body[0]["type"], "image");
    }

    #[tokio::test]
    async fn articles_are_listed() {
        let h = harness();
        h.store
            .upsert_article(&ArticleDraft {
                title: "Sourdough Starter Secrets".to_string(),
                url: "https://nibsnetwork.com/food/sourdough/".to_string(),
                image: None,
                category: Some("Food".to_string()),
                description: None,
            })
            .await
            .unwrap();
        let (status, body) = send(&h.app, get("/api/articles")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["category"], "Food");
    }

    #[tokio::test]
    async fn mapping_update_validates_and_pins_manual_edit() {
        let h = harness();
        h.store
            .upsert_posts(&[sample_post("ig-1", Some(1))], PostWriteMode::Automated)
            .await
            .unwrap();

        let (status, _) = send(
            &h.app,
            post_json("/api/update-post-mapping", json!({ "postId": "ig-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &h.app,
            post_json(
                "/api/update-post-mapping",
                json!({ "postId": "ig-404", "blogUrl": "https://blog/x" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &h.app,
            post_json(
                "/api/update-post-mapping",
                json!({ "postId": "ig-1", "blogUrl": "https://blog/x", "title": "Renamed" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let stored = h.store.post("ig-1").await.unwrap();
        assert_eq!(stored.blog_url.as_deref(), Some("https://blog/x"));
        assert_eq!(stored.title, "Renamed");
        assert!(stored.manual_edit);
    }

    #[tokio::test]
    async fn save_posts_requires_a_list_and_marks_rows_manual() {
        let h = harness();
        let (status, body) = send(&h.app, post_json("/api/save-posts", json!({ "posts": "nope" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid posts data");

        let (status, _) = send(
            &h.app,
            post_json(
                "/api/save-posts",
                json!({ "posts": [{
                    "id": "ig-9",
                    "title": "Edited",
                    "url": "https://www.instagram.com/p/nine/",
                    "image": "https://cdn/nine.jpg",
                    "type": "video",
                    "blogUrl": "https://blog/nine",
                    "timestamp": "2024-05-02T08:00:00Z"
                }] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let stored = h.store.post("ig-9").await.unwrap();
        assert!(stored.manual_edit);
        assert_eq!(stored.blog_url.as_deref(), Some("https://blog/nine"));
        assert_eq!(stored.media_type, "video");
    }

    #[tokio::test]
    async fn script_status_defaults_to_idle() {
        let h = harness();
        let (status, body) = send(&h.app, get("/api/script-status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "idle");
    }

    #[tokio::test]
    async fn run_script_rejects_unknown_names() {
        let h = harness();
        let (status, body) = send(&h.app, post_json("/api/run-script", json!({ "script": "rm-rf" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("run-matching"));
    }

    #[tokio::test]
    async fn run_script_accepts_legacy_alias_and_finishes() {
        let h = harness();
        let (status, body) = send(&h.app, post_json("/api/run-script", json!({ "script": "auto-map" }))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["script"], "run-matching");

        let mut last = None;
        for _ in 0..100 {
            let current = h.store.job_status().await.unwrap();
            if current.status.is_terminal() {
                last = Some(current);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let last = last.expect("job never finished");
        assert_eq!(last.status, JobState::Completed);
        assert_eq!(last.script_name.as_deref(), Some("run-matching"));
    }
}
