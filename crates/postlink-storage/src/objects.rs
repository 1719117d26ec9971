use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error("io error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("upload request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upload rejected with status {status} for {key}")]
    Rejected { status: u16, key: String },
}

/// Write-side contract of the media bucket: `put` returns the public URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ObjectStoreError>;
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content_hash: String,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub unchanged: bool,
}

/// Bucket laid out on a local directory that is served at `public_base_url`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    /// Writes `bytes` at `key` through a temp file and rename, so readers never
    /// see a partial object. Identical content already at `key` is left alone.
    pub async fn store_bytes(&self, key: &str, bytes: &[u8]) -> Result<StoredObject, ObjectStoreError> {
        let relative = validate_key(key)?;
        let absolute_path = self.root.join(&relative);
        let content_hash = Self::sha256_hex(bytes);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ObjectStoreError::Io { path, source }
        };

        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent).await.map_err(io_err(&parent))?;

        if let Ok(existing) = fs::read(&absolute_path).await {
            if Self::sha256_hex(&existing) == content_hash {
                return Ok(StoredObject {
                    content_hash,
                    absolute_path,
                    byte_size: bytes.len(),
                    unchanged: true,
                });
            }
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(io_err(&temp_path))?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;
        drop(file);
        if let Err(source) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ObjectStoreError::Io {
                path: temp_path,
                source,
            });
        }

        if let Err(source) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ObjectStoreError::Io {
                path: absolute_path,
                source,
            });
        }

        Ok(StoredObject {
            content_hash,
            absolute_path,
            byte_size: bytes.len(),
            unchanged: false,
        })
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        let stored = self.store_bytes(key, bytes).await?;
        debug!(key, unchanged = stored.unchanged, bytes = stored.byte_size, "stored object");
        Ok(self.public_url(key))
    }
}

/// Bucket behind an S3-compatible HTTP endpoint that accepts `PUT /{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
    public_base_url: String,
}

impl HttpObjectStore {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        bucket: &str,
        token: Option<&str>,
        public_base_url: Option<&str>,
    ) -> Self {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let public_base_url = public_base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{endpoint}/{bucket}"));
        Self {
            client,
            endpoint,
            bucket: bucket.to_string(),
            token: token.map(String::from),
            public_base_url,
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        validate_key(key)?;
        let mut request = self
            .client
            .put(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ObjectStoreError::Rejected {
                status: status.as_u16(),
                key: key.to_string(),
            });
        }
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

fn validate_key(key: &str) -> Result<PathBuf, ObjectStoreError> {
    let path = PathBuf::from(key);
    let only_normal = path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if key.is_empty() || !only_normal {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hashing_is_stable() {
        let hash = FsObjectStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn repeated_put_of_same_bytes_is_unchanged() {
        let dir = tempdir().expect("tempdir");
        let store = FsObjectStore::new(dir.path(), "https://cdn.example.com/");

        let first = store
            .store_bytes("posts/ig-1.jpg", b"jpeg-bytes")
            .await
            .expect("first store");
        let second = store
            .store_bytes("posts/ig-1.jpg", b"jpeg-bytes")
            .await
            .expect("second store");

        assert!(!first.unchanged);
        assert!(second.unchanged);
        assert_eq!(first.content_hash, second.content_hash);
        assert!(first.absolute_path.exists());
    }

    #[tokio::test]
    async fn put_overwrites_changed_content_and_returns_public_url() {
        let dir = tempdir().expect("tempdir");
        let store = FsObjectStore::new(dir.path(), "https://cdn.example.com");

        store.put("posts/ig-2.jpg", b"old", "image/jpeg").await.expect("put old");
        let url = store
            .put("posts/ig-2.jpg", b"new", "image/jpeg")
            .await
            .expect("put new");

        assert_eq!(url, "https://cdn.example.com/posts/ig-2.jpg");
        let on_disk = std::fs::read(dir.path().join("posts/ig-2.jpg")).expect("read back");
        assert_eq!(on_disk, b"new");
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_root() {
        let dir = tempdir().expect("tempdir");
        let store = FsObjectStore::new(dir.path(), "https://cdn.example.com");

        for key in ["../evil.jpg", "/etc/passwd", ""] {
            let err = store.put(key, b"x", "image/jpeg").await.unwrap_err();
            assert!(matches!(err, ObjectStoreError::InvalidKey(_)), "{key}");
        }
    }

    #[test]
    fn http_store_defaults_public_url_to_bucket_path() {
        let store = HttpObjectStore::new(
            reqwest::Client::new(),
            "https://s3.example.com/",
            "media",
            None,
            None,
        );
        assert_eq!(
            store.object_url("posts/ig-1.jpg"),
            "https://s3.example.com/media/posts/ig-1.jpg"
        );
        assert_eq!(store.public_base_url, "https://s3.example.com/media");
    }
}
