//! HTTP fetch utilities, object storage, and the reconciliation store for postlink.

pub mod http;
pub mod objects;
pub mod store;

pub use http::{
    redact_query, strip_error_query, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, HttpGet, RetryDisposition,
};
pub use objects::{FsObjectStore, HttpObjectStore, ObjectStore, ObjectStoreError, StoredObject};
pub use store::{MemoryStore, PgStore, PostWriteMode, ReconciliationStore, StoreError};

pub const CRATE_NAME: &str = "postlink-storage";
