#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

//! A thin async facade over S3-compatible object storage.
//!
//! # Features
//! - Bucket lifecycle: list, create (with an existence check), delete (drains objects first).
//! - Object listing that follows continuation tokens, eagerly or as a lazy page stream.
//! - Single-shot uploads from memory or a local file, with optional metadata.
//! - Metadata replacement through a same-location copy.
//! - Streaming downloads together with the object's metadata.
//! - Time-limited presigned download URLs and a plain HTTP fetch for them.
//! - Layered: Config → SDK client → Backend trait → Facade.
//!
//! # Usage
//! ```no_run
//! use s3_facade::{Config, ObjectStorage};
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = ObjectStorage::new(Config::from_env()).await?;
//!
//!     store.create_bucket("my-bucket").await?;
//!     let metadata = HashMap::from([("Project".to_string(), "HRMS".to_string())]);
//!     store
//!         .put_object_with_metadata("my-bucket", "File02.txt", "hello".as_bytes().to_vec(), metadata)
//!         .await?;
//!
//!     let object = store.get_object("my-bucket", "File02.txt").await?;
//!     println!("{:?}", object.metadata);
//!     let bytes = object.into_bytes().await?;
//!     assert_eq!(&bytes[..], b"hello");
//!
//!     let url = store.presigned_url("my-bucket", "File02.txt", 30).await?;
//!     let _stream = store.fetch_presigned_url_data(&url).await?;
//!
//!     store.delete_bucket("my-bucket").await?;
//!     Ok(())
//! }
//! ```

mod backends;
mod error;
mod object_storage;

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};

pub use backends::common::Backend;
pub use backends::memory::{MemoryBackend, MemoryOp};
pub use backends::s3::S3Backend;
pub use error::{Result, StorageError};
pub use object_storage::ObjectStorage;

/// Region used when neither the environment nor [`Config`] names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// String metadata attached to an object. Replaced wholesale on update.
pub type Metadata = HashMap<String, String>;

/// A stream of object bytes.
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Configuration for the S3 client.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Optional region (the SDK's provider chain wins when it resolves one).
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services such as MinIO.
    pub endpoint_url: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    pub force_path_style: bool,
}

impl Config {
    /// Reads `AWS_REGION`, `S3_ENDPOINT_URL` and `S3_FORCE_PATH_STYLE`.
    pub fn from_env() -> Self {
        let force_path_style = std::env::var("S3_FORCE_PATH_STYLE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self {
            region: std::env::var("AWS_REGION").ok().filter(|r| !r.is_empty()),
            endpoint_url: std::env::var("S3_ENDPOINT_URL")
                .ok()
                .filter(|u| !u.is_empty()),
            force_path_style,
        }
    }
}

/// A bucket as reported by the bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    /// Bucket name.
    pub name: String,
    /// Creation timestamp, when the store reports one.
    pub creation_date: Option<DateTime<Utc>>,
}

/// Handle returned by a successful bucket creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedBucket {
    /// Bucket name.
    pub name: String,
    /// Location reported by the store (e.g. `/my-bucket`).
    pub location: Option<String>,
}

/// Metadata for an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key within its bucket.
    pub key: String,
    /// Object size in bytes.
    pub size: Option<u64>,
    /// Last modified timestamp.
    pub last_modified: Option<DateTime<Utc>>,
    /// ETag (storage-specific).
    pub etag: Option<String>,
}

/// One page of an object listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects in this page, in store order.
    pub objects: Vec<ObjectInfo>,
    /// Token for the next page. Only meaningful when `truncated` is set.
    pub next_token: Option<String>,
    /// Whether more pages follow.
    pub truncated: bool,
}

/// Content for a single-shot upload.
#[derive(Debug, Clone)]
pub enum ObjectBody {
    /// In-memory bytes.
    Bytes(Bytes),
    /// A local file, read at upload time.
    File(PathBuf),
}

impl From<Bytes> for ObjectBody {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for ObjectBody {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<&'static [u8]> for ObjectBody {
    fn from(value: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(value))
    }
}

impl From<PathBuf> for ObjectBody {
    fn from(value: PathBuf) -> Self {
        Self::File(value)
    }
}

impl From<&std::path::Path> for ObjectBody {
    fn from(value: &std::path::Path) -> Self {
        Self::File(value.to_path_buf())
    }
}

/// What the store returned for an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutReceipt {
    /// ETag of the stored object.
    pub etag: Option<String>,
    /// Version id, on versioned buckets.
    pub version_id: Option<String>,
}

/// A fetched object: its byte stream plus current metadata.
pub struct StoredObject {
    /// Object content.
    pub body: ObjectStream,
    /// User metadata. Empty when none was stored.
    pub metadata: Metadata,
    /// Content length, when the store reports it.
    pub content_length: Option<u64>,
    /// ETag (storage-specific).
    pub etag: Option<String>,
}

impl StoredObject {
    /// Drains the body into a single buffer.
    pub async fn into_bytes(self) -> Result<Bytes> {
        collect_stream(self.body).await
    }
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("metadata", &self.metadata)
            .field("content_length", &self.content_length)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

/// Collects an [`ObjectStream`] into one contiguous buffer.
pub async fn collect_stream(stream: ObjectStream) -> Result<Bytes> {
    let chunks: Vec<Bytes> = stream.try_collect().await?;
    if chunks.len() == 1 {
        return Ok(chunks.into_iter().next().unwrap_or_default());
    }
    Ok(Bytes::from(chunks.concat()))
}
