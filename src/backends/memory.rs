use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};
use url::Url;

use crate::backends::common::Backend;
use crate::{
    BucketInfo, CreatedBucket, ListPage, Metadata, ObjectBody, ObjectInfo, PutReceipt, Result,
    StorageError, StoredObject,
};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Operations that can be made to fail once, see [`MemoryBackend::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    /// `list_buckets`
    ListBuckets,
    /// `create_bucket`
    CreateBucket,
    /// `list_objects_page`
    ListObjectsPage,
    /// `delete_object`
    DeleteObject,
    /// `delete_bucket`
    DeleteBucket,
    /// `put_object`
    PutObject,
    /// `copy_object_replace_metadata`
    CopyObject,
    /// `get_object`
    GetObject,
    /// `presign_get_object`
    PresignGetObject,
}

#[derive(Debug, Clone)]
struct MemObject {
    data: Bytes,
    metadata: Metadata,
    etag: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemBucket {
    creation_date: Option<DateTime<Utc>>,
    objects: BTreeMap<String, MemObject>,
}

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<String, MemBucket>,
    next_etag: u64,
}

/// An in-process store with S3 listing, deletion and presigning semantics.
///
/// Keys are listed in lexicographic order and paged `page_size` at a time;
/// the continuation token is the last key of the previous page. Presigned
/// URLs use the `memory://store/?bucket=..&key=..&expires=<unix millis>` form and are
/// resolved with [`MemoryBackend::open_presigned`].
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<RwLock<State>>,
    faults: Arc<Mutex<HashMap<MemoryOp, StorageError>>>,
    page_size: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty store with S3's default page size of 1000.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Empty store returning at most `page_size` objects per listing page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            faults: Arc::new(Mutex::new(HashMap::new())),
            page_size: page_size.max(1),
        }
    }

    /// Makes the next call of `op` fail with `err`. Used to simulate
    /// rejections and interrupted sequences.
    pub async fn fail_next(&self, op: MemoryOp, err: StorageError) {
        self.faults.lock().await.insert(op, err);
    }

    /// Number of objects currently stored in `bucket`, or `None` if the bucket is missing.
    pub async fn object_count(&self, bucket: &str) -> Option<usize> {
        self.state
            .read()
            .await
            .buckets
            .get(bucket)
            .map(|b| b.objects.len())
    }

    /// Resolves a presigned URL issued by this backend, as an HTTP GET would.
    pub async fn open_presigned(&self, url: &Url) -> Result<Bytes> {
        if url.scheme() != "memory" {
            return Err(StorageError::InvalidArgument(format!(
                "not a memory URL: {url}"
            )));
        }
        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };
        let (Some(bucket), Some(key)) = (param("bucket"), param("key")) else {
            return Err(StorageError::provider(Some("InvalidRequest"), "malformed presigned URL"));
        };
        let expires = param("expires")
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| StorageError::provider(Some("AccessDenied"), "missing expiry"))?;
        if Utc::now().timestamp_millis() >= expires {
            return Err(StorageError::provider(
                Some("AccessDenied"),
                "Request has expired",
            ));
        }
        let state = self.state.read().await;
        state
            .buckets
            .get(&bucket)
            .and_then(|b| b.objects.get(&key))
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::not_found(format!("{bucket}/{key}")))
    }

    async fn take_fault(&self, op: MemoryOp) -> Result<()> {
        match self.faults.lock().await.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn read_body(body: ObjectBody) -> Result<Bytes> {
    match body {
        ObjectBody::Bytes(bytes) => Ok(bytes),
        ObjectBody::File(path) => tokio::fs::read(&path).await.map(Bytes::from).map_err(|e| {
            StorageError::LocalSource {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        }),
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    #[instrument(skip(self))]
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.take_fault(MemoryOp::ListBuckets).await?;
        let state = self.state.read().await;
        Ok(state
            .buckets
            .iter()
            .map(|(name, bucket)| BucketInfo {
                name: name.clone(),
                creation_date: bucket.creation_date,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn create_bucket(&self, name: &str) -> Result<CreatedBucket> {
        self.take_fault(MemoryOp::CreateBucket).await?;
        let mut state = self.state.write().await;
        if state.buckets.contains_key(name) {
            return Err(StorageError::AlreadyExists {
                bucket: name.to_string(),
            });
        }
        state.buckets.insert(
            name.to_string(),
            MemBucket {
                creation_date: Some(Utc::now()),
                objects: BTreeMap::new(),
            },
        );
        Ok(CreatedBucket {
            name: name.to_string(),
            location: Some(format!("/{name}")),
        })
    }

    #[instrument(skip(self))]
    async fn list_objects_page(
        &self,
        bucket: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage> {
        self.take_fault(MemoryOp::ListObjectsPage).await?;
        let state = self.state.read().await;
        let objects = &state
            .buckets
            .get(bucket)
            .ok_or_else(|| StorageError::not_found(bucket))?
            .objects;
        let remaining: Vec<(&String, &MemObject)> = match continuation_token {
            Some(after) => objects
                .range::<str, _>((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .collect(),
            None => objects.iter().collect(),
        };
        let truncated = remaining.len() > self.page_size;
        let page: Vec<ObjectInfo> = remaining
            .into_iter()
            .take(self.page_size)
            .map(|(key, obj)| ObjectInfo {
                key: key.clone(),
                size: Some(obj.data.len() as u64),
                last_modified: Some(obj.last_modified),
                etag: Some(obj.etag.clone()),
            })
            .collect();
        let next_token = if truncated {
            page.last().map(|o| o.key.clone())
        } else {
            None
        };
        debug!(bucket, count = page.len(), truncated, "listed page");
        Ok(ListPage {
            objects: page,
            next_token,
            truncated,
        })
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.take_fault(MemoryOp::DeleteObject).await?;
        let mut state = self.state.write().await;
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::not_found(bucket))?;
        b.objects.remove(key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.take_fault(MemoryOp::DeleteBucket).await?;
        let mut state = self.state.write().await;
        match state.buckets.get(name) {
            None => Err(StorageError::not_found(name)),
            Some(b) if !b.objects.is_empty() => Err(StorageError::provider(
                Some("BucketNotEmpty"),
                "The bucket you tried to delete is not empty",
            )),
            Some(_) => {
                state.buckets.remove(name);
                Ok(())
            }
        }
    }

    #[instrument(skip(self, body, metadata))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        metadata: Option<Metadata>,
    ) -> Result<PutReceipt> {
        self.take_fault(MemoryOp::PutObject).await?;
        let data = read_body(body).await?;
        let mut state = self.state.write().await;
        let State { buckets, next_etag } = &mut *state;
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::not_found(bucket))?;
        *next_etag += 1;
        let etag = format!("\"{:032x}\"", *next_etag);
        b.objects.insert(
            key.to_string(),
            MemObject {
                data,
                metadata: metadata.unwrap_or_default(),
                etag: etag.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(PutReceipt {
            etag: Some(etag),
            version_id: None,
        })
    }

    #[instrument(skip(self, metadata))]
    async fn copy_object_replace_metadata(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: Metadata,
    ) -> Result<()> {
        self.take_fault(MemoryOp::CopyObject).await?;
        let mut state = self.state.write().await;
        let source = state
            .buckets
            .get(src_bucket)
            .and_then(|b| b.objects.get(src_key))
            .cloned()
            .ok_or_else(|| StorageError::not_found(format!("{src_bucket}/{src_key}")))?;
        let dest = state
            .buckets
            .get_mut(dest_bucket)
            .ok_or_else(|| StorageError::not_found(dest_bucket))?;
        dest.objects.insert(
            dest_key.to_string(),
            MemObject {
                metadata,
                last_modified: Utc::now(),
                ..source
            },
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        self.take_fault(MemoryOp::GetObject).await?;
        let state = self.state.read().await;
        let obj = state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .ok_or_else(|| StorageError::not_found(format!("{bucket}/{key}")))?;
        let data = obj.data.clone();
        Ok(StoredObject {
            content_length: Some(data.len() as u64),
            metadata: obj.metadata.clone(),
            etag: Some(obj.etag.clone()),
            body: Box::pin(futures::stream::once(async move { Ok(data) })),
        })
    }

    #[instrument(skip(self))]
    async fn presign_get_object(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<Url> {
        self.take_fault(MemoryOp::PresignGetObject).await?;
        let ttl = chrono::Duration::from_std(expires_in)
            .map_err(|e| StorageError::InvalidArgument(e.to_string()))?;
        let expires = (Utc::now() + ttl).timestamp_millis();
        let mut url = Url::parse("memory://store/")
            .map_err(|e| StorageError::InvalidArgument(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("bucket", bucket)
            .append_pair("key", key)
            .append_pair("expires", &expires.to_string());
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_follow_the_token() {
        let backend = MemoryBackend::with_page_size(2);
        backend.create_bucket("b").await.unwrap();
        for key in ["a", "b", "c", "d", "e"] {
            backend
                .put_object("b", key, ObjectBody::Bytes(Bytes::from_static(b"x")), None)
                .await
                .unwrap();
        }

        let first = backend.list_objects_page("b", None).await.unwrap();
        assert!(first.truncated);
        assert_eq!(first.next_token.as_deref(), Some("b"));

        let last = backend.list_objects_page("b", Some("d")).await.unwrap();
        assert!(!last.truncated);
        assert_eq!(last.next_token, None);
        assert_eq!(last.objects.len(), 1);
        assert_eq!(last.objects[0].key, "e");
    }

    #[tokio::test]
    async fn refuses_to_delete_non_empty_bucket() {
        let backend = MemoryBackend::new();
        backend.create_bucket("b").await.unwrap();
        backend
            .put_object("b", "k", Bytes::from_static(b"x").into(), None)
            .await
            .unwrap();
        let err = backend.delete_bucket("b").await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Provider { code: Some(ref c), .. } if c == "BucketNotEmpty"
        ));
        // deleting a missing key is a no-op
        backend.delete_object("b", "missing").await.unwrap();
    }

    #[tokio::test]
    async fn failed_put_leaves_etag_sequence_untouched() {
        let backend = MemoryBackend::new();
        let err = backend
            .put_object("missing", "k", Bytes::from_static(b"x").into(), None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        backend.create_bucket("b").await.unwrap();
        let receipt = backend
            .put_object("b", "k", Bytes::from_static(b"x").into(), None)
            .await
            .unwrap();
        assert_eq!(receipt.etag.as_deref(), Some(format!("\"{:032x}\"", 1).as_str()));
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let backend = MemoryBackend::new();
        backend
            .fail_next(MemoryOp::ListBuckets, StorageError::provider(Some("InternalError"), "boom"))
            .await;
        assert!(backend.list_buckets().await.is_err());
        assert!(backend.list_buckets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn presigned_url_resolves_until_expiry() {
        let backend = MemoryBackend::new();
        backend.create_bucket("b").await.unwrap();
        backend
            .put_object("b", "dir/k.txt", Bytes::from_static(b"data").into(), None)
            .await
            .unwrap();

        let live = backend
            .presign_get_object("b", "dir/k.txt", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(live.scheme(), "memory");
        assert_eq!(backend.open_presigned(&live).await.unwrap(), Bytes::from_static(b"data"));

        let expired = backend
            .presign_get_object("b", "dir/k.txt", Duration::ZERO)
            .await
            .unwrap();
        assert!(backend.open_presigned(&expired).await.is_err());
    }
}
