use std::collections::BTreeMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, TryStreamExt};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::backends::common::Backend;
use crate::backends::s3::S3Backend;
use crate::{
    BucketInfo, Config, CreatedBucket, ListPage, Metadata, ObjectBody, ObjectInfo, ObjectStream,
    PutReceipt, Result, StorageError, StoredObject,
};

/// Rejection S3 sends instead of `BucketAlreadyExists` when the name is held
/// by another account in a different region.
const MALFORMED_AUTHORIZATION: &str = "The authorization header is malformed";

/// Unified object storage client.
///
/// Construct one per process or logical session and clone it freely; clones
/// share the backend and the HTTP client.
pub struct ObjectStorage<B = S3Backend> {
    backend: Arc<B>,
    http: reqwest::Client,
}

impl<B> Clone for ObjectStorage<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            http: self.http.clone(),
        }
    }
}

impl ObjectStorage<S3Backend> {
    /// Creates a storage client over S3.
    #[instrument]
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_backend(S3Backend::new(&config).await)
    }
}

impl<B: Backend> ObjectStorage<B> {
    /// Creates a storage client over any backend.
    pub fn with_backend(backend: B) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            backend: Arc::new(backend),
            http,
        })
    }

    /// The backend this client talks to.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Lists existing buckets.
    #[instrument(skip(self))]
    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.backend.list_buckets().await
    }

    /// Creates a bucket, failing with `AlreadyExists` if the name is taken.
    ///
    /// The existence check and the create call are two requests. Another
    /// creator can slip in between them; the store's rejection is then
    /// reported as `AlreadyExists` as well.
    #[instrument(skip(self))]
    pub async fn create_bucket(&self, name: &str) -> Result<CreatedBucket> {
        let existing = self.backend.list_buckets().await?;
        if existing.iter().any(|b| b.name == name) {
            return Err(StorageError::AlreadyExists {
                bucket: name.to_string(),
            });
        }
        match self.backend.create_bucket(name).await {
            Ok(created) => {
                info!(bucket = name, "bucket created");
                Ok(created)
            }
            Err(err) if is_name_collision(&err) => {
                warn!(bucket = name, error = %err, "bucket appeared after the existence check");
                Err(StorageError::AlreadyExists {
                    bucket: name.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Deletes a bucket after deleting every object in it.
    ///
    /// Stops at the first failure. Objects removed before that stay removed,
    /// so the call can simply be repeated. Returns the number of objects
    /// deleted.
    #[instrument(skip(self))]
    pub async fn delete_bucket(&self, name: &str) -> Result<usize> {
        let mut deleted = 0;
        let mut pages = pin!(self.object_pages(name));
        while let Some(page) = pages.try_next().await? {
            for object in page.objects {
                self.backend.delete_object(name, &object.key).await?;
                debug!(bucket = name, key = %object.key, "object deleted");
                deleted += 1;
            }
        }
        self.backend.delete_bucket(name).await?;
        info!(bucket = name, objects = deleted, "bucket deleted");
        Ok(deleted)
    }

    /// Lazily walks the listing of `bucket`, one page per item.
    ///
    /// Each call starts a fresh walk from the first page.
    pub fn object_pages<'a>(
        &'a self,
        bucket: &'a str,
    ) -> impl Stream<Item = Result<ListPage>> + Send + 'a {
        enum Cursor {
            Start,
            Next(String),
            Done,
        }

        futures::stream::try_unfold(Cursor::Start, move |cursor| async move {
            let token = match cursor {
                Cursor::Start => None,
                Cursor::Next(token) => Some(token),
                Cursor::Done => return Ok(None),
            };
            let page = self
                .backend
                .list_objects_page(bucket, token.as_deref())
                .await?;
            debug!(
                bucket,
                count = page.objects.len(),
                truncated = page.truncated,
                "fetched listing page"
            );
            let next = match (page.truncated, &page.next_token) {
                (false, _) => Cursor::Done,
                (true, Some(token)) => Cursor::Next(token.clone()),
                (true, None) => {
                    return Err(StorageError::provider(
                        None,
                        "truncated listing without a continuation token",
                    ))
                }
            };
            Ok(Some((page, next)))
        })
    }

    /// Lists every object in `bucket`, following continuation tokens.
    #[instrument(skip(self))]
    pub async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>> {
        self.object_pages(bucket)
            .try_fold(Vec::new(), |mut objects, page| async move {
                objects.extend(page.objects);
                Ok(objects)
            })
            .await
    }

    /// Uploads an object without metadata.
    #[instrument(skip(self, body))]
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<ObjectBody>,
    ) -> Result<PutReceipt> {
        self.backend
            .put_object(bucket, key, body.into(), None)
            .await
    }

    /// Uploads an object with user metadata, replacing any metadata the key had.
    #[instrument(skip(self, body, metadata))]
    pub async fn put_object_with_metadata(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<ObjectBody>,
        metadata: Metadata,
    ) -> Result<PutReceipt> {
        self.backend
            .put_object(bucket, key, body.into(), Some(metadata))
            .await
    }

    /// Replaces the metadata of an object, leaving its content unchanged.
    #[instrument(skip(self, metadata))]
    pub async fn update_metadata(&self, bucket: &str, key: &str, metadata: Metadata) -> Result<()> {
        self.backend
            .copy_object_replace_metadata(bucket, key, bucket, key, metadata)
            .await
    }

    /// Opens an object for reading.
    #[instrument(skip(self))]
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        self.backend.get_object(bucket, key).await
    }

    /// Returns a GET URL for `bucket/key` valid for `duration_minutes`.
    #[instrument(skip(self))]
    pub async fn presigned_url(&self, bucket: &str, key: &str, duration_minutes: u64) -> Result<Url> {
        let secs = duration_minutes.checked_mul(60).ok_or_else(|| {
            StorageError::InvalidArgument(format!("{duration_minutes} minutes is out of range"))
        })?;
        let url = self
            .backend
            .presign_get_object(bucket, key, Duration::from_secs(secs))
            .await?;
        debug!(bucket, key, duration_minutes, "presigned URL issued");
        Ok(url)
    }

    /// Presigns every key independently. A failure for one key is recorded
    /// under that key and does not stop the others.
    #[instrument(skip(self, keys))]
    pub async fn presigned_urls<I>(
        &self,
        bucket: &str,
        keys: I,
        duration_minutes: u64,
    ) -> BTreeMap<String, Result<Url>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut urls = BTreeMap::new();
        for key in keys {
            let key = key.as_ref();
            let result = self.presigned_url(bucket, key, duration_minutes).await;
            if let Err(err) = &result {
                warn!(bucket, key, error = %err, "presigning failed");
            }
            urls.insert(key.to_string(), result);
        }
        urls
    }

    /// Fetches the content behind a presigned URL with a plain HTTP GET.
    #[instrument(skip(self, url), fields(host = url.host_str()))]
    pub async fn fetch_presigned_url_data(&self, url: &Url) -> Result<ObjectStream> {
        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = match resp.text().await {
                Ok(text) if !text.is_empty() => text,
                Ok(_) => status.to_string(),
                Err(err) => {
                    debug!(error = %err, "could not read error body");
                    status.to_string()
                }
            };
            return Err(StorageError::Provider {
                code: Some(status.as_u16().to_string()),
                message,
            });
        }
        Ok(Box::pin(resp.bytes_stream().map_err(StorageError::from)))
    }
}

fn is_name_collision(err: &StorageError) -> bool {
    match err {
        StorageError::AlreadyExists { .. } => true,
        StorageError::Provider { message, .. } => message.contains(MALFORMED_AUTHORIZATION),
        _ => false,
    }
}
