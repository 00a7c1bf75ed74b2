use std::time::Duration;

use url::Url;

use crate::{
    BucketInfo, CreatedBucket, ListPage, Metadata, ObjectBody, PutReceipt, Result, StoredObject,
};

#[async_trait::async_trait]
/// Trait for store-specific operations.
///
/// One method per remote call. Implementations translate store failures into
/// [`crate::StorageError`] and never retry.
pub trait Backend: Send + Sync {
    /// Lists every bucket visible to the caller.
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    /// Creates a bucket. A name collision reported by the store maps to
    /// `AlreadyExists`.
    async fn create_bucket(&self, name: &str) -> Result<CreatedBucket>;

    /// Fetches one listing page, starting after `continuation_token` when given.
    async fn list_objects_page(
        &self,
        bucket: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage>;

    /// Deletes an object. Deleting a missing key succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Deletes an empty bucket.
    async fn delete_bucket(&self, name: &str) -> Result<()>;

    /// Uploads a whole object in one request.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        metadata: Option<Metadata>,
    ) -> Result<PutReceipt>;

    /// Copies an object, replacing the destination's metadata with `metadata`.
    async fn copy_object_replace_metadata(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: Metadata,
    ) -> Result<()>;

    /// Opens an object for reading.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject>;

    /// Signs a GET for `bucket/key` valid for `expires_in` from now.
    async fn presign_get_object(&self, bucket: &str, key: &str, expires_in: Duration)
        -> Result<Url>;
}
