use std::sync::Arc;
use std::time::Duration;

use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration, MetadataDirective};
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, instrument};
use url::Url;

use crate::backends::common::Backend;
use crate::{
    BucketInfo, Config, CreatedBucket, ListPage, Metadata, ObjectBody, ObjectInfo, ObjectStream,
    PutReceipt, Result, StorageError, StoredObject, DEFAULT_REGION,
};

/// Backend over the AWS SDK S3 client.
#[derive(Clone)]
pub struct S3Backend {
    client: Arc<S3Client>,
    region: Option<String>,
}

impl S3Backend {
    /// Builds a client from the environment, with `config` taking precedence.
    #[instrument]
    pub async fn new(config: &Config) -> Self {
        let region_provider = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(DEFAULT_REGION));
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let region = sdk_config.region().map(|r| r.to_string());
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();
        debug!(region = ?region, "S3 client configured");
        Self::from_client(S3Client::from_conf(s3_config), region)
    }

    /// Wraps an already configured client.
    pub fn from_client(client: S3Client, region: Option<String>) -> Self {
        Self {
            client: Arc::new(client),
            region,
        }
    }
}

/// Maps an SDK failure onto the crate's error taxonomy.
fn classify<E>(err: SdkError<E>, resource: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match err.code() {
        Some("NoSuchBucket" | "NoSuchKey" | "NotFound") => StorageError::not_found(resource),
        Some("BucketAlreadyExists" | "BucketAlreadyOwnedByYou") => StorageError::AlreadyExists {
            bucket: resource.to_string(),
        },
        code => {
            if code.is_none() && err.raw_response().map(|r| r.status().as_u16()) == Some(404) {
                return StorageError::not_found(resource);
            }
            let message = err
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
            StorageError::provider(code, message)
        }
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// Characters left unescaped in `x-amz-copy-source`: RFC 3986 unreserved plus `/`.
const COPY_SOURCE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

fn encode_copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE_SET))
}

fn into_object_stream(body: ByteStream) -> ObjectStream {
    Box::pin(futures::stream::try_unfold(body, |mut body| async move {
        match body.try_next().await {
            Ok(Some(chunk)) => Ok(Some((chunk, body))),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::provider(
                None,
                format!("reading object body: {e}"),
            )),
        }
    }))
}

#[async_trait::async_trait]
impl Backend for S3Backend {
    #[instrument(skip(self))]
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let mut buckets = vec![];
        let mut continuation_token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_buckets()
                .set_continuation_token(continuation_token)
                .send()
                .await
                .map_err(|e| classify(e, "buckets"))?;
            for bucket in resp.buckets() {
                let Some(name) = bucket.name() else { continue };
                buckets.push(BucketInfo {
                    name: name.to_string(),
                    creation_date: bucket.creation_date().and_then(to_chrono),
                });
            }
            continuation_token = resp.continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }
        Ok(buckets)
    }

    #[instrument(skip(self))]
    async fn create_bucket(&self, name: &str) -> Result<CreatedBucket> {
        let mut req = self.client.create_bucket().bucket(name);
        // us-east-1 rejects an explicit location constraint.
        if let Some(region) = self.region.as_deref().filter(|r| *r != DEFAULT_REGION) {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        let resp = req.send().await.map_err(|e| classify(e, name))?;
        Ok(CreatedBucket {
            name: name.to_string(),
            location: resp.location().map(str::to_string),
        })
    }

    #[instrument(skip(self))]
    async fn list_objects_page(
        &self,
        bucket: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| classify(e, bucket))?;
        let mut objects = Vec::with_capacity(resp.contents().len());
        for obj in resp.contents() {
            let key = obj
                .key()
                .ok_or_else(|| StorageError::provider(None, "listing entry without a key"))?;
            objects.push(ObjectInfo {
                key: key.to_string(),
                size: obj.size().and_then(|s| u64::try_from(s).ok()),
                last_modified: obj.last_modified().and_then(to_chrono),
                etag: obj.e_tag().map(str::to_string),
            });
        }
        Ok(ListPage {
            objects,
            next_token: resp.next_continuation_token().map(str::to_string),
            truncated: resp.is_truncated().unwrap_or(false),
        })
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, &format!("{bucket}/{key}")))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.client
            .delete_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(|e| classify(e, name))?;
        Ok(())
    }

    #[instrument(skip(self, body, metadata))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        metadata: Option<Metadata>,
    ) -> Result<PutReceipt> {
        let body = match body {
            ObjectBody::Bytes(bytes) => ByteStream::from(bytes),
            ObjectBody::File(path) => {
                ByteStream::from_path(&path)
                    .await
                    .map_err(|e| StorageError::LocalSource {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })?
            }
        };
        let resp = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_metadata(metadata)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(e, &format!("{bucket}/{key}")))?;
        Ok(PutReceipt {
            etag: resp.e_tag().map(str::to_string),
            version_id: resp.version_id().map(str::to_string),
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
        self.client
            .copy_object()
            .copy_source(encode_copy_source(src_bucket, src_key))
            .bucket(dest_bucket)
            .key(dest_key)
            .set_metadata(Some(metadata))
            .metadata_directive(MetadataDirective::Replace)
            .send()
            .await
            .map_err(|e| classify(e, &format!("{src_bucket}/{src_key}")))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, &format!("{bucket}/{key}")))?;
        let metadata = resp.metadata().cloned().unwrap_or_default();
        let content_length = resp.content_length().and_then(|l| u64::try_from(l).ok());
        let etag = resp.e_tag().map(str::to_string);
        Ok(StoredObject {
            body: into_object_stream(resp.body),
            metadata,
            content_length,
            etag,
        })
    }

    #[instrument(skip(self))]
    async fn presign_get_object(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<Url> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::InvalidArgument(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| classify(e, &format!("{bucket}/{key}")))?;
        Url::parse(request.uri())
            .map_err(|e| StorageError::provider(None, format!("presigned URL is invalid: {e}")))
    }
}
