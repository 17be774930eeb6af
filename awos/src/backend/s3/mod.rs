//! S3-style backend adapter.
//!
//! Handles AWS S3 and S3-compatible services. Requests go through an
//! [`S3Api`] client shared by every shard bucket; the adapter only picks the
//! bucket, shapes the request and normalizes the response.

pub mod api;
pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use awos_common::{
    AwosError, AwosResult, BackendKind, ContinuationToken, CopyObjectOptions,
    GetBufferedObjectResponse, HeadOptions, ListObjectOptions, ListObjectOutput,
    ListObjectV2Options, ListObjectV2Output, Marker, Meta, ObjectSummary, PutObjectHeaders,
    PutObjectOptions, RetryPolicy, ShardRouter, SignMethod, SignatureUrlOptions,
    StandardHeaders, StorageAdapter,
};

pub use self::api::*;
pub use self::http::{S3ClientConfig, S3HttpClient, SignatureVersion};

/// S3 signals a missing object with a bare 404 (HEAD has no body, so there
/// is no error code to look at).
pub fn is_not_found(err: &S3Error) -> bool {
    err.status_code() == Some(404)
}

pub struct S3Adapter {
    client: Arc<dyn S3Api>,
    buckets: ShardRouter<String>,
    retry: RetryPolicy,
}

impl S3Adapter {
    pub fn new(client: Arc<dyn S3Api>, buckets: ShardRouter<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            buckets,
            retry,
        }
    }

    fn bucket(&self, key: &str) -> AwosResult<&str> {
        self.buckets.route(key).map(String::as_str)
    }
}

/// Pick the requested metadata keys out of the stored (lowercase) metadata,
/// reporting them under the caller's spelling.
fn select_meta(stored: &HashMap<String, String>, meta_keys: &[String]) -> Meta {
    meta_keys
        .iter()
        .filter_map(|k| stored.get(&k.to_lowercase()).map(|v| (k.clone(), v.clone())))
        .collect()
}

fn buffered_response(output: GetObjectOutput, meta_keys: &[String]) -> GetBufferedObjectResponse {
    let mut headers = HashMap::new();
    StandardHeaders {
        content_type: output.content_type,
        content_length: output.content_length,
        accept_ranges: output.accept_ranges,
        etag: output.etag,
        last_modified: output.last_modified,
    }
    .merge_into(&mut headers);
    PutObjectHeaders {
        cache_control: output.cache_control,
        content_disposition: output.content_disposition,
        content_encoding: output.content_encoding,
    }
    .merge_into(&mut headers);

    GetBufferedObjectResponse {
        content: output.body,
        meta: select_meta(&output.metadata, meta_keys),
        headers,
    }
}

fn summaries(contents: Vec<S3Object>) -> Vec<ObjectSummary> {
    contents
        .into_iter()
        .map(|o| ObjectSummary {
            key: o.key,
            etag: o.etag,
            last_modified: o.last_modified,
            size: o.size,
        })
        .collect()
}

/// S3 only returns `NextMarker` when a delimiter was used; otherwise the
/// next page starts after the last key (or prefix) of this one.
fn next_marker(output: &ListObjectsOutput) -> Option<String> {
    if !output.is_truncated {
        return output.next_marker.clone();
    }
    output.next_marker.clone().or_else(|| {
        let last_key = output.contents.last().map(|o| o.key.as_str());
        let last_prefix = output.common_prefixes.last().map(String::as_str);
        last_key.max(last_prefix).map(str::to_string)
    })
}

#[async_trait]
impl StorageAdapter for S3Adapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Aws
    }

    async fn get_as_buffer(
        &self,
        key: &str,
        meta_keys: &[String],
    ) -> AwosResult<Option<GetBufferedObjectResponse>> {
        let bucket = self.bucket(key)?;
        let request = GetObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        match self.client.get_object(request).await {
            Ok(output) => {
                debug!(bucket = %bucket, key = %key, size = output.body.len(), "Fetched object");
                Ok(Some(buffered_response(output, meta_keys)))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(AwosError::backend(e)),
        }
    }

    async fn put(&self, key: &str, data: Bytes, options: &PutObjectOptions) -> AwosResult<()> {
        let bucket = self.bucket(key)?;
        let request = PutObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body: data,
            content_type: options.effective_content_type().to_string(),
            metadata: options.meta.clone(),
            cache_control: options.headers.cache_control.clone(),
            content_disposition: options.headers.content_disposition.clone(),
            content_encoding: options.headers.content_encoding.clone(),
        };

        self.retry
            .run("put", || {
                let client = Arc::clone(&self.client);
                let request = request.clone();
                async move { client.put_object(request).await.map_err(AwosError::backend) }
            })
            .await?;
        debug!(bucket = %bucket, key = %key, "Stored object");
        Ok(())
    }

    async fn copy(&self, key: &str, source: &str, options: &CopyObjectOptions) -> AwosResult<()> {
        let bucket = self.bucket(key)?;
        let source_bucket = self.bucket(source)?;
        let metadata_directive = if options.meta.is_empty() {
            MetadataDirective::Copy
        } else {
            MetadataDirective::Replace
        };
        let request = CopyObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source_bucket: source_bucket.to_string(),
            source_key: source.to_string(),
            metadata_directive,
            content_type: options.effective_content_type().to_string(),
            metadata: options.meta.clone(),
            cache_control: options.headers.cache_control.clone(),
            content_disposition: options.headers.content_disposition.clone(),
            content_encoding: options.headers.content_encoding.clone(),
        };

        self.retry
            .run("copy", || {
                let client = Arc::clone(&self.client);
                let request = request.clone();
                async move { client.copy_object(request).await.map_err(AwosError::backend) }
            })
            .await?;
        debug!(
            bucket = %bucket,
            key = %key,
            source_bucket = %source_bucket,
            source = %source,
            directive = metadata_directive.as_str(),
            "Copied object"
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> AwosResult<()> {
        let bucket = self.bucket(key)?;
        self.client
            .delete_object(DeleteObjectRequest {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
            .await
            .map_err(AwosError::backend)?;
        debug!(bucket = %bucket, key = %key, "Deleted object");
        Ok(())
    }

    async fn del_multi(&self, keys: &[String]) -> AwosResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let bucket = self.buckets.route_batch(keys)?;
        let output = self
            .client
            .delete_objects(DeleteObjectsRequest {
                bucket: bucket.clone(),
                keys: keys.to_vec(),
                quiet: true,
            })
            .await
            .map_err(AwosError::backend)?;

        let failed: Vec<String> = output.errors.into_iter().map(|e| e.key).collect();
        debug!(
            bucket = %bucket,
            requested = keys.len(),
            failed = failed.len(),
            "Bulk delete finished"
        );
        Ok(failed)
    }

    async fn head(&self, key: &str, options: &HeadOptions) -> AwosResult<Option<Meta>> {
        let bucket = self.bucket(key)?;
        let output = match self
            .client
            .head_object(HeadObjectRequest {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
            .await
        {
            Ok(output) => output,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(AwosError::backend(e)),
        };

        let mut meta = output.metadata;
        if options.with_standard_headers {
            StandardHeaders {
                content_type: output.content_type,
                content_length: output.content_length,
                accept_ranges: output.accept_ranges,
                etag: output.etag,
                last_modified: output.last_modified,
            }
            .merge_into(&mut meta);
        }
        Ok(Some(meta))
    }

    async fn list_details(
        &self,
        key: &str,
        options: &ListObjectOptions,
    ) -> AwosResult<ListObjectOutput> {
        let bucket = self.bucket(key)?;
        let output = self
            .client
            .list_objects(ListObjectsRequest {
                bucket: bucket.to_string(),
                prefix: options.prefix.clone(),
                marker: options.marker.as_ref().map(|m| m.as_str().to_string()),
                delimiter: options.delimiter.clone(),
                max_keys: options.max_keys,
            })
            .await
            .map_err(AwosError::backend)?;

        let next_marker = next_marker(&output).map(Marker::new);
        debug!(
            bucket = %bucket,
            objects = output.contents.len(),
            prefixes = output.common_prefixes.len(),
            truncated = output.is_truncated,
            "Listed objects"
        );
        Ok(ListObjectOutput {
            is_truncated: output.is_truncated,
            objects: summaries(output.contents),
            prefixes: output.common_prefixes,
            next_marker,
        })
    }

    async fn list_details_v2(
        &self,
        key: &str,
        options: &ListObjectV2Options,
    ) -> AwosResult<ListObjectV2Output> {
        let bucket = self.bucket(key)?;
        let output = self
            .client
            .list_objects_v2(ListObjectsV2Request {
                bucket: bucket.to_string(),
                prefix: options.prefix.clone(),
                delimiter: options.delimiter.clone(),
                max_keys: options.max_keys,
                continuation_token: options
                    .continuation_token
                    .as_ref()
                    .map(|t| t.as_str().to_string()),
            })
            .await
            .map_err(AwosError::backend)?;

        debug!(
            bucket = %bucket,
            objects = output.contents.len(),
            prefixes = output.common_prefixes.len(),
            truncated = output.is_truncated,
            "Listed objects (v2)"
        );
        Ok(ListObjectV2Output {
            is_truncated: output.is_truncated,
            objects: summaries(output.contents),
            prefix: output.common_prefixes,
            next_continuation_token: output.next_continuation_token.map(ContinuationToken::new),
        })
    }

    async fn signature_url(&self, key: &str, options: &SignatureUrlOptions) -> AwosResult<String> {
        let bucket = self.bucket(key)?;
        let operation = match options.method {
            SignMethod::Get => PresignOperation::GetObject,
            SignMethod::Put => PresignOperation::PutObject,
        };
        self.client
            .presigned_url(PresignRequest {
                operation,
                bucket: bucket.to_string(),
                key: key.to_string(),
                expires_secs: options.expires,
            })
            .await
            .map_err(AwosError::backend)
    }
}
