//! OSS-style backend adapter.
//!
//! OSS clients are bound to one bucket, so sharding keeps a client per
//! shard bucket and routing picks the client.

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
    ListObjectV2Options, ListObjectV2Output, Marker, Meta, ObjectSummary, PutObjectOptions,
    RetryPolicy, ShardRouter, SignMethod, SignatureUrlOptions, StandardHeaders, StorageAdapter,
};

pub use self::api::*;
pub use self::http::{OssClientConfig, OssHttpClient, META_PREFIX};

use self::http::overlay_header_map;
use crate::backend::transport::strip_prefixed;

const OVERLAY_HEADERS: [&str; 3] = ["cache-control", "content-disposition", "content-encoding"];

/// OSS reports a missing object as 404; a HEAD may also come back 304.
pub fn is_not_found(err: &OssError) -> bool {
    matches!(err.status(), Some(404) | Some(304))
}

pub struct OssAdapter {
    clients: ShardRouter<Arc<dyn OssApi>>,
    retry: RetryPolicy,
}

impl OssAdapter {
    pub fn new(clients: ShardRouter<Arc<dyn OssApi>>, retry: RetryPolicy) -> Self {
        Self { clients, retry }
    }

    fn client(&self, key: &str) -> AwosResult<&Arc<dyn OssApi>> {
        self.clients.route(key)
    }

    fn write_options(options: &PutObjectOptions) -> OssWriteOptions {
        OssWriteOptions {
            mime: options.effective_content_type().to_string(),
            meta: options.meta.clone(),
            headers: overlay_header_map(options.headers.iter()),
        }
    }
}

fn summaries(objects: Vec<OssObject>) -> Vec<ObjectSummary> {
    objects
        .into_iter()
        .map(|o| ObjectSummary {
            key: o.name,
            etag: o.etag,
            last_modified: o.last_modified,
            size: o.size,
        })
        .collect()
}

#[async_trait]
impl StorageAdapter for OssAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Oss
    }

    async fn get_as_buffer(
        &self,
        key: &str,
        meta_keys: &[String],
    ) -> AwosResult<Option<GetBufferedObjectResponse>> {
        let client = self.client(key)?;
        let result = match client.get(key).await {
            Ok(result) if result.res.status == 304 => return Ok(None),
            Ok(result) => result,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(AwosError::backend(e)),
        };

        let raw = &result.res.headers;
        let stored_meta = strip_prefixed(raw, META_PREFIX);
        let meta: Meta = meta_keys
            .iter()
            .filter_map(|k| {
                stored_meta
                    .get(&k.to_lowercase())
                    .map(|v| (k.clone(), v.clone()))
            })
            .collect();

        let mut headers = HashMap::new();
        StandardHeaders::from_header_map(raw).merge_into(&mut headers);
        for name in OVERLAY_HEADERS {
            if let Some(value) = raw.get(name) {
                headers.insert(name.to_string(), value.clone());
            }
        }

        debug!(bucket = %client.bucket(), key = %key, size = result.content.len(), "Fetched object");
        Ok(Some(GetBufferedObjectResponse {
            content: result.content,
            meta,
            headers,
        }))
    }

    async fn put(&self, key: &str, data: Bytes, options: &PutObjectOptions) -> AwosResult<()> {
        let client = self.client(key)?;
        let write = Self::write_options(options);

        self.retry
            .run("put", || {
                let client = Arc::clone(client);
                let data = data.clone();
                let write = write.clone();
                let key = key.to_string();
                async move {
                    client
                        .put(&key, data, &write)
                        .await
                        .map_err(AwosError::backend)
                }
            })
            .await?;
        debug!(bucket = %client.bucket(), key = %key, "Stored object");
        Ok(())
    }

    async fn copy(&self, key: &str, source: &str, options: &CopyObjectOptions) -> AwosResult<()> {
        let client = self.client(key)?;
        let source_bucket = self.client(source)?.bucket().to_string();
        let copy_options = OssCopyOptions {
            write: Self::write_options(options),
            replace_meta: !options.meta.is_empty(),
        };

        self.retry
            .run("copy", || {
                let client = Arc::clone(client);
                let copy_options = copy_options.clone();
                let key = key.to_string();
                let source = source.to_string();
                let source_bucket = source_bucket.clone();
                async move {
                    client
                        .copy(&key, &source, &source_bucket, &copy_options)
                        .await
                        .map_err(AwosError::backend)
                }
            })
            .await?;
        debug!(
            bucket = %client.bucket(),
            key = %key,
            source_bucket = %source_bucket,
            source = %source,
            replace_meta = copy_options.replace_meta,
            "Copied object"
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> AwosResult<()> {
        let client = self.client(key)?;
        client.delete(key).await.map_err(AwosError::backend)?;
        debug!(bucket = %client.bucket(), key = %key, "Deleted object");
        Ok(())
    }

    async fn del_multi(&self, keys: &[String]) -> AwosResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.clients.route_batch(keys)?;

        // Verbose mode: OSS only lists what it deleted, failures are the rest.
        let result = client
            .delete_multi(keys, false)
            .await
            .map_err(AwosError::backend)?;
        let failed: Vec<String> = keys
            .iter()
            .filter(|k| !result.deleted.contains(*k))
            .cloned()
            .collect();

        debug!(
            bucket = %client.bucket(),
            requested = keys.len(),
            failed = failed.len(),
            "Bulk delete finished"
        );
        Ok(failed)
    }

    async fn head(&self, key: &str, options: &HeadOptions) -> AwosResult<Option<Meta>> {
        let client = self.client(key)?;
        let result = match client.head(key).await {
            Ok(result) if result.status == 304 => return Ok(None),
            Ok(result) => result,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(AwosError::backend(e)),
        };

        let mut meta = result.meta;
        if options.with_standard_headers {
            StandardHeaders::from_header_map(&result.res.headers).merge_into(&mut meta);
        }
        Ok(Some(meta))
    }

    async fn list_details(
        &self,
        key: &str,
        options: &ListObjectOptions,
    ) -> AwosResult<ListObjectOutput> {
        let client = self.client(key)?;
        let result = client
            .list(&OssListQuery {
                prefix: options.prefix.clone(),
                marker: options.marker.as_ref().map(|m| m.as_str().to_string()),
                delimiter: options.delimiter.clone(),
                max_keys: options.max_keys,
            })
            .await
            .map_err(AwosError::backend)?;

        debug!(
            bucket = %client.bucket(),
            objects = result.objects.len(),
            prefixes = result.prefixes.len(),
            truncated = result.is_truncated,
            "Listed objects"
        );
        Ok(ListObjectOutput {
            is_truncated: result.is_truncated,
            objects: summaries(result.objects),
            prefixes: result.prefixes,
            next_marker: result.next_marker.map(Marker::new),
        })
    }

    async fn list_details_v2(
        &self,
        key: &str,
        options: &ListObjectV2Options,
    ) -> AwosResult<ListObjectV2Output> {
        let client = self.client(key)?;
        let result = client
            .list_v2(&OssListV2Query {
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
            bucket = %client.bucket(),
            objects = result.objects.len(),
            prefixes = result.prefixes.len(),
            truncated = result.is_truncated,
            "Listed objects (v2)"
        );
        Ok(ListObjectV2Output {
            is_truncated: result.is_truncated,
            objects: summaries(result.objects),
            prefix: result.prefixes,
            next_continuation_token: result.next_continuation_token.map(ContinuationToken::new),
        })
    }

    async fn signature_url(&self, key: &str, options: &SignatureUrlOptions) -> AwosResult<String> {
        let client = self.client(key)?;
        let method = match options.method {
            SignMethod::Get => OssSignMethod::Get,
            SignMethod::Put => OssSignMethod::Put,
        };
        client
            .signature_url(key, method, options.expires)
            .map_err(AwosError::backend)
    }
}
