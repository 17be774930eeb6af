//! In-memory S3 and OSS clients for tests.
//!
//! Both fakes share one [`MemoryStore`] so sharded setups and cross-bucket
//! copies behave like they would against one service account.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};

use super::oss::{
    OssApi, OssCopyOptions, OssDeleteMultiResult, OssError, OssGetResult, OssHeadResult,
    OssListQuery, OssListResult, OssListV2Query, OssListV2Result, OssObject, OssResponse,
    OssSignMethod, OssWriteOptions,
};
use super::s3::*;

const DEFAULT_MAX_KEYS: u32 = 1000;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
    /// Lowercase keys.
    pub meta: HashMap<String, String>,
    /// Overlay headers (cache-control, ...), lowercase names.
    pub headers: HashMap<String, String>,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn new(
        data: Bytes,
        content_type: String,
        meta: &HashMap<String, String>,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            etag: format!("\"{:x}\"", md5::compute(&data)),
            data,
            content_type,
            meta: meta
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
            headers,
            last_modified: Utc::now().trunc_subsecs(0),
        }
    }

    /// Response headers as a service would send them.
    fn response_headers(&self, meta_prefix: &str) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        headers.insert("content-type".into(), self.content_type.clone());
        headers.insert("content-length".into(), self.data.len().to_string());
        headers.insert("accept-ranges".into(), "bytes".into());
        headers.insert("etag".into(), self.etag.clone());
        headers.insert("last-modified".into(), self.last_modified.to_rfc2822());
        for (k, v) in &self.meta {
            headers.insert(format!("{}{}", meta_prefix, k), v.clone());
        }
        headers
    }
}

/// One listing page before it is shaped into a backend response.
#[derive(Debug, Default)]
pub struct Page {
    pub objects: Vec<(String, StoredObject)>,
    pub prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Last key or prefix returned.
    pub last: Option<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
    failing_writes: AtomicU32,
    write_attempts: AtomicU32,
    delete_batches: AtomicU32,
    denied_deletes: Mutex<HashSet<String>>,
    not_modified: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` put/copy attempts fail with a transient error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn delete_batches(&self) -> u32 {
        self.delete_batches.load(Ordering::SeqCst)
    }

    /// Bulk deletes report this key as failed.
    pub fn deny_delete(&self, key: &str) {
        self.denied_deletes.lock().unwrap().insert(key.to_string());
    }

    /// HEAD of this key answers 304.
    pub fn mark_not_modified(&self, key: &str) {
        self.not_modified.lock().unwrap().insert(key.to_string());
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.fetch(bucket, key).is_some()
    }

    /// Count a write attempt; false when it should fail.
    fn begin_write(&self) -> bool {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    fn insert(&self, bucket: &str, key: &str, object: StoredObject) {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    fn fetch(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
    }

    fn remove(&self, bucket: &str, key: &str) {
        if let Some(objects) = self.buckets.lock().unwrap().get_mut(bucket) {
            objects.remove(key);
        }
    }

    /// Bulk delete; returns the keys that were refused.
    fn remove_batch(&self, bucket: &str, keys: &[String]) -> Vec<String> {
        self.delete_batches.fetch_add(1, Ordering::SeqCst);
        let denied = self.denied_deletes.lock().unwrap().clone();
        let mut refused = Vec::new();
        for key in keys {
            if denied.contains(key) {
                refused.push(key.clone());
            } else {
                self.remove(bucket, key);
            }
        }
        refused
    }

    /// List `bucket` in key order, starting strictly after `after`.
    pub fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        after: Option<&str>,
        max_keys: Option<u32>,
    ) -> Page {
        let prefix = prefix.unwrap_or("");
        let max_keys = max_keys.unwrap_or(DEFAULT_MAX_KEYS) as usize;
        let buckets = self.buckets.lock().unwrap();
        let mut page = Page::default();
        let Some(objects) = buckets.get(bucket) else {
            return page;
        };

        let mut count = 0;
        for (key, object) in objects.iter() {
            if !key.starts_with(prefix) {
                continue;
            }
            if after.is_some_and(|a| key.as_str() <= a) {
                continue;
            }

            let grouped = delimiter.filter(|d| !d.is_empty()).and_then(|d| {
                key[prefix.len()..]
                    .find(d)
                    .map(|idx| key[..prefix.len() + idx + d.len()].to_string())
            });
            if let Some(common) = &grouped {
                if after.is_some_and(|a| common.as_str() <= a) {
                    continue;
                }
                if page.prefixes.last() == Some(common) {
                    continue;
                }
            }

            if count == max_keys {
                page.is_truncated = true;
                break;
            }
            count += 1;
            match grouped {
                Some(common) => {
                    page.last = Some(common.clone());
                    page.prefixes.push(common);
                }
                None => {
                    page.last = Some(key.clone());
                    page.objects.push((key.clone(), object.clone()));
                }
            }
        }
        page
    }
}

fn presigned(bucket: &str, key: &str, method: &str, expires: u64) -> String {
    format!(
        "memory://{}/{}?method={}&expires={}",
        bucket, key, method, expires
    )
}

fn s3_error(status_code: u16, code: &str) -> S3Error {
    S3Error::Service {
        status_code,
        code: code.to_string(),
        message: String::new(),
        request_id: None,
    }
}

fn overlay(
    cache_control: &Option<String>,
    content_disposition: &Option<String>,
    content_encoding: &Option<String>,
) -> HashMap<String, String> {
    [
        ("cache-control", cache_control),
        ("content-disposition", content_disposition),
        ("content-encoding", content_encoding),
    ]
    .into_iter()
    .filter_map(|(name, value)| value.clone().map(|v| (name.to_string(), v)))
    .collect()
}

/// S3 fake. One instance serves every bucket.
pub struct MemoryS3 {
    store: Arc<MemoryStore>,
}

impl MemoryS3 {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    fn s3_objects(page: &Page) -> Vec<S3Object> {
        page.objects
            .iter()
            .map(|(key, o)| S3Object {
                key: key.clone(),
                etag: o.etag.clone(),
                last_modified: Some(o.last_modified),
                size: o.data.len() as u64,
            })
            .collect()
    }
}

impl Deref for MemoryS3 {
    type Target = MemoryStore;

    fn deref(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl S3Api for MemoryS3 {
    async fn get_object(&self, req: GetObjectRequest) -> Result<GetObjectOutput, S3Error> {
        let object = self
            .store
            .fetch(&req.bucket, &req.key)
            .ok_or_else(|| s3_error(404, "NoSuchKey"))?;
        Ok(GetObjectOutput {
            content_type: Some(object.content_type.clone()),
            content_length: Some(object.data.len() as u64),
            accept_ranges: Some("bytes".into()),
            etag: Some(object.etag.clone()),
            last_modified: Some(object.last_modified),
            cache_control: object.headers.get("cache-control").cloned(),
            content_disposition: object.headers.get("content-disposition").cloned(),
            content_encoding: object.headers.get("content-encoding").cloned(),
            metadata: object.meta.clone(),
            body: object.data,
        })
    }

    async fn put_object(&self, req: PutObjectRequest) -> Result<(), S3Error> {
        if !self.store.begin_write() {
            return Err(s3_error(503, "SlowDown"));
        }
        let headers = overlay(&req.cache_control, &req.content_disposition, &req.content_encoding);
        let object = StoredObject::new(req.body, req.content_type, &req.metadata, headers);
        self.store.insert(&req.bucket, &req.key, object);
        Ok(())
    }

    async fn copy_object(&self, req: CopyObjectRequest) -> Result<(), S3Error> {
        if !self.store.begin_write() {
            return Err(s3_error(503, "SlowDown"));
        }
        let source = self
            .store
            .fetch(&req.source_bucket, &req.source_key)
            .ok_or_else(|| s3_error(404, "NoSuchKey"))?;
        let object = match req.metadata_directive {
            MetadataDirective::Copy => StoredObject::new(
                source.data,
                source.content_type,
                &source.meta,
                source.headers,
            ),
            MetadataDirective::Replace => StoredObject::new(
                source.data,
                req.content_type,
                &req.metadata,
                overlay(&req.cache_control, &req.content_disposition, &req.content_encoding),
            ),
        };
        self.store.insert(&req.bucket, &req.key, object);
        Ok(())
    }

    async fn delete_object(&self, req: DeleteObjectRequest) -> Result<(), S3Error> {
        self.store.remove(&req.bucket, &req.key);
        Ok(())
    }

    async fn delete_objects(
        &self,
        req: DeleteObjectsRequest,
    ) -> Result<DeleteObjectsOutput, S3Error> {
        let refused = self.store.remove_batch(&req.bucket, &req.keys);
        let deleted = if req.quiet {
            Vec::new()
        } else {
            req.keys
                .iter()
                .filter(|k| !refused.contains(*k))
                .cloned()
                .collect()
        };
        Ok(DeleteObjectsOutput {
            deleted,
            errors: refused
                .into_iter()
                .map(|key| DeleteObjectsError {
                    key,
                    code: Some("AccessDenied".into()),
                    message: None,
                })
                .collect(),
        })
    }

    async fn head_object(&self, req: HeadObjectRequest) -> Result<HeadObjectOutput, S3Error> {
        let object = self
            .store
            .fetch(&req.bucket, &req.key)
            .ok_or_else(|| s3_error(404, "NotFound"))?;
        Ok(HeadObjectOutput {
            content_type: Some(object.content_type.clone()),
            content_length: Some(object.data.len() as u64),
            accept_ranges: Some("bytes".into()),
            etag: Some(object.etag.clone()),
            last_modified: Some(object.last_modified),
            metadata: object.meta,
        })
    }

    async fn list_objects(&self, req: ListObjectsRequest) -> Result<ListObjectsOutput, S3Error> {
        let page = self.store.list(
            &req.bucket,
            req.prefix.as_deref(),
            req.delimiter.as_deref(),
            req.marker.as_deref(),
            req.max_keys,
        );
        // Like S3, NextMarker only comes back for delimited listings.
        let next_marker = if page.is_truncated && req.delimiter.is_some() {
            page.last.clone()
        } else {
            None
        };
        Ok(ListObjectsOutput {
            is_truncated: page.is_truncated,
            contents: Self::s3_objects(&page),
            common_prefixes: page.prefixes,
            next_marker,
        })
    }

    async fn list_objects_v2(
        &self,
        req: ListObjectsV2Request,
    ) -> Result<ListObjectsV2Output, S3Error> {
        let page = self.store.list(
            &req.bucket,
            req.prefix.as_deref(),
            req.delimiter.as_deref(),
            req.continuation_token.as_deref(),
            req.max_keys,
        );
        let next_continuation_token = if page.is_truncated {
            page.last.clone()
        } else {
            None
        };
        Ok(ListObjectsV2Output {
            is_truncated: page.is_truncated,
            contents: Self::s3_objects(&page),
            common_prefixes: page.prefixes,
            next_continuation_token,
        })
    }

    async fn presigned_url(&self, req: PresignRequest) -> Result<String, S3Error> {
        let method = match req.operation {
            PresignOperation::GetObject => "GET",
            PresignOperation::PutObject => "PUT",
        };
        Ok(presigned(
            &req.bucket,
            &req.key,
            method,
            req.expires_secs.unwrap_or(900),
        ))
    }
}

fn oss_error(status: u16, code: &str) -> OssError {
    OssError::Service {
        status,
        code: code.to_string(),
        message: String::new(),
        request_id: None,
    }
}

fn ok_response() -> OssResponse {
    OssResponse {
        status: 200,
        headers: HashMap::new(),
    }
}

/// OSS fake bound to one bucket of a shared store.
pub struct MemoryOss {
    bucket: String,
    store: Arc<MemoryStore>,
}

impl MemoryOss {
    pub fn new(store: Arc<MemoryStore>, bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            store,
        }
    }

    fn oss_objects(page: &Page) -> Vec<OssObject> {
        page.objects
            .iter()
            .map(|(key, o)| OssObject {
                name: key.clone(),
                etag: o.etag.clone(),
                last_modified: Some(o.last_modified),
                size: o.data.len() as u64,
            })
            .collect()
    }
}

#[async_trait]
impl OssApi for MemoryOss {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, name: &str) -> Result<OssGetResult, OssError> {
        if self.store.not_modified.lock().unwrap().contains(name) {
            return Ok(OssGetResult {
                content: Bytes::new(),
                res: OssResponse {
                    status: 304,
                    headers: HashMap::new(),
                },
            });
        }
        let object = self
            .store
            .fetch(&self.bucket, name)
            .ok_or_else(|| oss_error(404, "NoSuchKey"))?;
        Ok(OssGetResult {
            res: OssResponse {
                status: 200,
                headers: object.response_headers("x-oss-meta-"),
            },
            content: object.data,
        })
    }

    async fn put(
        &self,
        name: &str,
        data: Bytes,
        options: &OssWriteOptions,
    ) -> Result<OssResponse, OssError> {
        if !self.store.begin_write() {
            return Err(oss_error(503, "ServiceUnavailable"));
        }
        let object = StoredObject::new(
            data,
            options.mime.clone(),
            &options.meta,
            options.headers.clone(),
        );
        self.store.insert(&self.bucket, name, object);
        Ok(ok_response())
    }

    async fn copy(
        &self,
        name: &str,
        source: &str,
        source_bucket: &str,
        options: &OssCopyOptions,
    ) -> Result<OssResponse, OssError> {
        if !self.store.begin_write() {
            return Err(oss_error(503, "ServiceUnavailable"));
        }
        let source = self
            .store
            .fetch(source_bucket, source)
            .ok_or_else(|| oss_error(404, "NoSuchKey"))?;
        let object = if options.replace_meta {
            StoredObject::new(
                source.data,
                options.write.mime.clone(),
                &options.write.meta,
                options.write.headers.clone(),
            )
        } else {
            StoredObject::new(source.data, source.content_type, &source.meta, source.headers)
        };
        self.store.insert(&self.bucket, name, object);
        Ok(ok_response())
    }

    async fn delete(&self, name: &str) -> Result<OssResponse, OssError> {
        self.store.remove(&self.bucket, name);
        Ok(OssResponse {
            status: 204,
            headers: HashMap::new(),
        })
    }

    async fn delete_multi(
        &self,
        names: &[String],
        quiet: bool,
    ) -> Result<OssDeleteMultiResult, OssError> {
        let refused = self.store.remove_batch(&self.bucket, names);
        let deleted = if quiet {
            Vec::new()
        } else {
            names
                .iter()
                .filter(|k| !refused.contains(*k))
                .cloned()
                .collect()
        };
        Ok(OssDeleteMultiResult {
            deleted,
            res: ok_response(),
        })
    }

    async fn head(&self, name: &str) -> Result<OssHeadResult, OssError> {
        if self.store.not_modified.lock().unwrap().contains(name) {
            return Ok(OssHeadResult {
                meta: HashMap::new(),
                status: 304,
                res: OssResponse {
                    status: 304,
                    headers: HashMap::new(),
                },
            });
        }
        let object = self
            .store
            .fetch(&self.bucket, name)
            .ok_or_else(|| oss_error(404, "NoSuchKey"))?;
        Ok(OssHeadResult {
            meta: object.meta.clone(),
            status: 200,
            res: OssResponse {
                status: 200,
                headers: object.response_headers("x-oss-meta-"),
            },
        })
    }

    async fn list(&self, query: &OssListQuery) -> Result<OssListResult, OssError> {
        let page = self.store.list(
            &self.bucket,
            query.prefix.as_deref(),
            query.delimiter.as_deref(),
            query.marker.as_deref(),
            query.max_keys,
        );
        let next_marker = if page.is_truncated {
            page.last.clone()
        } else {
            None
        };
        Ok(OssListResult {
            objects: Self::oss_objects(&page),
            prefixes: page.prefixes,
            is_truncated: page.is_truncated,
            next_marker,
            res: ok_response(),
        })
    }

    async fn list_v2(&self, query: &OssListV2Query) -> Result<OssListV2Result, OssError> {
        let page = self.store.list(
            &self.bucket,
            query.prefix.as_deref(),
            query.delimiter.as_deref(),
            query.continuation_token.as_deref(),
            query.max_keys,
        );
        let next_continuation_token = if page.is_truncated {
            page.last.clone()
        } else {
            None
        };
        Ok(OssListV2Result {
            objects: Self::oss_objects(&page),
            prefixes: page.prefixes,
            is_truncated: page.is_truncated,
            next_continuation_token,
            res: ok_response(),
        })
    }

    fn signature_url(
        &self,
        name: &str,
        method: OssSignMethod,
        expires: Option<u64>,
    ) -> Result<String, OssError> {
        Ok(presigned(&self.bucket, name, method.as_str(), expires.unwrap_or(1800)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(keys: &[&str]) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        for key in keys {
            store.insert(
                "b",
                key,
                StoredObject::new(Bytes::from("x"), "text/plain".into(), &HashMap::new(), HashMap::new()),
            );
        }
        store
    }

    #[test]
    fn test_list_groups_by_delimiter_and_resumes_after_prefix() {
        let store = store_with(&["a/1", "a/2", "b/1", "c", "d/1"]);
        let first = store.list("b", None, Some("/"), None, Some(2));
        assert_eq!(first.prefixes, vec!["a/", "b/"]);
        assert!(first.objects.is_empty());
        assert!(first.is_truncated);
        assert_eq!(first.last.as_deref(), Some("b/"));

        let second = store.list("b", None, Some("/"), first.last.as_deref(), Some(2));
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].0, "c");
        assert_eq!(second.prefixes, vec!["d/"]);
        assert!(!second.is_truncated);
    }

    #[test]
    fn test_list_exact_fit_is_not_truncated() {
        let store = store_with(&["k1", "k2"]);
        let page = store.list("b", Some("k"), None, None, Some(2));
        assert_eq!(page.objects.len(), 2);
        assert!(!page.is_truncated);
    }

    #[test]
    fn test_failing_writes_counter() {
        let store = MemoryStore::new();
        store.fail_next_writes(1);
        assert!(!store.begin_write());
        assert!(store.begin_write());
        assert_eq!(store.write_attempts(), 2);
    }
}
