use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AwosResult;
use crate::types::{
    CopyObjectOptions, GetBufferedObjectResponse, GetObjectResponse, HeadOptions,
    ListObjectOptions, ListObjectOutput, ListObjectV2Options, ListObjectV2Output, Meta,
    PutObjectOptions, SignatureUrlOptions,
};

/// Both backends cap bulk deletes at this many keys per request.
pub const MAX_DELETE_BATCH: usize = 1000;

/// The two supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// AWS S3 and S3-compatible services (MinIO, Ceph, ...).
    Aws,
    /// Aliyun OSS.
    Oss,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Aws => f.write_str("aws"),
            BackendKind::Oss => f.write_str("oss"),
        }
    }
}

/// Trait implemented by both storage backend adapters.
///
/// Adapters receive physical keys (already namespaced) and are responsible
/// for shard routing, translating options into backend requests, and
/// translating responses back into the unified shapes. Not-found on
/// `get_as_buffer`/`head` is reported as `Ok(None)`; every other backend
/// failure is returned as `AwosError::Backend` holding the native error.
///
/// For list calls, `key` selects the shard; the listing itself is filtered
/// by the options' `prefix`.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Fetch an object as text.
    async fn get(&self, key: &str, meta_keys: &[String]) -> AwosResult<Option<GetObjectResponse>> {
        match self.get_as_buffer(key, meta_keys).await? {
            Some(buffered) => buffered.into_text().map(Some),
            None => Ok(None),
        }
    }

    /// Fetch an object keeping its content as raw bytes.
    async fn get_as_buffer(
        &self,
        key: &str,
        meta_keys: &[String],
    ) -> AwosResult<Option<GetBufferedObjectResponse>>;

    async fn put(&self, key: &str, data: Bytes, options: &PutObjectOptions) -> AwosResult<()>;

    /// Server-side copy of `source` to `key`.
    async fn copy(&self, key: &str, source: &str, options: &CopyObjectOptions) -> AwosResult<()>;

    async fn del(&self, key: &str) -> AwosResult<()>;

    /// Bulk delete. Returns the keys that could not be deleted.
    async fn del_multi(&self, keys: &[String]) -> AwosResult<Vec<String>>;

    async fn head(&self, key: &str, options: &HeadOptions) -> AwosResult<Option<Meta>>;

    async fn list_object(&self, key: &str, options: &ListObjectOptions) -> AwosResult<Vec<String>> {
        let page = self.list_details(key, options).await?;
        Ok(page.objects.into_iter().map(|o| o.key).collect())
    }

    async fn list_object_v2(
        &self,
        key: &str,
        options: &ListObjectV2Options,
    ) -> AwosResult<Vec<String>> {
        let page = self.list_details_v2(key, options).await?;
        Ok(page.objects.into_iter().map(|o| o.key).collect())
    }

    async fn list_details(
        &self,
        key: &str,
        options: &ListObjectOptions,
    ) -> AwosResult<ListObjectOutput>;

    async fn list_details_v2(
        &self,
        key: &str,
        options: &ListObjectV2Options,
    ) -> AwosResult<ListObjectV2Output>;

    async fn signature_url(&self, key: &str, options: &SignatureUrlOptions) -> AwosResult<String>;
}
