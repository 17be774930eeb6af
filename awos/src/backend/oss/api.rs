//! OSS client surface used by the OSS adapter.
//!
//! Unlike S3, an OSS client is bound to a single bucket, so the adapter keeps
//! one client per shard.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum OssError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OSS error: HTTP {status} {code} - {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("Invalid OSS request: {0}")]
    InvalidRequest(String),

    #[error("Malformed OSS response: {0}")]
    Decode(String),
}

impl OssError {
    pub fn status(&self) -> Option<u16> {
        match self {
            OssError::Service { status, .. } => Some(*status),
            OssError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Status line and lowercase headers of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OssResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct OssGetResult {
    pub content: Bytes,
    pub res: OssResponse,
}

/// Options shared by put and copy. `meta` keys are sent as `x-oss-meta-*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OssWriteOptions {
    pub mime: String,
    pub meta: HashMap<String, String>,
    /// Extra request headers (cache-control, content-disposition,
    /// content-encoding), lowercase names.
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OssCopyOptions {
    pub write: OssWriteOptions,
    /// Send `x-oss-metadata-directive: REPLACE` (otherwise OSS copies the
    /// source metadata and ignores `write`).
    pub replace_meta: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OssDeleteMultiResult {
    /// Keys reported as deleted. Empty in quiet mode.
    pub deleted: Vec<String>,
    pub res: OssResponse,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OssHeadResult {
    pub meta: HashMap<String, String>,
    pub status: u16,
    pub res: OssResponse,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OssListQuery {
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OssListV2Query {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OssObject {
    pub name: String,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OssListResult {
    pub objects: Vec<OssObject>,
    pub prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
    pub res: OssResponse,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OssListV2Result {
    pub objects: Vec<OssObject>,
    pub prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
    pub res: OssResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OssSignMethod {
    Get,
    Put,
}

impl OssSignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OssSignMethod::Get => "GET",
            OssSignMethod::Put => "PUT",
        }
    }
}

#[async_trait]
pub trait OssApi: Send + Sync {
    /// Bucket this client is bound to.
    fn bucket(&self) -> &str;

    async fn get(&self, name: &str) -> Result<OssGetResult, OssError>;

    async fn put(&self, name: &str, data: Bytes, options: &OssWriteOptions)
        -> Result<OssResponse, OssError>;

    /// Copy `source` from `source_bucket` to `name` in this bucket.
    async fn copy(
        &self,
        name: &str,
        source: &str,
        source_bucket: &str,
        options: &OssCopyOptions,
    ) -> Result<OssResponse, OssError>;

    async fn delete(&self, name: &str) -> Result<OssResponse, OssError>;

    async fn delete_multi(&self, names: &[String], quiet: bool)
        -> Result<OssDeleteMultiResult, OssError>;

    async fn head(&self, name: &str) -> Result<OssHeadResult, OssError>;

    async fn list(&self, query: &OssListQuery) -> Result<OssListResult, OssError>;

    async fn list_v2(&self, query: &OssListV2Query) -> Result<OssListV2Result, OssError>;

    fn signature_url(
        &self,
        name: &str,
        method: OssSignMethod,
        expires: Option<u64>,
    ) -> Result<String, OssError>;
}
