//! Request/response shapes of the S3 operations the adapter relies on.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Native S3 failure, carried unchanged inside `AwosError::Backend`.
#[derive(Debug, thiserror::Error)]
pub enum S3Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("S3 error: HTTP {status_code} {code} - {message}")]
    Service {
        status_code: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("Invalid S3 request: {0}")]
    InvalidRequest(String),

    #[error("Malformed S3 response: {0}")]
    Decode(String),
}

impl S3Error {
    /// HTTP status reported by the service, if the request got that far.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            S3Error::Service { status_code, .. } => Some(*status_code),
            S3Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetObjectRequest {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Default)]
pub struct GetObjectOutput {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub accept_ranges: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    /// User metadata without the `x-amz-meta-` prefix, keys lowercase.
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataDirective {
    Copy,
    Replace,
}

impl MetadataDirective {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataDirective::Copy => "COPY",
            MetadataDirective::Replace => "REPLACE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyObjectRequest {
    pub bucket: String,
    pub key: String,
    pub source_bucket: String,
    pub source_key: String,
    pub metadata_directive: MetadataDirective,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteObjectRequest {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteObjectsRequest {
    pub bucket: String,
    pub keys: Vec<String>,
    /// Quiet mode: only failures are reported back.
    pub quiet: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteObjectsError {
    pub key: String,
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteObjectsOutput {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteObjectsError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadObjectRequest {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Default)]
pub struct HeadObjectOutput {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub accept_ranges: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsV2Request {
    pub bucket: String,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Object {
    pub key: String,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsOutput {
    pub is_truncated: bool,
    pub contents: Vec<S3Object>,
    pub common_prefixes: Vec<String>,
    /// Only sent by S3 when a delimiter was given.
    pub next_marker: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsV2Output {
    pub is_truncated: bool,
    pub contents: Vec<S3Object>,
    pub common_prefixes: Vec<String>,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignOperation {
    GetObject,
    PutObject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignRequest {
    pub operation: PresignOperation,
    pub bucket: String,
    pub key: String,
    pub expires_secs: Option<u64>,
}

/// The S3 operations the adapter calls. One client serves every bucket.
#[async_trait]
pub trait S3Api: Send + Sync {
    async fn get_object(&self, req: GetObjectRequest) -> Result<GetObjectOutput, S3Error>;

    async fn put_object(&self, req: PutObjectRequest) -> Result<(), S3Error>;

    async fn copy_object(&self, req: CopyObjectRequest) -> Result<(), S3Error>;

    async fn delete_object(&self, req: DeleteObjectRequest) -> Result<(), S3Error>;

    async fn delete_objects(&self, req: DeleteObjectsRequest)
        -> Result<DeleteObjectsOutput, S3Error>;

    async fn head_object(&self, req: HeadObjectRequest) -> Result<HeadObjectOutput, S3Error>;

    async fn list_objects(&self, req: ListObjectsRequest) -> Result<ListObjectsOutput, S3Error>;

    async fn list_objects_v2(
        &self,
        req: ListObjectsV2Request,
    ) -> Result<ListObjectsV2Output, S3Error>;

    async fn presigned_url(&self, req: PresignRequest) -> Result<String, S3Error>;
}
