//! XML documents exchanged with the object-storage REST APIs.
//!
//! S3 and OSS share the list/delete/error schemas closely enough that one
//! set of wire types serves both clients; fields only one service sends
//! are optional.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// `ListBucketResult` of ListObjects (v1) and ListObjectsV2.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default)]
    pub contents: Vec<Contents>,
    #[serde(default)]
    pub common_prefixes: Vec<CommonPrefix>,
    #[serde(default)]
    pub next_marker: Option<String>,
    #[serde(default)]
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Contents {
    pub key: String,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(rename = "ETag", default)]
    pub etag: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct CommonPrefix {
    #[serde(rename = "Prefix")]
    pub prefix: String,
}

/// Body of a multi-object delete request.
#[derive(Debug, Serialize)]
#[serde(rename = "Delete")]
pub struct DeleteRequest<'a> {
    #[serde(rename = "Quiet")]
    pub quiet: bool,
    #[serde(rename = "Object")]
    pub objects: Vec<ObjectIdentifier<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ObjectIdentifier<'a> {
    #[serde(rename = "Key")]
    pub key: &'a str,
}

/// Response of a multi-object delete.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteResult {
    #[serde(default)]
    pub deleted: Vec<DeletedObject>,
    #[serde(default)]
    pub error: Vec<DeleteError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeletedObject {
    pub key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteError {
    pub key: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error document returned with non-2xx responses.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

pub fn from_xml<T: DeserializeOwned>(body: &str) -> Result<T, quick_xml::DeError> {
    quick_xml::de::from_str(body)
}

pub fn to_xml<T: Serialize>(value: &T) -> Result<String, quick_xml::SeError> {
    quick_xml::se::to_string(value)
}

/// Parse an error document, tolerating empty or non-XML bodies.
pub fn parse_error_body(body: &str) -> ErrorBody {
    if body.trim().is_empty() {
        return ErrorBody::default();
    }
    from_xml(body).unwrap_or_default()
}

/// Empty strings in optional cursor fields mean "absent".
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
