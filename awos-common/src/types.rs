use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AwosError, AwosResult};

/// Content type used for writes that do not name one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Caller metadata attached to an object: opaque string pairs.
pub type Meta = HashMap<String, String>;

/// Header overlay accepted on writes. Both backends support exactly these three.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutObjectHeaders {
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
}

impl PutObjectHeaders {
    /// Pairs of (lowercase header name, value) for the headers that are set.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("cache-control", self.cache_control.as_deref()),
            ("content-disposition", self.content_disposition.as_deref()),
            ("content-encoding", self.content_encoding.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
    }

    pub fn merge_into(&self, map: &mut HashMap<String, String>) {
        for (name, value) in self.iter() {
            map.insert(name.to_string(), value.to_string());
        }
    }
}

/// Options for `put` and `copy`.
///
/// Metadata values are coerced to strings on insertion:
///
/// ```
/// use awos_common::PutObjectOptions;
///
/// let opts = PutObjectOptions::new().meta("length", 14).content_type("image/jpeg");
/// assert_eq!(opts.meta["length"], "14");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutObjectOptions {
    pub meta: Meta,
    pub content_type: Option<String>,
    pub headers: PutObjectHeaders,
}

/// `copy` takes the same options as `put`.
pub type CopyObjectOptions = PutObjectOptions;

impl PutObjectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.meta.insert(key.into(), value.to_string());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn cache_control(mut self, value: impl Into<String>) -> Self {
        self.headers.cache_control = Some(value.into());
        self
    }

    pub fn content_disposition(mut self, value: impl Into<String>) -> Self {
        self.headers.content_disposition = Some(value.into());
        self
    }

    pub fn content_encoding(mut self, value: impl Into<String>) -> Self {
        self.headers.content_encoding = Some(value.into());
        self
    }

    pub fn effective_content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// Result of `get` (text content) and `get_as_buffer` (raw bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetObjectResponse<C = String> {
    pub content: C,
    /// Only the metadata keys the caller asked for.
    pub meta: Meta,
    /// Lowercase header name to value; `last-modified` is epoch milliseconds.
    pub headers: HashMap<String, String>,
}

pub type GetBufferedObjectResponse = GetObjectResponse<Bytes>;

impl GetBufferedObjectResponse {
    /// Decode the content as UTF-8 text.
    pub fn into_text(self) -> AwosResult<GetObjectResponse> {
        let content = String::from_utf8(self.content.to_vec()).map_err(|e| {
            AwosError::Decode(format!(
                "object content is not valid UTF-8 ({e}); use get_as_buffer"
            ))
        })?;
        Ok(GetObjectResponse {
            content,
            meta: self.meta,
            headers: self.headers,
        })
    }
}

/// Backend-native transport attributes of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandardHeaders {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub accept_ranges: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl StandardHeaders {
    /// Read the standard headers out of a lowercase raw header map.
    pub fn from_header_map(headers: &HashMap<String, String>) -> Self {
        Self {
            content_type: headers.get("content-type").cloned(),
            content_length: headers
                .get("content-length")
                .and_then(|v| v.trim().parse().ok()),
            accept_ranges: headers.get("accept-ranges").cloned(),
            etag: headers.get("etag").cloned(),
            last_modified: headers
                .get("last-modified")
                .and_then(|v| parse_http_date(v)),
        }
    }

    /// Insert the present headers under their lowercase names.
    /// `last-modified` becomes an epoch-millisecond integer string.
    pub fn merge_into(&self, map: &mut HashMap<String, String>) {
        if let Some(v) = &self.content_type {
            map.insert("content-type".to_string(), v.clone());
        }
        if let Some(v) = self.content_length {
            map.insert("content-length".to_string(), v.to_string());
        }
        if let Some(v) = &self.accept_ranges {
            map.insert("accept-ranges".to_string(), v.clone());
        }
        if let Some(v) = &self.etag {
            map.insert("etag".to_string(), v.clone());
        }
        if let Some(v) = self.last_modified {
            map.insert("last-modified".to_string(), v.timestamp_millis().to_string());
        }
    }
}

/// Parse an RFC 1123 HTTP date such as `Mon, 12 Oct 2009 17:50:00 GMT`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadOptions {
    pub with_standard_headers: bool,
}

impl HeadOptions {
    pub fn with_standard_headers() -> Self {
        Self {
            with_standard_headers: true,
        }
    }
}

/// Resume cursor of a marker-paginated (v1) listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Marker(String);

/// Resume cursor of a continuation-token-paginated (v2) listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

macro_rules! cursor_impls {
    ($name:ident) => {
        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

cursor_impls!(Marker);
cursor_impls!(ContinuationToken);

/// Options for marker-paginated listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectOptions {
    pub prefix: Option<String>,
    pub marker: Option<Marker>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
}

/// Options for continuation-token-paginated listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectV2Options {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
    pub continuation_token: Option<ContinuationToken>,
}

/// One object entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSummary {
    pub key: String,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

/// Page of a marker-paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListObjectOutput {
    pub is_truncated: bool,
    pub objects: Vec<ObjectSummary>,
    /// Common prefixes grouped by the delimiter.
    pub prefixes: Vec<String>,
    pub next_marker: Option<Marker>,
}

/// Page of a continuation-token-paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListObjectV2Output {
    pub is_truncated: bool,
    pub objects: Vec<ObjectSummary>,
    /// Common prefixes grouped by the delimiter.
    pub prefix: Vec<String>,
    pub next_continuation_token: Option<ContinuationToken>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SignMethod {
    #[default]
    Get,
    Put,
}

impl SignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignMethod::Get => "GET",
            SignMethod::Put => "PUT",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureUrlOptions {
    pub method: SignMethod,
    /// Lifetime of the URL in seconds; the backend default applies when unset.
    pub expires: Option<u64>,
}
