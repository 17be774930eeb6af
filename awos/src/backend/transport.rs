//! HTTP plumbing shared by the REST clients.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Scheme and `host[:port]` of a service endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
}

impl Endpoint {
    /// Parse an endpoint such as `http://127.0.0.1:9000` or
    /// `oss-cn-hangzhou.aliyuncs.com` (https is assumed without a scheme).
    /// Any path component is ignored.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{}", raw)
        };
        let url = reqwest::Url::parse(&with_scheme)
            .map_err(|e| format!("invalid endpoint '{}': {}", raw, e))?;
        let host = url
            .host_str()
            .ok_or_else(|| format!("endpoint '{}' has no host", raw))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
        })
    }

    /// Host of a virtual-hosted bucket: `{bucket}.{host}`.
    pub fn bucket_host(&self, bucket: &str) -> String {
        format!("{}.{}", bucket, self.host)
    }
}

pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Convert signed headers into a request header map. `host` is left to the
/// HTTP client, which derives it from the URL.
pub fn to_header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if name == "host" {
            continue;
        }
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("invalid header name '{}': {}", name, e))?;
        let header_value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|e| format!("invalid value for header '{}': {}", name, e))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

pub fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Every response header, names lowercase. Non-UTF-8 values are dropped.
pub fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| {
            std::str::from_utf8(v.as_bytes())
                .ok()
                .map(|s| (k.as_str().to_string(), s.to_string()))
        })
        .collect()
}

/// Headers starting with `prefix`, with the prefix removed.
pub fn strip_prefixed(headers: &HashMap<String, String>, prefix: &str) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| k.strip_prefix(prefix).map(|name| (name.to_string(), v.clone())))
        .collect()
}
