//! OSS REST client bound to one bucket.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Method, Response, StatusCode};
use tracing::debug;

use super::api::*;
use crate::backend::transport::{
    header_string, lowercase_headers, strip_prefixed, to_header_map, Endpoint,
};
use crate::backend::xml::{self, DeleteRequest, DeleteResult, ListBucketResult, ObjectIdentifier};
use crate::signing::{canonical_query, content_md5, encode_path, http_date, HmacSha1Signer};

pub const META_PREFIX: &str = "x-oss-meta-";
const DEFAULT_SIGNATURE_EXPIRES_SECS: u64 = 1800;

#[derive(Debug, Clone)]
pub struct OssClientConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub bucket: String,
    pub endpoint: String,
}

pub struct OssHttpClient {
    bucket: String,
    endpoint: Endpoint,
    signer: HmacSha1Signer,
    client: reqwest::Client,
}

impl OssHttpClient {
    pub fn new(config: OssClientConfig, client: reqwest::Client) -> Result<Self, OssError> {
        let endpoint = Endpoint::parse(&config.endpoint).map_err(OssError::InvalidRequest)?;
        Ok(Self {
            bucket: config.bucket,
            endpoint,
            signer: HmacSha1Signer {
                access_key_id: config.access_key_id,
                secret: config.access_key_secret,
                header_prefix: "x-oss-",
            },
            client,
        })
    }

    fn host(&self) -> String {
        self.endpoint.bucket_host(&self.bucket)
    }

    fn url(&self, path: &str, query: &str) -> String {
        let base = format!("{}://{}{}", self.endpoint.scheme, self.host(), path);
        if query.is_empty() {
            base
        } else {
            format!("{}?{}", base, query)
        }
    }

    /// Canonicalized resource: `/{bucket}/{name}` with the raw (unencoded)
    /// object name, followed by any sub-resources.
    fn resource(&self, name: &str, subresources: &BTreeMap<String, String>) -> String {
        let base = format!("/{}/{}", self.bucket, name);
        if subresources.is_empty() {
            return base;
        }
        let parts: Vec<String> = subresources
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect();
        format!("{}?{}", base, parts.join("&"))
    }

    /// Sign and send a request. `subresources` go into both the query and
    /// the signature; `params` only into the query.
    async fn send(
        &self,
        method: Method,
        name: &str,
        subresources: &BTreeMap<String, String>,
        params: &BTreeMap<String, String>,
        mut headers: BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<Response, OssError> {
        let date = http_date(Utc::now());
        headers.insert("date".to_string(), date.clone());

        let signature = self.signer.signature(
            method.as_str(),
            headers.get("content-md5").map(String::as_str).unwrap_or(""),
            headers.get("content-type").map(String::as_str).unwrap_or(""),
            &date,
            &headers,
            &self.resource(name, subresources),
        );

        let mut header_map = to_header_map(&headers).map_err(OssError::InvalidRequest)?;
        header_map.insert(
            reqwest::header::AUTHORIZATION,
            format!("OSS {}:{}", self.signer.access_key_id, signature)
                .parse()
                .map_err(|_| OssError::InvalidRequest("invalid authorization header".into()))?,
        );

        let mut query = params.clone();
        query.extend(subresources.iter().map(|(k, v)| (k.clone(), v.clone())));
        let path = format!("/{}", encode_path(name));
        let url = self.url(&path, &canonical_query(&query));

        let resp = self
            .client
            .request(method.clone(), &url)
            .headers(header_map)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() && status != StatusCode::NOT_MODIFIED {
            return Err(service_error(resp).await);
        }
        debug!(method = %method, bucket = %self.bucket, name = %name, "OSS request complete");
        Ok(resp)
    }

    fn write_headers(options: &OssWriteOptions) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), options.mime.clone());
        for (k, v) in &options.meta {
            headers.insert(format!("{}{}", META_PREFIX, k.to_lowercase()), v.clone());
        }
        for (k, v) in &options.headers {
            headers.insert(k.to_lowercase(), v.clone());
        }
        headers
    }

    fn presign(
        &self,
        name: &str,
        method: OssSignMethod,
        expires: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<String, OssError> {
        let expires_secs = expires.unwrap_or(DEFAULT_SIGNATURE_EXPIRES_SECS);
        let expires_at = i64::try_from(expires_secs)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                OssError::InvalidRequest(format!("expires out of range: {}", expires_secs))
            })?
            .timestamp()
            .to_string();
        let signature = self.signer.signature(
            method.as_str(),
            "",
            "",
            &expires_at,
            &BTreeMap::new(),
            &self.resource(name, &BTreeMap::new()),
        );

        let mut params = BTreeMap::new();
        params.insert("OSSAccessKeyId".to_string(), self.signer.access_key_id.clone());
        params.insert("Expires".to_string(), expires_at);
        params.insert("Signature".to_string(), signature);
        Ok(self.url(&format!("/{}", encode_path(name)), &canonical_query(&params)))
    }
}

async fn service_error(resp: Response) -> OssError {
    let status = resp.status();
    let header_request_id = header_string(resp.headers(), "x-oss-request-id");
    let body = resp.text().await.unwrap_or_default();
    let parsed = xml::parse_error_body(&body);
    let code = if parsed.code.is_empty() {
        status.canonical_reason().unwrap_or("Unknown").replace(' ', "")
    } else {
        parsed.code
    };
    OssError::Service {
        status: status.as_u16(),
        code,
        message: parsed.message,
        request_id: parsed.request_id.or(header_request_id),
    }
}

fn response_of(resp: &Response) -> OssResponse {
    OssResponse {
        status: resp.status().as_u16(),
        headers: lowercase_headers(resp.headers()),
    }
}

fn parse_objects(body: &str) -> Result<(ListBucketResult, Vec<OssObject>), OssError> {
    let mut result: ListBucketResult =
        xml::from_xml(body).map_err(|e| OssError::Decode(format!("list response: {}", e)))?;
    let objects = std::mem::take(&mut result.contents)
        .into_iter()
        .map(|c| OssObject {
            last_modified: c
                .last_modified
                .as_deref()
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|d| d.with_timezone(&Utc)),
            name: c.key,
            etag: c.etag,
            size: c.size,
        })
        .collect();
    Ok((result, objects))
}

fn insert_opt(query: &mut BTreeMap<String, String>, name: &str, value: Option<String>) {
    if let Some(v) = value {
        query.insert(name.to_string(), v);
    }
}

#[async_trait]
impl OssApi for OssHttpClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, name: &str) -> Result<OssGetResult, OssError> {
        let resp = self
            .send(
                Method::GET,
                name,
                &BTreeMap::new(),
                &BTreeMap::new(),
                BTreeMap::new(),
                Bytes::new(),
            )
            .await?;
        let res = response_of(&resp);
        let content = resp.bytes().await?;
        Ok(OssGetResult { content, res })
    }

    async fn put(
        &self,
        name: &str,
        data: Bytes,
        options: &OssWriteOptions,
    ) -> Result<OssResponse, OssError> {
        let headers = Self::write_headers(options);
        let resp = self
            .send(Method::PUT, name, &BTreeMap::new(), &BTreeMap::new(), headers, data)
            .await?;
        Ok(response_of(&resp))
    }

    async fn copy(
        &self,
        name: &str,
        source: &str,
        source_bucket: &str,
        options: &OssCopyOptions,
    ) -> Result<OssResponse, OssError> {
        let mut headers = Self::write_headers(&options.write);
        headers.insert(
            "x-oss-copy-source".to_string(),
            format!("/{}/{}", source_bucket, encode_path(source)),
        );
        if options.replace_meta {
            headers.insert("x-oss-metadata-directive".to_string(), "REPLACE".to_string());
        }
        let resp = self
            .send(
                Method::PUT,
                name,
                &BTreeMap::new(),
                &BTreeMap::new(),
                headers,
                Bytes::new(),
            )
            .await?;
        Ok(response_of(&resp))
    }

    async fn delete(&self, name: &str) -> Result<OssResponse, OssError> {
        let resp = self
            .send(
                Method::DELETE,
                name,
                &BTreeMap::new(),
                &BTreeMap::new(),
                BTreeMap::new(),
                Bytes::new(),
            )
            .await?;
        Ok(response_of(&resp))
    }

    async fn delete_multi(
        &self,
        names: &[String],
        quiet: bool,
    ) -> Result<OssDeleteMultiResult, OssError> {
        let document = DeleteRequest {
            quiet,
            objects: names.iter().map(|k| ObjectIdentifier { key: k }).collect(),
        };
        let body = xml::to_xml(&document)
            .map_err(|e| OssError::InvalidRequest(format!("delete request: {}", e)))?;
        let body = Bytes::from(body);

        let mut subresources = BTreeMap::new();
        subresources.insert("delete".to_string(), String::new());
        let mut headers = BTreeMap::new();
        headers.insert("content-md5".to_string(), content_md5(&body));
        headers.insert("content-type".to_string(), "application/xml".to_string());

        let resp = self
            .send(Method::POST, "", &subresources, &BTreeMap::new(), headers, body)
            .await?;
        let res = response_of(&resp);
        let text = resp.text().await?;
        let result: DeleteResult = if text.trim().is_empty() {
            DeleteResult::default()
        } else {
            xml::from_xml(&text)
                .map_err(|e| OssError::Decode(format!("delete response: {}", e)))?
        };
        Ok(OssDeleteMultiResult {
            deleted: result.deleted.into_iter().map(|d| d.key).collect(),
            res,
        })
    }

    async fn head(&self, name: &str) -> Result<OssHeadResult, OssError> {
        let resp = self
            .send(
                Method::HEAD,
                name,
                &BTreeMap::new(),
                &BTreeMap::new(),
                BTreeMap::new(),
                Bytes::new(),
            )
            .await?;
        let res = response_of(&resp);
        Ok(OssHeadResult {
            meta: strip_prefixed(&res.headers, META_PREFIX),
            status: res.status,
            res,
        })
    }

    async fn list(&self, query: &OssListQuery) -> Result<OssListResult, OssError> {
        let mut params = BTreeMap::new();
        insert_opt(&mut params, "prefix", query.prefix.clone());
        insert_opt(&mut params, "marker", query.marker.clone());
        insert_opt(&mut params, "delimiter", query.delimiter.clone());
        insert_opt(&mut params, "max-keys", query.max_keys.map(|n| n.to_string()));

        let resp = self
            .send(
                Method::GET,
                "",
                &BTreeMap::new(),
                &params,
                BTreeMap::new(),
                Bytes::new(),
            )
            .await?;
        let res = response_of(&resp);
        let (result, objects) = parse_objects(&resp.text().await?)?;
        Ok(OssListResult {
            objects,
            prefixes: result.common_prefixes.into_iter().map(|p| p.prefix).collect(),
            is_truncated: result.is_truncated,
            next_marker: xml::non_empty(result.next_marker),
            res,
        })
    }

    async fn list_v2(&self, query: &OssListV2Query) -> Result<OssListV2Result, OssError> {
        let mut params = BTreeMap::new();
        params.insert("list-type".to_string(), "2".to_string());
        insert_opt(&mut params, "prefix", query.prefix.clone());
        insert_opt(&mut params, "delimiter", query.delimiter.clone());
        insert_opt(&mut params, "max-keys", query.max_keys.map(|n| n.to_string()));
        let mut subresources = BTreeMap::new();
        insert_opt(
            &mut subresources,
            "continuation-token",
            query.continuation_token.clone(),
        );

        let resp = self
            .send(
                Method::GET,
                "",
                &subresources,
                &params,
                BTreeMap::new(),
                Bytes::new(),
            )
            .await?;
        let res = response_of(&resp);
        let (result, objects) = parse_objects(&resp.text().await?)?;
        Ok(OssListV2Result {
            objects,
            prefixes: result.common_prefixes.into_iter().map(|p| p.prefix).collect(),
            is_truncated: result.is_truncated,
            next_continuation_token: xml::non_empty(result.next_continuation_token),
            res,
        })
    }

    fn signature_url(
        &self,
        name: &str,
        method: OssSignMethod,
        expires: Option<u64>,
    ) -> Result<String, OssError> {
        self.presign(name, method, expires, Utc::now())
    }
}

/// Extra write headers from `(lowercase name, value)` pairs.
pub fn overlay_header_map<I, K, V>(pairs: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
