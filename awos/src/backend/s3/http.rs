//! S3 REST client.
//!
//! Talks to AWS S3 or any S3-compatible service (MinIO, Ceph) with reqwest,
//! signing requests itself with Signature V4 (or legacy V2), so no SDK
//! dependency is needed.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Method, Response};
use serde::Deserialize;
use tracing::debug;

use awos_common::parse_http_date;

use super::api::*;
use crate::backend::transport::{
    header_string, lowercase_headers, strip_prefixed, to_header_map, Endpoint,
};
use crate::backend::xml::{self, DeleteRequest, DeleteResult, ListBucketResult, ObjectIdentifier};
use crate::signing::{
    canonical_query, content_md5, encode_path, http_date, sha256_hex, HmacSha1Signer, SigV4,
};

const META_PREFIX: &str = "x-amz-meta-";
const DEFAULT_PRESIGN_EXPIRES_SECS: u64 = 900;
const MAX_PRESIGN_EXPIRES_SECS: u64 = 604_800;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureVersion {
    V2,
    #[default]
    V4,
}

#[derive(Debug, Clone)]
pub struct S3ClientConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub signature_version: SignatureVersion,
}

/// Where a request goes and what gets signed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    /// Encoded request path.
    path: String,
    /// Canonicalized resource for V2 signing (without sub-resources).
    resource: String,
}

pub struct S3HttpClient {
    endpoint: Endpoint,
    force_path_style: bool,
    signature_version: SignatureVersion,
    v4: SigV4,
    v2: HmacSha1Signer,
    client: reqwest::Client,
}

impl S3HttpClient {
    pub fn new(config: S3ClientConfig, client: reqwest::Client) -> Result<Self, S3Error> {
        let raw_endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", config.region));
        let endpoint = Endpoint::parse(&raw_endpoint).map_err(S3Error::InvalidRequest)?;

        Ok(Self {
            endpoint,
            force_path_style: config.force_path_style,
            signature_version: config.signature_version,
            v4: SigV4 {
                access_key_id: config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
                region: config.region.clone(),
            },
            v2: HmacSha1Signer {
                access_key_id: config.access_key_id,
                secret: config.secret_access_key,
                header_prefix: "x-amz-",
            },
            client,
        })
    }

    fn target(&self, bucket: &str, key: Option<&str>) -> Target {
        let object_path = key.map(encode_path).unwrap_or_default();
        let resource = format!("/{}/{}", bucket, object_path);
        if self.force_path_style {
            Target {
                host: self.endpoint.host.clone(),
                path: format!("/{}/{}", bucket, object_path),
                resource,
            }
        } else {
            Target {
                host: self.endpoint.bucket_host(bucket),
                path: format!("/{}", object_path),
                resource,
            }
        }
    }

    fn url(&self, target: &Target, query: &str) -> String {
        if query.is_empty() {
            format!("{}://{}{}", self.endpoint.scheme, target.host, target.path)
        } else {
            format!(
                "{}://{}{}?{}",
                self.endpoint.scheme, target.host, target.path, query
            )
        }
    }

    /// Sign and send one request; non-2xx responses become `S3Error::Service`.
    async fn send(
        &self,
        method: Method,
        target: &Target,
        query: &BTreeMap<String, String>,
        mut headers: BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<Response, S3Error> {
        let now = Utc::now();
        let query_string = canonical_query(query);
        headers.insert("host".to_string(), target.host.clone());

        let authorization = match self.signature_version {
            SignatureVersion::V4 => {
                let payload_hash = sha256_hex(&body);
                headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
                headers.insert(
                    "x-amz-date".to_string(),
                    now.format("%Y%m%dT%H%M%SZ").to_string(),
                );
                self.v4.authorization(
                    method.as_str(),
                    &target.path,
                    &query_string,
                    &headers,
                    &payload_hash,
                    now,
                )
            }
            SignatureVersion::V2 => {
                let date = http_date(now);
                headers.insert("date".to_string(), date.clone());
                let resource = v2_resource(&target.resource, query);
                let signature = self.v2.signature(
                    method.as_str(),
                    headers.get("content-md5").map(String::as_str).unwrap_or(""),
                    headers.get("content-type").map(String::as_str).unwrap_or(""),
                    &date,
                    &headers,
                    &resource,
                );
                format!("AWS {}:{}", self.v2.access_key_id, signature)
            }
        };

        let mut header_map = to_header_map(&headers).map_err(S3Error::InvalidRequest)?;
        header_map.insert(
            reqwest::header::AUTHORIZATION,
            authorization
                .parse()
                .map_err(|_| S3Error::InvalidRequest("invalid authorization header".into()))?,
        );

        let url = self.url(target, &query_string);
        let resp = self
            .client
            .request(method.clone(), &url)
            .headers(header_map)
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(service_error(resp).await);
        }
        debug!(method = %method, path = %target.path, "S3 request complete");
        Ok(resp)
    }

    fn presign(&self, req: &PresignRequest, now: DateTime<Utc>) -> String {
        let method = match req.operation {
            PresignOperation::GetObject => "GET",
            PresignOperation::PutObject => "PUT",
        };
        let expires = req
            .expires_secs
            .unwrap_or(DEFAULT_PRESIGN_EXPIRES_SECS)
            .min(MAX_PRESIGN_EXPIRES_SECS);
        let target = self.target(&req.bucket, Some(&req.key));

        let query = match self.signature_version {
            SignatureVersion::V4 => {
                self.v4
                    .presign_query(method, &target.path, &target.host, expires, now)
            }
            SignatureVersion::V2 => {
                let expires_at = (now + ChronoDuration::seconds(expires as i64)).timestamp();
                let signature = self.v2.signature(
                    method,
                    "",
                    "",
                    &expires_at.to_string(),
                    &BTreeMap::new(),
                    &target.resource,
                );
                let mut params = BTreeMap::new();
                params.insert("AWSAccessKeyId".to_string(), self.v2.access_key_id.clone());
                params.insert("Expires".to_string(), expires_at.to_string());
                params.insert("Signature".to_string(), signature);
                canonical_query(&params)
            }
        };
        self.url(&target, &query)
    }
}

/// Sub-resources that take part in the V2 canonicalized resource.
fn v2_resource(resource: &str, query: &BTreeMap<String, String>) -> String {
    if query.contains_key("delete") {
        format!("{}?delete", resource)
    } else {
        resource.to_string()
    }
}

async fn service_error(resp: Response) -> S3Error {
    let status = resp.status();
    let header_request_id = header_string(resp.headers(), "x-amz-request-id");
    let body = resp.text().await.unwrap_or_default();
    let parsed = xml::parse_error_body(&body);
    let code = if parsed.code.is_empty() {
        status.canonical_reason().unwrap_or("Unknown").replace(' ', "")
    } else {
        parsed.code
    };
    S3Error::Service {
        status_code: status.as_u16(),
        code,
        message: parsed.message,
        request_id: parsed.request_id.or(header_request_id),
    }
}

fn meta_headers(headers: &mut BTreeMap<String, String>, metadata: &HashMap<String, String>) {
    for (k, v) in metadata {
        headers.insert(format!("{}{}", META_PREFIX, k.to_lowercase()), v.clone());
    }
}

fn overlay_headers(
    headers: &mut BTreeMap<String, String>,
    cache_control: &Option<String>,
    content_disposition: &Option<String>,
    content_encoding: &Option<String>,
) {
    if let Some(v) = cache_control {
        headers.insert("cache-control".to_string(), v.clone());
    }
    if let Some(v) = content_disposition {
        headers.insert("content-disposition".to_string(), v.clone());
    }
    if let Some(v) = content_encoding {
        headers.insert("content-encoding".to_string(), v.clone());
    }
}

fn parse_list_time(value: &Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn parse_listing(body: &str) -> Result<(ListBucketResult, Vec<S3Object>), S3Error> {
    let mut result: ListBucketResult =
        xml::from_xml(body).map_err(|e| S3Error::Decode(format!("list response: {}", e)))?;
    let contents = std::mem::take(&mut result.contents)
        .into_iter()
        .map(|c| S3Object {
            last_modified: parse_list_time(&c.last_modified),
            key: c.key,
            etag: c.etag,
            size: c.size,
        })
        .collect();
    Ok((result, contents))
}

fn insert_opt(query: &mut BTreeMap<String, String>, name: &str, value: &Option<String>) {
    if let Some(v) = value {
        query.insert(name.to_string(), v.clone());
    }
}

#[async_trait]
impl S3Api for S3HttpClient {
    async fn get_object(&self, req: GetObjectRequest) -> Result<GetObjectOutput, S3Error> {
        let target = self.target(&req.bucket, Some(&req.key));
        let resp = self
            .send(Method::GET, &target, &BTreeMap::new(), BTreeMap::new(), Bytes::new())
            .await?;

        let headers = lowercase_headers(resp.headers());
        let body = resp.bytes().await?;
        Ok(GetObjectOutput {
            content_type: headers.get("content-type").cloned(),
            content_length: headers.get("content-length").and_then(|v| v.parse().ok()),
            accept_ranges: headers.get("accept-ranges").cloned(),
            etag: headers.get("etag").cloned(),
            last_modified: headers.get("last-modified").and_then(|v| parse_http_date(v)),
            cache_control: headers.get("cache-control").cloned(),
            content_disposition: headers.get("content-disposition").cloned(),
            content_encoding: headers.get("content-encoding").cloned(),
            metadata: strip_prefixed(&headers, META_PREFIX),
            body,
        })
    }

    async fn put_object(&self, req: PutObjectRequest) -> Result<(), S3Error> {
        let target = self.target(&req.bucket, Some(&req.key));
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), req.content_type.clone());
        meta_headers(&mut headers, &req.metadata);
        overlay_headers(
            &mut headers,
            &req.cache_control,
            &req.content_disposition,
            &req.content_encoding,
        );

        self.send(Method::PUT, &target, &BTreeMap::new(), headers, req.body)
            .await?;
        debug!(bucket = %req.bucket, key = %req.key, "S3 upload complete");
        Ok(())
    }

    async fn copy_object(&self, req: CopyObjectRequest) -> Result<(), S3Error> {
        let target = self.target(&req.bucket, Some(&req.key));
        let mut headers = BTreeMap::new();
        headers.insert(
            "x-amz-copy-source".to_string(),
            format!("/{}/{}", req.source_bucket, encode_path(&req.source_key)),
        );
        headers.insert(
            "x-amz-metadata-directive".to_string(),
            req.metadata_directive.as_str().to_string(),
        );
        if req.metadata_directive == MetadataDirective::Replace {
            headers.insert("content-type".to_string(), req.content_type.clone());
            meta_headers(&mut headers, &req.metadata);
            overlay_headers(
                &mut headers,
                &req.cache_control,
                &req.content_disposition,
                &req.content_encoding,
            );
        }

        let resp = self
            .send(Method::PUT, &target, &BTreeMap::new(), headers, Bytes::new())
            .await?;

        // CopyObject can fail after the 200 status line has been sent.
        let body = resp.text().await?;
        if body.contains("<Error>") {
            let parsed = xml::parse_error_body(&body);
            return Err(S3Error::Service {
                status_code: 200,
                code: parsed.code,
                message: parsed.message,
                request_id: parsed.request_id,
            });
        }
        debug!(
            bucket = %req.bucket,
            key = %req.key,
            source = %req.source_key,
            "S3 copy complete"
        );
        Ok(())
    }

    async fn delete_object(&self, req: DeleteObjectRequest) -> Result<(), S3Error> {
        let target = self.target(&req.bucket, Some(&req.key));
        self.send(Method::DELETE, &target, &BTreeMap::new(), BTreeMap::new(), Bytes::new())
            .await?;
        debug!(bucket = %req.bucket, key = %req.key, "S3 delete complete");
        Ok(())
    }

    async fn delete_objects(
        &self,
        req: DeleteObjectsRequest,
    ) -> Result<DeleteObjectsOutput, S3Error> {
        let target = self.target(&req.bucket, None);
        let document = DeleteRequest {
            quiet: req.quiet,
            objects: req
                .keys
                .iter()
                .map(|k| ObjectIdentifier { key: k })
                .collect(),
        };
        let body = xml::to_xml(&document)
            .map_err(|e| S3Error::InvalidRequest(format!("delete request: {}", e)))?;
        let body = Bytes::from(body);

        let mut query = BTreeMap::new();
        query.insert("delete".to_string(), String::new());
        let mut headers = BTreeMap::new();
        headers.insert("content-md5".to_string(), content_md5(&body));
        headers.insert("content-type".to_string(), "application/xml".to_string());

        let resp = self.send(Method::POST, &target, &query, headers, body).await?;
        let text = resp.text().await?;
        let result: DeleteResult = if text.trim().is_empty() {
            DeleteResult::default()
        } else {
            xml::from_xml(&text).map_err(|e| S3Error::Decode(format!("delete response: {}", e)))?
        };

        debug!(bucket = %req.bucket, count = req.keys.len(), "S3 bulk delete complete");
        Ok(DeleteObjectsOutput {
            deleted: result.deleted.into_iter().map(|d| d.key).collect(),
            errors: result
                .error
                .into_iter()
                .map(|e| DeleteObjectsError {
                    key: e.key,
                    code: e.code,
                    message: e.message,
                })
                .collect(),
        })
    }

    async fn head_object(&self, req: HeadObjectRequest) -> Result<HeadObjectOutput, S3Error> {
        let target = self.target(&req.bucket, Some(&req.key));
        let resp = self
            .send(Method::HEAD, &target, &BTreeMap::new(), BTreeMap::new(), Bytes::new())
            .await?;

        let headers = lowercase_headers(resp.headers());
        Ok(HeadObjectOutput {
            content_type: headers.get("content-type").cloned(),
            content_length: headers.get("content-length").and_then(|v| v.parse().ok()),
            accept_ranges: headers.get("accept-ranges").cloned(),
            etag: headers.get("etag").cloned(),
            last_modified: headers.get("last-modified").and_then(|v| parse_http_date(v)),
            metadata: strip_prefixed(&headers, META_PREFIX),
        })
    }

    async fn list_objects(&self, req: ListObjectsRequest) -> Result<ListObjectsOutput, S3Error> {
        let target = self.target(&req.bucket, None);
        let mut query = BTreeMap::new();
        insert_opt(&mut query, "prefix", &req.prefix);
        insert_opt(&mut query, "marker", &req.marker);
        insert_opt(&mut query, "delimiter", &req.delimiter);
        insert_opt(&mut query, "max-keys", &req.max_keys.map(|n| n.to_string()));

        let resp = self
            .send(Method::GET, &target, &query, BTreeMap::new(), Bytes::new())
            .await?;
        let (result, contents) = parse_listing(&resp.text().await?)?;
        Ok(ListObjectsOutput {
            is_truncated: result.is_truncated,
            contents,
            common_prefixes: result.common_prefixes.into_iter().map(|p| p.prefix).collect(),
            next_marker: xml::non_empty(result.next_marker),
        })
    }

    async fn list_objects_v2(
        &self,
        req: ListObjectsV2Request,
    ) -> Result<ListObjectsV2Output, S3Error> {
        let target = self.target(&req.bucket, None);
        let mut query = BTreeMap::new();
        query.insert("list-type".to_string(), "2".to_string());
        insert_opt(&mut query, "prefix", &req.prefix);
        insert_opt(&mut query, "delimiter", &req.delimiter);
        insert_opt(&mut query, "continuation-token", &req.continuation_token);
        insert_opt(&mut query, "max-keys", &req.max_keys.map(|n| n.to_string()));

        let resp = self
            .send(Method::GET, &target, &query, BTreeMap::new(), Bytes::new())
            .await?;
        let (result, contents) = parse_listing(&resp.text().await?)?;
        Ok(ListObjectsV2Output {
            is_truncated: result.is_truncated,
            contents,
            common_prefixes: result.common_prefixes.into_iter().map(|p| p.prefix).collect(),
            next_continuation_token: xml::non_empty(result.next_continuation_token),
        })
    }

    async fn presigned_url(&self, req: PresignRequest) -> Result<String, S3Error> {
        Ok(self.presign(&req, Utc::now()))
    }
}
