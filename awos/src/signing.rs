//! Request signing shared by the backend clients.
//!
//! Two schemes are needed: AWS Signature V4 (S3 default) and the older
//! HMAC-SHA1 header scheme used by S3 signature V2 and by OSS, which differ
//! only in the vendor header prefix and the authorization label.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Payload hash used for presigned URLs, whose body is unknown at signing time.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_sha1_base64(key: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Base64 MD5 digest, as required by bulk-delete requests.
pub fn content_md5(data: &[u8]) -> String {
    BASE64.encode(md5::compute(data).0)
}

/// RFC 1123 date as used by the `Date` header.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Percent-encode a key for use in a URL path, keeping `/` separators.
pub fn encode_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Sorted, percent-encoded `k=v&...` query string. Empty values render as `k=`.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(key.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// AWS Signature Version 4 signer for one set of credentials and region.
#[derive(Debug, Clone)]
pub struct SigV4 {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl SigV4 {
    const SERVICE: &'static str = "s3";

    fn credential_scope(&self, date: &str) -> String {
        format!("{}/{}/{}/aws4_request", date, self.region, Self::SERVICE)
    }

    fn signature(&self, canonical_request: &str, amz_date: &str, date: &str) -> String {
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            self.credential_scope(date),
            sha256_hex(canonical_request.as_bytes())
        );
        let signing_key =
            derive_signing_key(&self.secret_access_key, date, &self.region, Self::SERVICE);
        hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()))
    }

    /// `Authorization` header value for a request.
    ///
    /// `headers` must hold every signed header (lowercase names), including
    /// `host`, `x-amz-date` and `x-amz-content-sha256`; `path` and `query`
    /// are already encoded.
    pub fn authorization(
        &self,
        method: &str,
        path: &str,
        query: &str,
        headers: &BTreeMap<String, String>,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> String {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, query, canonical_headers, signed_headers, payload_hash
        );
        let signature = self.signature(&canonical_request, &amz_date, &date);

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
            self.access_key_id,
            self.credential_scope(&date),
            signed_headers,
            signature
        )
    }

    /// Query string (including `X-Amz-Signature`) of a presigned URL.
    pub fn presign_query(
        &self,
        method: &str,
        path: &str,
        host: &str,
        expires_secs: u64,
        now: DateTime<Utc>,
    ) -> String {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let mut params = BTreeMap::new();
        params.insert("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string());
        params.insert(
            "X-Amz-Credential".to_string(),
            format!("{}/{}", self.access_key_id, self.credential_scope(&date)),
        );
        params.insert("X-Amz-Date".to_string(), amz_date.clone());
        params.insert("X-Amz-Expires".to_string(), expires_secs.to_string());
        params.insert("X-Amz-SignedHeaders".to_string(), "host".to_string());
        let query = canonical_query(&params);

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
            method, path, query, host, UNSIGNED_PAYLOAD
        );
        let signature = self.signature(&canonical_request, &amz_date, &date);
        format!("{}&X-Amz-Signature={}", query, signature)
    }
}

/// HMAC-SHA1 header signer (S3 signature V2, OSS).
#[derive(Debug, Clone)]
pub struct HmacSha1Signer {
    pub access_key_id: String,
    pub secret: String,
    /// Vendor header prefix included in the string to sign, e.g. `x-oss-`.
    pub header_prefix: &'static str,
}

impl HmacSha1Signer {
    /// Sign `VERB\nContent-MD5\nContent-Type\nDate\n{vendor headers}{resource}`.
    ///
    /// `date` is the `Date` header for header auth, or the expiry epoch
    /// seconds for presigned URLs.
    pub fn signature(
        &self,
        method: &str,
        content_md5: &str,
        content_type: &str,
        date: &str,
        headers: &BTreeMap<String, String>,
        resource: &str,
    ) -> String {
        let vendor_headers: String = headers
            .iter()
            .filter(|(k, _)| k.starts_with(self.header_prefix))
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}\n{}{}",
            method, content_md5, content_type, date, vendor_headers, resource
        );
        hmac_sha1_base64(self.secret.as_bytes(), string_to_sign.as_bytes())
    }
}
