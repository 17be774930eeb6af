//! The unified storage client.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use awos_common::{
    AwosError, AwosResult, BackendKind, CopyObjectOptions, GetBufferedObjectResponse,
    GetObjectResponse, HeadOptions, KeyNamespace, ListObjectOptions, ListObjectOutput,
    ListObjectV2Options, ListObjectV2Output, Meta, PutObjectOptions, SignatureUrlOptions,
    StorageAdapter, MAX_DELETE_BATCH,
};

use crate::backend::build_adapter;
use crate::config::AwosConfig;

/// Backend-agnostic object storage client.
///
/// Every key passed in is a logical key; it is namespaced with the configured
/// prefix before it reaches the backend. Keys, markers and continuation
/// tokens returned by list calls are physical, and cursors are meant to be
/// passed back unchanged.
///
/// Cloning is cheap; clones share the backend connection pool.
#[derive(Clone)]
pub struct Awos {
    namespace: KeyNamespace,
    adapter: Arc<dyn StorageAdapter>,
}

fn owned_keys<S: AsRef<str>>(keys: &[S]) -> Vec<String> {
    keys.iter().map(|k| k.as_ref().to_string()).collect()
}

impl Awos {
    /// Build a client for the backend selected by `config`.
    pub fn new(config: &AwosConfig) -> AwosResult<Self> {
        let adapter = build_adapter(config)?;
        Ok(Self::from_adapter(adapter, config.prefix.as_deref()))
    }

    /// Wrap an already constructed adapter.
    pub fn from_adapter(adapter: Arc<dyn StorageAdapter>, prefix: Option<&str>) -> Self {
        Self {
            namespace: KeyNamespace::new(prefix),
            adapter,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.adapter.kind()
    }

    /// Physical key for a logical key.
    pub fn actual_key(&self, key: &str) -> String {
        self.namespace.actual_key(key)
    }

    fn namespaced_prefix(&self, prefix: &Option<String>) -> Option<String> {
        prefix.as_deref().map(|p| self.namespace.actual_key(p))
    }

    /// Fetch an object as UTF-8 text, with the requested metadata keys.
    /// Returns `Ok(None)` when the object does not exist.
    pub async fn get<S: AsRef<str>>(
        &self,
        key: &str,
        meta_keys: &[S],
    ) -> AwosResult<Option<GetObjectResponse>> {
        self.adapter
            .get(&self.actual_key(key), &owned_keys(meta_keys))
            .await
    }

    pub async fn get_as_buffer<S: AsRef<str>>(
        &self,
        key: &str,
        meta_keys: &[S],
    ) -> AwosResult<Option<GetBufferedObjectResponse>> {
        self.adapter
            .get_as_buffer(&self.actual_key(key), &owned_keys(meta_keys))
            .await
    }

    pub async fn put(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        options: &PutObjectOptions,
    ) -> AwosResult<()> {
        self.adapter
            .put(&self.actual_key(key), data.into(), options)
            .await
    }

    /// Server-side copy of `source` to `key`. Non-empty `options.meta`
    /// replaces the metadata; otherwise the source metadata is kept.
    pub async fn copy(&self, key: &str, source: &str, options: &CopyObjectOptions) -> AwosResult<()> {
        self.adapter
            .copy(&self.actual_key(key), &self.actual_key(source), options)
            .await
    }

    pub async fn del(&self, key: &str) -> AwosResult<()> {
        self.adapter.del(&self.actual_key(key)).await
    }

    /// Delete up to 1000 keys in one request. Returns the (physical) keys
    /// that could not be deleted; deleting a missing key is not a failure.
    pub async fn del_multi<S: AsRef<str>>(&self, keys: &[S]) -> AwosResult<Vec<String>> {
        if keys.len() > MAX_DELETE_BATCH {
            return Err(AwosError::Validation(format!(
                "Cannot delete more than {} keys at once (got {})",
                MAX_DELETE_BATCH,
                keys.len()
            )));
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let physical: Vec<String> = keys.iter().map(|k| self.actual_key(k.as_ref())).collect();
        let failed = self.adapter.del_multi(&physical).await?;
        debug!(requested = physical.len(), failed = failed.len(), "del_multi complete");
        Ok(failed)
    }

    /// Object metadata, plus the standard headers when requested.
    pub async fn head(&self, key: &str, options: &HeadOptions) -> AwosResult<Option<Meta>> {
        self.adapter.head(&self.actual_key(key), options).await
    }

    pub async fn list_object(&self, key: &str, options: &ListObjectOptions) -> AwosResult<Vec<String>> {
        let options = ListObjectOptions {
            prefix: self.namespaced_prefix(&options.prefix),
            ..options.clone()
        };
        self.adapter.list_object(&self.actual_key(key), &options).await
    }

    pub async fn list_object_v2(
        &self,
        key: &str,
        options: &ListObjectV2Options,
    ) -> AwosResult<Vec<String>> {
        let options = ListObjectV2Options {
            prefix: self.namespaced_prefix(&options.prefix),
            ..options.clone()
        };
        self.adapter
            .list_object_v2(&self.actual_key(key), &options)
            .await
    }

    /// One page of a marker-paginated listing. `key` selects the shard.
    pub async fn list_details(
        &self,
        key: &str,
        options: &ListObjectOptions,
    ) -> AwosResult<ListObjectOutput> {
        let options = ListObjectOptions {
            prefix: self.namespaced_prefix(&options.prefix),
            ..options.clone()
        };
        self.adapter.list_details(&self.actual_key(key), &options).await
    }

    /// One page of a continuation-token listing. `key` selects the shard.
    pub async fn list_details_v2(
        &self,
        key: &str,
        options: &ListObjectV2Options,
    ) -> AwosResult<ListObjectV2Output> {
        let options = ListObjectV2Options {
            prefix: self.namespaced_prefix(&options.prefix),
            ..options.clone()
        };
        self.adapter
            .list_details_v2(&self.actual_key(key), &options)
            .await
    }

    pub async fn signature_url(&self, key: &str, options: &SignatureUrlOptions) -> AwosResult<String> {
        self.adapter
            .signature_url(&self.actual_key(key), options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryOss, MemoryS3, MemoryStore};
    use crate::backend::oss::{OssAdapter, OssApi};
    use crate::backend::s3::S3Adapter;
    use awos_common::{Marker, RetryPolicy, ShardRouter, SignMethod};
    use std::time::Duration;

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// One client per backend, each over its own store.
    fn clients(prefix: Option<&str>) -> Vec<(Awos, Arc<MemoryStore>)> {
        let s3_store = MemoryStore::new();
        let s3 = S3Adapter::new(
            Arc::new(MemoryS3::with_store(s3_store.clone())),
            ShardRouter::single("bucket".to_string()),
            no_wait(),
        );

        let oss_store = MemoryStore::new();
        let oss_client: Arc<dyn OssApi> = Arc::new(MemoryOss::new(oss_store.clone(), "bucket"));
        let oss = OssAdapter::new(ShardRouter::single(oss_client), no_wait());

        vec![
            (Awos::from_adapter(Arc::new(s3), prefix), s3_store),
            (Awos::from_adapter(Arc::new(oss), prefix), oss_store),
        ]
    }

    #[test]
    fn test_actual_key() {
        for (client, _) in clients(Some("/sub_dir")) {
            assert_eq!(client.actual_key("my_object"), "sub_dir/my_object");
        }
        for (client, _) in clients(None) {
            assert_eq!(client.actual_key("my_object"), "my_object");
        }
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        for (client, store) in clients(Some("/sub_dir")) {
            let options = PutObjectOptions::new()
                .meta("length", 14)
                .meta("owner", "me")
                .content_type("application/json");
            client.put("test-awos", "{\"a\":1}", &options).await.unwrap();
            assert!(store.contains("bucket", "sub_dir/test-awos"));

            let got = client
                .get("test-awos", &["length", "owner"])
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got.content, "{\"a\":1}", "{}", client.kind());
            assert_eq!(got.meta["length"], "14");
            assert_eq!(got.meta["owner"], "me");
            assert_eq!(got.headers["content-type"], "application/json");
        }
    }

    #[tokio::test]
    async fn test_default_content_type() {
        for (client, _) in clients(None) {
            client
                .put("plain", Bytes::from_static(b"x"), &PutObjectOptions::new())
                .await
                .unwrap();
            let meta = client
                .head("plain", &HeadOptions::with_standard_headers())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(meta["content-type"], "text/plain", "{}", client.kind());
        }
    }

    #[tokio::test]
    async fn test_unknown_key_is_none() {
        for (client, _) in clients(Some("p")) {
            assert!(client.get("missing", &[] as &[&str]).await.unwrap().is_none());
            assert!(client
                .get_as_buffer("missing", &[] as &[&str])
                .await
                .unwrap()
                .is_none());
            assert!(client
                .head("missing", &HeadOptions::default())
                .await
                .unwrap()
                .is_none());
        }
    }

    #[tokio::test]
    async fn test_get_binary_content() {
        for (client, _) in clients(None) {
            client
                .put("bin", vec![0xff_u8, 0xfe, 0x00], &PutObjectOptions::new())
                .await
                .unwrap();
            let err = client.get("bin", &[] as &[&str]).await.unwrap_err();
            assert!(matches!(err, AwosError::Decode(_)), "{}", client.kind());
            let raw = client
                .get_as_buffer("bin", &[] as &[&str])
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&raw.content[..], &[0xff, 0xfe, 0x00]);
        }
    }

    #[tokio::test]
    async fn test_del_and_del_multi_of_deleted_keys() {
        for (client, _) in clients(Some("sub_dir")) {
            for key in ["a", "b", "c"] {
                client.put(key, "v", &PutObjectOptions::new()).await.unwrap();
            }
            client.del("a").await.unwrap();
            assert!(client.get("a", &[] as &[&str]).await.unwrap().is_none());

            let failed = client.del_multi(&["a", "b", "c"]).await.unwrap();
            assert!(failed.is_empty(), "{}", client.kind());
            let again = client.del_multi(&["a", "b", "c"]).await.unwrap();
            assert!(again.is_empty());
            assert!(client.get("b", &[] as &[&str]).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_del_multi_over_limit_is_rejected_before_backend_call() {
        for (client, store) in clients(None) {
            let keys: Vec<String> = (0..1001).map(|i| format!("key-{}", i)).collect();
            let err = client.del_multi(&keys).await.unwrap_err();
            assert!(matches!(err, AwosError::Validation(_)));
            assert_eq!(store.delete_batches(), 0, "{}", client.kind());

            let failed = client.del_multi(&keys[..1000]).await.unwrap();
            assert!(failed.is_empty());
            assert_eq!(store.delete_batches(), 1);
        }
    }

    #[tokio::test]
    async fn test_del_multi_reports_physical_failed_keys() {
        for (client, store) in clients(Some("sub_dir")) {
            client.put("ok", "v", &PutObjectOptions::new()).await.unwrap();
            client.put("locked", "v", &PutObjectOptions::new()).await.unwrap();
            store.deny_delete("sub_dir/locked");
            let failed = client.del_multi(&["ok", "locked"]).await.unwrap();
            assert_eq!(failed, vec!["sub_dir/locked".to_string()], "{}", client.kind());
        }
    }

    async fn fill(client: &Awos, keys: impl IntoIterator<Item = String>) {
        for key in keys {
            client.put(&key, "x", &PutObjectOptions::new()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_flat_pagination_v1() {
        for (client, _) in clients(Some("sub_dir")) {
            fill(&client, (0..10).map(|i| format!("flat/{}", i))).await;
            let options = ListObjectOptions {
                prefix: Some("flat/".into()),
                max_keys: Some(6),
                ..Default::default()
            };
            let first = client.list_details("flat/", &options).await.unwrap();
            assert_eq!(first.objects.len(), 6, "{}", client.kind());
            assert!(first.is_truncated);
            assert_eq!(first.objects[0].key, "sub_dir/flat/0");
            let marker = first.next_marker.clone().expect("marker for truncated page");

            let second = client
                .list_details(
                    "flat/",
                    &ListObjectOptions {
                        marker: Some(marker),
                        ..options.clone()
                    },
                )
                .await
                .unwrap();
            assert_eq!(second.objects.len(), 4, "{}", client.kind());
            assert!(!second.is_truncated);

            let keys = client.list_object("flat/", &options).await.unwrap();
            assert_eq!(keys.len(), 6);
        }
    }

    #[tokio::test]
    async fn test_flat_pagination_v2() {
        for (client, _) in clients(None) {
            fill(&client, (0..10).map(|i| format!("flat2/{}", i))).await;
            let options = ListObjectV2Options {
                prefix: Some("flat2/".into()),
                max_keys: Some(6),
                ..Default::default()
            };
            let first = client.list_details_v2("flat2/", &options).await.unwrap();
            assert_eq!(first.objects.len(), 6, "{}", client.kind());
            assert!(first.is_truncated);

            let second = client
                .list_details_v2(
                    "flat2/",
                    &ListObjectV2Options {
                        continuation_token: first.next_continuation_token.clone(),
                        ..options.clone()
                    },
                )
                .await
                .unwrap();
            assert_eq!(second.objects.len(), 4, "{}", client.kind());
            assert!(!second.is_truncated);

            let keys = client.list_object_v2("flat2/", &options).await.unwrap();
            assert_eq!(keys, vec!["flat2/0", "flat2/1", "flat2/2", "flat2/3", "flat2/4", "flat2/5"]);
        }
    }

    #[tokio::test]
    async fn test_delimited_pagination_v1() {
        for (client, _) in clients(Some("sub_dir")) {
            fill(
                &client,
                (0..10).flat_map(|i| [format!("dirs/{}/a", i), format!("dirs/{}/b", i)]),
            )
            .await;
            let options = ListObjectOptions {
                prefix: Some("dirs/".into()),
                delimiter: Some("/".into()),
                max_keys: Some(6),
                ..Default::default()
            };
            let first = client.list_details("dirs/", &options).await.unwrap();
            assert_eq!(first.prefixes.len(), 6, "{}", client.kind());
            assert!(first.objects.is_empty());
            assert!(first.is_truncated);
            assert_eq!(first.prefixes[0], "sub_dir/dirs/0/");

            let second = client
                .list_details(
                    "dirs/",
                    &ListObjectOptions {
                        marker: first.next_marker.clone(),
                        ..options.clone()
                    },
                )
                .await
                .unwrap();
            assert_eq!(second.prefixes.len(), 4, "{}", client.kind());
            assert!(!second.is_truncated);
            assert_eq!(second.prefixes[0], "sub_dir/dirs/6/");
        }
    }

    #[tokio::test]
    async fn test_delimited_pagination_v2() {
        for (client, _) in clients(Some("sub_dir")) {
            fill(
                &client,
                (0..10).flat_map(|i| [format!("tree/{}/x", i), format!("tree/{}/y", i)]),
            )
            .await;
            let options = ListObjectV2Options {
                prefix: Some("tree/".into()),
                delimiter: Some("/".into()),
                max_keys: Some(6),
                ..Default::default()
            };
            let first = client.list_details_v2("tree/", &options).await.unwrap();
            assert_eq!(first.prefix.len(), 6, "{}", client.kind());
            assert!(first.is_truncated);

            let second = client
                .list_details_v2(
                    "tree/",
                    &ListObjectV2Options {
                        continuation_token: first.next_continuation_token.clone(),
                        ..options.clone()
                    },
                )
                .await
                .unwrap();
            assert_eq!(second.prefix.len(), 4, "{}", client.kind());
            assert!(!second.is_truncated);
            assert!(second.next_continuation_token.is_none());
        }
    }

    #[tokio::test]
    async fn test_head_meta_and_standard_headers() {
        for (client, _) in clients(Some("sub_dir")) {
            client
                .put("meta", "hello", &PutObjectOptions::new().meta("length", 14))
                .await
                .unwrap();
            let meta = client
                .head("meta", &HeadOptions::default())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(meta["length"], "14", "{}", client.kind());

            let full = client
                .head("meta", &HeadOptions::with_standard_headers())
                .await
                .unwrap()
                .unwrap();
            let millis: i64 = full["last-modified"].parse().unwrap();
            assert!(millis > 0);
            assert_eq!(millis % 1000, 0);
            assert_eq!(full["content-length"], "5");
            assert_eq!(full["length"], "14");
        }
    }

    #[tokio::test]
    async fn test_copy_with_meta() {
        for (client, _) in clients(Some("sub_dir")) {
            client
                .put("src", "payload", &PutObjectOptions::new().meta("old", "1"))
                .await
                .unwrap();
            let options = CopyObjectOptions::new().meta("a", "1").meta("b", "2");
            client.copy("dst", "src", &options).await.unwrap();

            let got = client.get("dst", &["a", "b", "old"]).await.unwrap().unwrap();
            assert_eq!(got.content, "payload");
            assert_eq!(got.meta, options.meta, "{}", client.kind());
        }
    }

    #[tokio::test]
    async fn test_put_retry_exhaustion_surfaces_backend_error() {
        for (client, store) in clients(None) {
            store.fail_next_writes(10);
            let err = client
                .put("k", "v", &PutObjectOptions::new())
                .await
                .unwrap_err();
            assert!(matches!(err, AwosError::Backend(_)));
            assert_eq!(store.write_attempts(), 3, "{}", client.kind());
        }
    }

    #[tokio::test]
    async fn test_signature_url_uses_physical_key() {
        for (client, _) in clients(Some("sub_dir")) {
            let url = client
                .signature_url(
                    "file.txt",
                    &SignatureUrlOptions {
                        method: SignMethod::Put,
                        expires: Some(120),
                    },
                )
                .await
                .unwrap();
            assert_eq!(url, "memory://bucket/sub_dir/file.txt?method=PUT&expires=120");
        }
    }

    #[tokio::test]
    async fn test_marker_type_round_trips_through_options() {
        for (client, _) in clients(None) {
            fill(&client, ["m/1".to_string(), "m/2".to_string()]).await;
            let page = client
                .list_details(
                    "m/",
                    &ListObjectOptions {
                        prefix: Some("m/".into()),
                        marker: Some(Marker::new("m/1")),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(page.objects.len(), 1);
            assert_eq!(page.objects[0].key, "m/2");
        }
    }
}
