pub mod oss;
pub mod s3;
pub mod transport;
pub mod xml;

#[cfg(test)]
pub mod memory;

use std::sync::Arc;

use tracing::info;

use awos_common::{shard_bucket_name, AwosError, AwosResult, ShardRouter, StorageAdapter};

use crate::config::{shard_table, AwosConfig, BackendConfig};

use self::oss::{OssAdapter, OssApi, OssClientConfig, OssHttpClient};
use self::s3::{S3Adapter, S3ClientConfig, S3HttpClient};

/// Bucket router for a base bucket and optional shard letter sets.
fn bucket_router(bucket: &str, shards: &Option<Vec<String>>) -> AwosResult<ShardRouter<String>> {
    match shard_table(shards) {
        Some(table) => ShardRouter::sharded(
            table
                .iter()
                .map(|letters| (letters.clone(), shard_bucket_name(bucket, letters))),
        ),
        None => Ok(ShardRouter::single(bucket.to_string())),
    }
}

/// Construct the backend adapter selected by `config.backend`.
pub fn build_adapter(config: &AwosConfig) -> AwosResult<Arc<dyn StorageAdapter>> {
    config.validate()?;
    let http = transport::build_http_client(config.timeout())
        .map_err(|e| AwosError::Config(format!("Failed to build HTTP client: {}", e)))?;
    let retry = config.retry.policy();

    match &config.backend {
        BackendConfig::Aws(aws) => {
            let buckets = bucket_router(&aws.bucket, &aws.shards)?;
            let client = S3HttpClient::new(
                S3ClientConfig {
                    access_key_id: aws.access_key_id.clone(),
                    secret_access_key: aws.secret_access_key.clone(),
                    region: aws.effective_region().to_string(),
                    endpoint: aws.endpoint.clone(),
                    force_path_style: aws.force_path_style,
                    signature_version: aws.signature_version,
                },
                http,
            )
            .map_err(|e| AwosError::Config(e.to_string()))?;

            info!(
                bucket = %aws.bucket,
                region = %aws.effective_region(),
                sharded = buckets.is_sharded(),
                shards = buckets.targets().len(),
                path_style = aws.force_path_style,
                "S3 backend ready"
            );
            Ok(Arc::new(S3Adapter::new(Arc::new(client), buckets, retry)))
        }
        BackendConfig::Oss(oss) => {
            let endpoint = oss.endpoint.clone().unwrap_or_default();
            let make_client = |bucket: &str| -> AwosResult<Arc<dyn OssApi>> {
                let client = OssHttpClient::new(
                    OssClientConfig {
                        access_key_id: oss.access_key_id.clone(),
                        access_key_secret: oss.access_key_secret.clone(),
                        bucket: bucket.to_string(),
                        endpoint: endpoint.clone(),
                    },
                    http.clone(),
                )
                .map_err(|e| AwosError::Config(e.to_string()))?;
                Ok(Arc::new(client))
            };

            let router = match shard_table(&oss.shards) {
                Some(table) => {
                    let mut shards = Vec::with_capacity(table.len());
                    for letters in table {
                        let bucket = shard_bucket_name(&oss.bucket, letters);
                        shards.push((letters.clone(), make_client(&bucket)?));
                    }
                    ShardRouter::sharded(shards)?
                }
                None => ShardRouter::single(make_client(&oss.bucket)?),
            };

            info!(
                bucket = %oss.bucket,
                endpoint = %endpoint,
                sharded = router.is_sharded(),
                shards = router.targets().len(),
                "OSS backend ready"
            );
            Ok(Arc::new(OssAdapter::new(router, retry)))
        }
    }
}
