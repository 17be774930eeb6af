use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use awos_common::{AwosError, AwosResult, RetryPolicy};

use crate::backend::s3::SignatureVersion;

/// Region used for path-style (MinIO-like) endpoints when none is given.
pub const DEFAULT_PATH_STYLE_REGION: &str = "cn-north-1";

fn default_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwosConfig {
    /// Key prefix applied to every object key. A leading `/` is ignored.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub backend: BackendConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Aws(AwsOptions),
    Oss(OssOptions),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsOptions {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub signature_version: SignatureVersion,
    #[serde(default)]
    pub shards: Option<Vec<String>>,
}

impl AwsOptions {
    pub fn effective_region(&self) -> &str {
        match &self.region {
            Some(region) => region,
            None => DEFAULT_PATH_STYLE_REGION,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OssOptions {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub shards: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            min_backoff_ms: policy.min_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            min_backoff: Duration::from_millis(self.min_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

fn require(value: &str, name: &str) -> AwosResult<()> {
    if value.is_empty() {
        return Err(AwosError::Config(format!("{} must not be empty", name)));
    }
    Ok(())
}

/// Configured shard letter sets, or `None` for a single bucket. An empty
/// list means no sharding.
pub fn shard_table(shards: &Option<Vec<String>>) -> Option<&[String]> {
    shards.as_deref().filter(|s| !s.is_empty())
}

fn validate_shards(shards: &Option<Vec<String>>) -> AwosResult<()> {
    let Some(table) = shard_table(shards) else {
        return Ok(());
    };
    let mut seen = HashSet::new();
    for letters in table {
        require(letters, "shard letters")?;
        for c in letters.to_lowercase().chars() {
            if !seen.insert(c) {
                return Err(AwosError::Config(format!(
                    "character '{}' appears in more than one shard",
                    c
                )));
            }
        }
    }
    Ok(())
}

impl AwosConfig {
    pub fn load(path: &Path) -> AwosResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AwosError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AwosConfig = toml::from_str(&content).map_err(|e| {
            AwosError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> AwosResult<Self> {
        let config: AwosConfig = toml::from_str(content)
            .map_err(|e| AwosError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AwosResult<()> {
        match &self.backend {
            BackendConfig::Aws(aws) => {
                require(&aws.access_key_id, "access_key_id")?;
                require(&aws.secret_access_key, "secret_access_key")?;
                require(&aws.bucket, "bucket")?;
                if aws.force_path_style {
                    if aws.endpoint.as_deref().unwrap_or("").is_empty() {
                        return Err(AwosError::Config(
                            "endpoint is required when force_path_style = true".into(),
                        ));
                    }
                } else if aws.region.as_deref().unwrap_or("").is_empty() {
                    return Err(AwosError::Config(
                        "region is required when force_path_style = false".into(),
                    ));
                }
                validate_shards(&aws.shards)?;
            }
            BackendConfig::Oss(oss) => {
                require(&oss.access_key_id, "access_key_id")?;
                require(&oss.access_key_secret, "access_key_secret")?;
                require(&oss.bucket, "bucket")?;
                require(oss.endpoint.as_deref().unwrap_or(""), "endpoint")?;
                validate_shards(&oss.shards)?;
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(AwosError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(AwosError::Config("timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
