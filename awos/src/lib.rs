//! Unified object storage over AWS S3 (and S3-compatible services) and
//! Aliyun OSS.
//!
//! ```no_run
//! use awos::{Awos, AwosConfig, PutObjectOptions};
//!
//! # async fn demo() -> awos::AwosResult<()> {
//! let config = AwosConfig::load("awos.toml".as_ref())?;
//! let client = Awos::new(&config)?;
//! client
//!     .put("greeting", "hello", &PutObjectOptions::new().meta("length", 5))
//!     .await?;
//! let object = client.get("greeting", &["length"]).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod signing;

pub use awos_common::*;
pub use backend::build_adapter;
pub use client::Awos;
pub use config::{AwosConfig, AwsOptions, BackendConfig, OssOptions, RetryConfig};
