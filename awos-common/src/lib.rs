//! Shared contract of the awos storage client: unified request/response
//! types, the error taxonomy, key namespacing, shard routing, the write
//! retry policy, and the trait both backend adapters implement.

pub mod backend;
pub mod error;
pub mod keys;
pub mod retry;
pub mod types;

pub use backend::{BackendKind, StorageAdapter, MAX_DELETE_BATCH};
pub use error::{AwosError, AwosResult, BoxError};
pub use keys::{shard_bucket_name, KeyNamespace, ShardRouter};
pub use retry::RetryPolicy;
pub use types::*;
