use std::collections::HashMap;

use crate::error::{AwosError, AwosResult};

/// Maps caller-visible (logical) keys to the keys stored in the backend.
///
/// With prefix `sub_dir`, `my_object` is stored as `sub_dir/my_object`;
/// without a prefix keys pass through unchanged. A leading `/` on the
/// configured prefix is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyNamespace {
    prefix: String,
}

impl KeyNamespace {
    pub fn new(prefix: Option<&str>) -> Self {
        let prefix = prefix.unwrap_or("");
        let prefix = prefix.strip_prefix('/').unwrap_or(prefix);
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn actual_key(&self, logical_key: &str) -> String {
        if self.prefix.is_empty() {
            logical_key.to_string()
        } else {
            format!("{}/{}", self.prefix, logical_key)
        }
    }
}

/// Name of the container backing one shard: `{bucket}-{letters}` (lowercased).
pub fn shard_bucket_name(bucket: &str, letters: &str) -> String {
    format!("{}-{}", bucket, letters.to_lowercase())
}

/// One entry of a shard table.
#[derive(Debug, Clone)]
pub struct Shard<T> {
    letters: String,
    target: T,
}

/// Picks the container (or client handle) responsible for a physical key.
///
/// Sharded routing looks at the last character of the key, lowercased, and
/// returns the shard whose letter set contains it.
#[derive(Debug, Clone)]
pub enum ShardRouter<T> {
    Single(T),
    Sharded(Vec<Shard<T>>),
}

impl<T> ShardRouter<T> {
    pub fn single(target: T) -> Self {
        ShardRouter::Single(target)
    }

    /// Build a sharded router from `(letters, target)` pairs.
    ///
    /// Letter sets are matched case-insensitively. An empty table, an empty
    /// letter set, or a character claimed by two shards is rejected.
    pub fn sharded<I>(shards: I) -> AwosResult<Self>
    where
        I: IntoIterator<Item = (String, T)>,
    {
        let mut owners: HashMap<char, String> = HashMap::new();
        let mut table = Vec::new();

        for (letters, target) in shards {
            let letters = letters.to_lowercase();
            if letters.is_empty() {
                return Err(AwosError::Config("shard letters must not be empty".into()));
            }
            for c in letters.chars() {
                if let Some(prev) = owners.insert(c, letters.clone()) {
                    if prev != letters {
                        return Err(AwosError::Config(format!(
                            "character '{}' is claimed by shards '{}' and '{}'",
                            c, prev, letters
                        )));
                    }
                }
            }
            table.push(Shard { letters, target });
        }

        if table.is_empty() {
            return Err(AwosError::Config("shard table must not be empty".into()));
        }
        Ok(ShardRouter::Sharded(table))
    }

    pub fn is_sharded(&self) -> bool {
        matches!(self, ShardRouter::Sharded(_))
    }

    pub fn route(&self, key: &str) -> AwosResult<&T> {
        self.route_index(key).map(|i| self.target_at(i))
    }

    /// Route a batch that must live in one container.
    ///
    /// Keys spanning several shards are rejected rather than silently sent
    /// to the first key's container.
    pub fn route_batch<S: AsRef<str>>(&self, keys: &[S]) -> AwosResult<&T> {
        let first = keys
            .first()
            .ok_or_else(|| AwosError::Validation("batch must contain at least one key".into()))?;
        let index = self.route_index(first.as_ref())?;
        for key in &keys[1..] {
            if self.route_index(key.as_ref())? != index {
                return Err(AwosError::Validation(format!(
                    "batch spans multiple shards: '{}' and '{}' live in different containers",
                    first.as_ref(),
                    key.as_ref()
                )));
            }
        }
        Ok(self.target_at(index))
    }

    /// Every target, in configuration order.
    pub fn targets(&self) -> Vec<&T> {
        match self {
            ShardRouter::Single(target) => vec![target],
            ShardRouter::Sharded(shards) => shards.iter().map(|s| &s.target).collect(),
        }
    }

    fn route_index(&self, key: &str) -> AwosResult<usize> {
        let shards = match self {
            ShardRouter::Single(_) => return Ok(0),
            ShardRouter::Sharded(shards) => shards,
        };
        let suffix = key
            .chars()
            .last()
            .ok_or_else(|| AwosError::Routing("cannot route an empty key to a shard".into()))?;
        shards
            .iter()
            .position(|s| suffix.to_lowercase().all(|c| s.letters.contains(c)))
            .ok_or_else(|| {
                AwosError::Routing(format!("key '{}' does not exist in shards bucket", key))
            })
    }

    fn target_at(&self, index: usize) -> &T {
        match self {
            ShardRouter::Single(target) => target,
            ShardRouter::Sharded(shards) => &shards[index].target,
        }
    }
}
