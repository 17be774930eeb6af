/// Boxed native error of a storage backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the unified storage client.
///
/// Object-not-found is not an error: `get`, `get_as_buffer` and `head`
/// report it as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum AwosError {
    /// The key's suffix matched no configured shard.
    #[error("Routing error: {0}")]
    Routing(String),

    /// Caller input was rejected before any backend call was made.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Construction-time configuration is incomplete or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A response could not be turned into the requested shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Failure reported by the backend, kept as the backend produced it.
    #[error(transparent)]
    Backend(BoxError),
}

/// Result type for unified storage operations
pub type AwosResult<T> = Result<T, AwosError>;

impl AwosError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        AwosError::Backend(Box::new(err))
    }

    /// Only backend failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AwosError::Backend(_))
    }

    /// Borrow the native backend error, if this is one of type `E`.
    pub fn backend_error<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            AwosError::Backend(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}
