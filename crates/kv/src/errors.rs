//! Storage error types.

/// The main error type for KV storage operations.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The underlying storage backend failed.
    #[error("storage backend: {0}")]
    Backend(String),

    /// A stored value could not be interpreted.
    #[error("malformed entry under {key}: {msg}")]
    MalformedEntry { key: String, msg: String },
}

/// A type alias for `Result<T, KvError>`.
pub type KvResult<T> = Result<T, KvError>;
