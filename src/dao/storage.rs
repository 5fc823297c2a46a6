use std::error::Error;
use thiserror::Error;

/// Result alias shared by the durable and ephemeral stores.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failure of a store round-trip, independent of the backend that produced it.
///
/// Every backend failure is treated as transient: callers either retry (jobs) or surface a
/// "try again" error (request paths). Read paths may choose to degrade to "nothing cached".
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("stored value for `{key}` is corrupt: {message}")]
    Corrupt { key: String, message: String },
    /// The health supervisor saw a store fail its last check; writes are refused until it
    /// passes again.
    #[error("storage is degraded")]
    Degraded,
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Construct an error for a value that exists but cannot be decoded.
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }
}
