use redis::RedisError;
use thiserror::Error;
use uuid::Uuid;

pub type RedisResult<T> = std::result::Result<T, RedisStoreError>;

#[derive(Debug, Error)]
pub enum RedisStoreError {
    #[error("invalid Redis connection URL")]
    InvalidUrl {
        #[source]
        source: RedisError,
    },
    #[error("failed to connect to Redis")]
    Connect {
        #[source]
        source: RedisError,
    },
    #[error("Redis ping health check failed")]
    HealthPing {
        #[source]
        source: RedisError,
    },
    #[error("Redis `{operation}` failed for session `{session}`")]
    Command {
        operation: &'static str,
        session: Uuid,
        #[source]
        source: RedisError,
    },
    #[error("Redis `{operation}` failed for job queue `{queue}`")]
    Journal {
        operation: &'static str,
        queue: String,
        #[source]
        source: RedisError,
    },
}

/// Adapter for `map_err` that tags a command failure with its operation and session.
pub fn command_error(
    operation: &'static str,
    session: Uuid,
) -> impl FnOnce(RedisError) -> RedisStoreError {
    move |source| RedisStoreError::Command {
        operation,
        session,
        source,
    }
}
