use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to insert session `{id}`")]
    InsertSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load session `{id}`")]
    LoadSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to look up join code `{code}`")]
    LookupJoinCode {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to update session `{id}`")]
    UpdateSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete session `{id}`")]
    DeleteSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to write submission `{key}` for session `{id}`")]
    WriteSubmission {
        id: Uuid,
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to read submission `{key}` for session `{id}`")]
    ReadSubmission {
        id: Uuid,
        key: String,
        #[source]
        source: MongoError,
    },
}

/// Whether the driver error is a unique index violation.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY_CODE
        }
        _ => false,
    }
}
