mod error;
mod keys;
pub mod store;

pub use error::RedisStoreError;
pub use store::RedisLiveStore;

use crate::dao::storage::StorageError;

impl From<RedisStoreError> for StorageError {
    fn from(err: RedisStoreError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}
