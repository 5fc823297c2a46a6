use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt};
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::warn;

use super::{JobJournal, JournalEntry, sort_pending};
use crate::dao::{
    live_store::redis::RedisStoreError,
    storage::{StorageError, StorageResult},
};

/// Journal stored as one Redis hash per queue (`quiz:jobs:{queue}`), field = entry id,
/// value = JSON entry. The hash carries no TTL; entries leave when their job finishes.
#[derive(Clone)]
pub struct RedisJobJournal {
    connection: ConnectionManager,
}

impl RedisJobJournal {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

fn queue_key(queue: &str) -> String {
    format!("quiz:jobs:{queue}")
}

fn journal_error(
    operation: &'static str,
    queue: &str,
) -> impl FnOnce(redis::RedisError) -> RedisStoreError + use<> {
    let queue = queue.to_owned();
    move |source| RedisStoreError::Journal {
        operation,
        queue,
        source,
    }
}

impl JobJournal for RedisJobJournal {
    fn save(&self, queue: &str, entry: JournalEntry) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        let key = queue_key(queue);
        let map_err = journal_error("journal_save", queue);
        async move {
            let raw = serde_json::to_string(&entry)
                .map_err(|err| StorageError::corrupt(&key, err.to_string()))?;
            con.hset::<_, _, _, ()>(&key, &entry.id, raw)
                .await
                .map_err(map_err)?;
            Ok(())
        }
        .boxed()
    }

    fn remove(&self, queue: &str, id: &str) -> BoxFuture<'static, StorageResult<()>> {
        let mut con = self.connection.clone();
        let key = queue_key(queue);
        let id = id.to_owned();
        let map_err = journal_error("journal_remove", queue);
        async move {
            con.hdel::<_, _, ()>(&key, &id).await.map_err(map_err)?;
            Ok(())
        }
        .boxed()
    }

    fn pending(&self, queue: &str) -> BoxFuture<'static, StorageResult<Vec<JournalEntry>>> {
        let mut con = self.connection.clone();
        let key = queue_key(queue);
        let map_err = journal_error("journal_pending", queue);
        async move {
            let raw: HashMap<String, String> = con.hgetall(&key).await.map_err(map_err)?;
            let mut entries = Vec::with_capacity(raw.len());
            for (id, value) in raw {
                match serde_json::from_str::<JournalEntry>(&value) {
                    Ok(entry) => entries.push(entry),
                    Err(err) => {
                        warn!(key = %key, id = %id, error = %err, "dropping corrupt journal entry");
                        let _: Result<(), _> = con.hdel(&key, &id).await;
                    }
                }
            }
            sort_pending(&mut entries);
            Ok(entries)
        }
        .boxed()
    }
}
