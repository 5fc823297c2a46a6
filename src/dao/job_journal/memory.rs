use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt};

use super::{JobJournal, JournalEntry, sort_pending};
use crate::dao::storage::StorageResult;

/// Journal kept in process memory. It survives queue restarts inside one process, which is
/// what single-node deployments and tests need.
#[derive(Clone, Default)]
pub struct MemoryJobJournal {
    entries: Arc<DashMap<(String, String), JournalEntry>>,
}

impl MemoryJobJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl JobJournal for MemoryJobJournal {
    fn save(&self, queue: &str, entry: JournalEntry) -> BoxFuture<'static, StorageResult<()>> {
        self.entries
            .insert((queue.to_owned(), entry.id.clone()), entry);
        future::ready(Ok(())).boxed()
    }

    fn remove(&self, queue: &str, id: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.entries.remove(&(queue.to_owned(), id.to_owned()));
        future::ready(Ok(())).boxed()
    }

    fn pending(&self, queue: &str) -> BoxFuture<'static, StorageResult<Vec<JournalEntry>>> {
        let mut entries: Vec<JournalEntry> = self
            .entries
            .iter()
            .filter(|item| item.key().0 == queue)
            .map(|item| item.value().clone())
            .collect();
        sort_pending(&mut entries);
        future::ready(Ok(entries)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::job_journal::JournalHold;

    fn entry(id: &str, run_at: i64) -> JournalEntry {
        JournalEntry {
            id: id.into(),
            payload: "{}".into(),
            run_at,
            hold: Some(("cleanup:s1".into(), JournalHold::Dedup)),
        }
    }

    #[tokio::test]
    async fn pending_entries_are_per_queue_and_ordered_by_run_time() {
        let journal = MemoryJobJournal::new();
        journal.save("timer", entry("b", 20)).await.unwrap();
        journal.save("timer", entry("a", 10)).await.unwrap();
        journal.save("cleanup", entry("c", 5)).await.unwrap();

        let ids: Vec<String> = journal
            .pending("timer")
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, ["a", "b"]);

        journal.remove("timer", "a").await.unwrap();
        journal.remove("timer", "a").await.unwrap();
        assert_eq!(journal.pending("timer").await.unwrap().len(), 1);
        assert_eq!(journal.len(), 2);
    }
}
