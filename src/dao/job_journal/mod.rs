//! Durable record of scheduled jobs, so delayed work (question timers, cleanups) and jobs that
//! were queued or running when the process stopped are resumed by the next process.
//!
//! An entry is written before a job is scheduled and removed once the job completed or failed
//! for good. Whatever is left when a queue starts is rescheduled at its original run time.

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::dao::storage::StorageResult;

pub use self::memory::MemoryJobJournal;

/// How a journaled job held its key when it was scheduled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JournalHold {
    /// Dedup key, released once the job finished.
    Dedup,
    /// Debounce key, released when the job starts.
    Debounce,
}

/// One scheduled job as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    /// Unique across restarts.
    pub id: String,
    /// JSON encoding of the job.
    pub payload: String,
    /// Epoch millis at which the job becomes runnable.
    pub run_at: i64,
    pub hold: Option<(String, JournalHold)>,
}

/// Storage of pending jobs, partitioned by queue name.
pub trait JobJournal: Send + Sync {
    /// Insert or replace an entry.
    fn save(&self, queue: &str, entry: JournalEntry) -> BoxFuture<'static, StorageResult<()>>;
    /// Drop an entry. Removing a missing entry is a no-op.
    fn remove(&self, queue: &str, id: &str) -> BoxFuture<'static, StorageResult<()>>;
    /// Every entry of the queue, earliest `run_at` first.
    fn pending(&self, queue: &str) -> BoxFuture<'static, StorageResult<Vec<JournalEntry>>>;
}

fn sort_pending(entries: &mut [JournalEntry]) {
    entries.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.id.cmp(&b.id)));
}
