//! Job pipeline: named queues with bounded concurrency, retry with backoff, deduplication keys,
//! debouncing and a bounded log of exhausted jobs.
//!
//! Every scheduled job is written to a [`crate::dao::job_journal::JobJournal`] first and leaves
//! it only once it completed or failed for good, so delayed jobs and jobs interrupted by a
//! restart run again in the next process at their original time.
//!
//! Delivery is at-least-once from the handler's point of view (a transient failure or a restart
//! re-runs the whole job), so every worker is written to be idempotent.

pub mod pipeline;
pub mod queue;
pub mod workers;

use std::{fmt, time::Duration};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{dao::storage::StorageError, error::ServiceError};

pub use self::pipeline::{JobPipeline, WorkerDeps};
pub use self::queue::{EnqueueOptions, FailedJob, JobQueue};

/// Delay between attempts of a failing job.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// `delay_ms * 2^(attempt - 1)`.
    Exponential { delay_ms: u64 },
    /// Constant `delay_ms`.
    Fixed { delay_ms: u64 },
}

impl Backoff {
    /// Delay to wait after the given 1-based attempt failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { delay_ms } => {
                let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
                Duration::from_millis(delay_ms.saturating_mul(factor))
            }
        }
    }
}

/// Worker policy of one queue.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Maximum number of jobs running at once.
    pub concurrency: usize,
    /// Total attempts, first run included.
    pub attempts: u32,
    pub backoff: Backoff,
}

/// Outcome of a failed job attempt, or of a failed enqueue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// Worth retrying (store unavailable, data not visible yet).
    #[error("transient failure: {0}")]
    Transient(String),
    /// Retrying cannot help (session or question gone).
    #[error("permanent failure: {0}")]
    Permanent(String),
    /// Recorded once a job ran out of attempts or failed permanently.
    #[error("job on `{queue}` exhausted after {attempts} attempt(s): {last_error}")]
    Exhausted {
        queue: &'static str,
        attempts: u32,
        last_error: String,
    },
    #[error("queue `{0}` is shut down")]
    QueueClosed(&'static str),
}

impl From<StorageError> for JobError {
    fn from(err: StorageError) -> Self {
        JobError::Transient(err.to_string())
    }
}

impl From<ServiceError> for JobError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => JobError::Transient(source.to_string()),
            other => JobError::Permanent(other.to_string()),
        }
    }
}

/// Processes jobs of one queue.
pub trait JobHandler: Send + Sync + 'static {
    type Job: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    fn handle(&self, job: Self::Job) -> BoxFuture<'static, Result<(), JobError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let backoff = Backoff::Exponential { delay_ms: 1_000 };
        assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(4));
        assert_eq!(
            Backoff::Fixed { delay_ms: 500 }.delay_for(3),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let backoff = Backoff::Exponential { delay_ms: u64::MAX / 2 };
        assert_eq!(backoff.delay_for(80), Duration::from_millis(u64::MAX));
    }
}
