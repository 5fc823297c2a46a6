use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch},
    task::{JoinHandle, JoinSet},
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::{
        job_journal::{JobJournal, JournalEntry, JournalHold},
        models::now_millis,
    },
    jobs::{JobError, JobHandler, QueuePolicy},
};

/// Failed jobs kept per queue for inspection.
const FAILED_LOG_CAPACITY: usize = 100;

/// Job that ran out of attempts or failed permanently.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, ToSchema)]
pub struct FailedJob {
    pub queue: String,
    pub job_id: u64,
    /// Debug rendering of the job payload.
    pub job: String,
    pub attempts: u32,
    pub error: String,
    /// Epoch millis.
    pub failed_at: i64,
}

/// Scheduling options for [`JobQueue::enqueue_with`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Wait this long before the job becomes runnable.
    pub delay: Option<Duration>,
    /// While a job with this key is pending or running, further jobs with the same key are
    /// dropped.
    pub dedup_key: Option<String>,
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            dedup_key: None,
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    /// Debounce: the key frees up when the window elapses, before the job runs.
    OnStart,
    /// Dedup: the key frees up once the job finished.
    OnFinish,
}

impl From<Release> for JournalHold {
    fn from(release: Release) -> Self {
        match release {
            Release::OnStart => JournalHold::Debounce,
            Release::OnFinish => JournalHold::Dedup,
        }
    }
}

impl From<JournalHold> for Release {
    fn from(hold: JournalHold) -> Self {
        match hold {
            JournalHold::Debounce => Release::OnStart,
            JournalHold::Dedup => Release::OnFinish,
        }
    }
}

struct Envelope<J> {
    id: u64,
    /// Journal entry id.
    entry: String,
    job: J,
    key: Option<(String, Release)>,
}

struct QueueInner<J> {
    name: &'static str,
    policy: QueuePolicy,
    journal: Arc<dyn JobJournal>,
    tx: mpsc::UnboundedSender<Envelope<J>>,
    held_keys: DashMap<String, u64>,
    failed: Mutex<VecDeque<FailedJob>>,
    failed_total: AtomicU64,
    next_id: AtomicU64,
}

impl<J> QueueInner<J> {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Claim `key` for job `id`. Returns `false` when another job holds it.
    fn hold(&self, key: &str, id: u64) -> bool {
        match self.held_keys.entry(key.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    fn release(&self, key: &str, id: u64) {
        self.held_keys.remove_if(key, |_, holder| *holder == id);
    }

    /// Drop the journal entry of a job that completed or failed for good.
    async fn forget(&self, entry: &str) {
        if let Err(err) = self.journal.remove(self.name, entry).await {
            warn!(queue = self.name, entry, error = %err, "failed to remove finished job from the journal");
        }
    }

    fn record_failure(&self, failed: FailedJob) {
        self.failed_total.fetch_add(1, Ordering::Relaxed);
        let mut log = self.failed.lock().unwrap_or_else(PoisonError::into_inner);
        if log.len() == FAILED_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(failed);
    }
}

/// Handle to a named job queue. Cloning is cheap.
pub struct JobQueue<J> {
    inner: Arc<QueueInner<J>>,
}

impl<J> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<J> JobQueue<J>
where
    J: Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Spawn the dispatcher of a queue processed by `handler`, then reschedule every job the
    /// journal still holds for this queue.
    ///
    /// The dispatcher stops taking work once `shutdown` flips to `true`, then waits up to
    /// `grace` for running jobs before aborting them. Aborted and not yet due jobs stay in the
    /// journal for the next start.
    pub fn start<H>(
        name: &'static str,
        policy: QueuePolicy,
        handler: H,
        journal: Arc<dyn JobJournal>,
        shutdown: watch::Receiver<bool>,
        grace: Duration,
    ) -> (Self, JoinHandle<()>)
    where
        H: JobHandler<Job = J>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(QueueInner {
            name,
            policy,
            journal,
            tx,
            held_keys: DashMap::new(),
            failed: Mutex::new(VecDeque::new()),
            failed_total: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
        });
        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&inner),
            Arc::new(handler),
            rx,
            shutdown,
            grace,
        ));
        let queue = Self { inner };
        tokio::spawn(queue.clone().resume());
        (queue, dispatcher)
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Queue a job to run as soon as a worker slot is free.
    pub async fn enqueue(&self, job: J) -> Result<u64, JobError> {
        let id = self.inner.next_id();
        self.submit(id, job, None, None).await?;
        Ok(id)
    }

    /// Queue a job with a delay and/or a dedup key. Returns `Ok(None)` when the key is held.
    pub async fn enqueue_with(
        &self,
        job: J,
        options: EnqueueOptions,
    ) -> Result<Option<u64>, JobError> {
        self.ensure_open()?;
        let id = self.inner.next_id();
        let key = match options.dedup_key {
            Some(key) if !self.inner.hold(&key, id) => {
                debug!(queue = self.inner.name, key = %key, "duplicate job dropped");
                return Ok(None);
            }
            Some(key) => Some((key, Release::OnFinish)),
            None => None,
        };
        self.submit(id, job, key, options.delay).await?;
        Ok(Some(id))
    }

    /// Run `job` once `window` elapsed, collapsing every other call with the same key made
    /// during the window into this one. Returns `Ok(None)` for a collapsed call.
    pub async fn debounce(
        &self,
        key: impl Into<String>,
        window: Duration,
        job: J,
    ) -> Result<Option<u64>, JobError> {
        self.ensure_open()?;
        let key = key.into();
        let id = self.inner.next_id();
        if !self.inner.hold(&key, id) {
            return Ok(None);
        }
        self.submit(id, job, Some((key, Release::OnStart)), Some(window))
            .await?;
        Ok(Some(id))
    }

    /// Total jobs that failed since start, including those evicted from the log.
    pub fn failed_count(&self) -> u64 {
        self.inner.failed_total.load(Ordering::Relaxed)
    }

    /// Most recent failures, oldest first.
    pub fn failed_jobs(&self) -> Vec<FailedJob> {
        self.inner
            .failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn ensure_open(&self) -> Result<(), JobError> {
        if self.inner.tx.is_closed() {
            return Err(JobError::QueueClosed(self.inner.name));
        }
        Ok(())
    }

    /// Journal the job, then hand it to the dispatcher. A key already claimed by the caller is
    /// released when the job cannot be accepted.
    async fn submit(
        &self,
        id: u64,
        job: J,
        key: Option<(String, Release)>,
        delay: Option<Duration>,
    ) -> Result<(), JobError> {
        let release_key = |key: &Option<(String, Release)>| {
            if let Some((key, _)) = key {
                self.inner.release(key, id);
            }
        };
        if let Err(err) = self.ensure_open() {
            release_key(&key);
            return Err(err);
        }
        let payload = match serde_json::to_string(&job) {
            Ok(payload) => payload,
            Err(err) => {
                release_key(&key);
                return Err(JobError::Permanent(format!("job cannot be encoded: {err}")));
            }
        };
        let delay = delay.filter(|delay| !delay.is_zero());
        let entry = JournalEntry {
            id: Uuid::new_v4().simple().to_string(),
            payload,
            run_at: now_millis() + delay.map_or(0, |delay| delay.as_millis() as i64),
            hold: key
                .as_ref()
                .map(|(key, release)| (key.clone(), JournalHold::from(*release))),
        };
        if let Err(err) = self.inner.journal.save(self.inner.name, entry.clone()).await {
            warn!(queue = self.inner.name, job_id = id, error = %err, "job not journaled; it will not survive a restart");
        }
        self.schedule(
            Envelope {
                id,
                entry: entry.id,
                job,
                key,
            },
            delay,
        )
    }

    /// Reschedule the jobs a previous process left in the journal, keeping their run times.
    async fn resume(self) {
        let name = self.inner.name;
        let pending = match self.inner.journal.pending(name).await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(queue = name, error = %err, "journal unavailable; pending jobs not resumed");
                return;
            }
        };
        let mut resumed = 0usize;
        for entry in pending {
            let job = match serde_json::from_str::<J>(&entry.payload) {
                Ok(job) => job,
                Err(err) => {
                    warn!(queue = name, entry = %entry.id, error = %err, "dropping undecodable journaled job");
                    self.inner.forget(&entry.id).await;
                    continue;
                }
            };
            let id = self.inner.next_id();
            let key = match entry.hold {
                Some((key, _)) if !self.inner.hold(&key, id) => {
                    debug!(queue = name, key = %key, "journaled duplicate dropped");
                    self.inner.forget(&entry.id).await;
                    continue;
                }
                Some((key, hold)) => Some((key, Release::from(hold))),
                None => None,
            };
            let remaining = (entry.run_at - now_millis()).max(0) as u64;
            let envelope = Envelope {
                id,
                entry: entry.id,
                job,
                key,
            };
            if let Err(err) = self.schedule(envelope, Some(Duration::from_millis(remaining))) {
                debug!(queue = name, error = %err, "queue closed while resuming");
                return;
            }
            resumed += 1;
        }
        if resumed > 0 {
            info!(queue = name, resumed, "journaled jobs resumed");
        }
    }

    fn schedule(&self, envelope: Envelope<J>, delay: Option<Duration>) -> Result<(), JobError> {
        let Some(delay) = delay.filter(|delay| !delay.is_zero()) else {
            return self.send(envelope);
        };
        if self.inner.tx.is_closed() {
            return self.send(envelope);
        }
        let queue = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(err) = queue.send(envelope) {
                debug!(queue = queue.inner.name, error = %err, "delayed job left in the journal");
            }
        });
        Ok(())
    }

    fn send(&self, envelope: Envelope<J>) -> Result<(), JobError> {
        self.inner.tx.send(envelope).map_err(|rejected| {
            let envelope = rejected.0;
            if let Some((key, _)) = &envelope.key {
                self.inner.release(key, envelope.id);
            }
            JobError::QueueClosed(self.inner.name)
        })
    }
}

async fn dispatch<H: JobHandler>(
    inner: Arc<QueueInner<H::Job>>,
    handler: Arc<H>,
    mut rx: mpsc::UnboundedReceiver<Envelope<H::Job>>,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) {
    let slots = Arc::new(Semaphore::new(inner.policy.concurrency.max(1)));
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            Some(_) = running.join_next(), if !running.is_empty() => {}
            received = rx.recv() => {
                let Some(envelope) = received else { break };
                let Ok(permit) = Arc::clone(&slots).acquire_owned().await else { break };
                running.spawn(run_job(
                    Arc::clone(&inner),
                    Arc::clone(&handler),
                    envelope,
                    permit,
                ));
            }
        }
    }

    rx.close();
    let in_flight = running.len();
    if in_flight > 0 {
        debug!(queue = inner.name, in_flight, "draining in-flight jobs");
    }
    let drained = timeout(grace, async {
        while running.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            queue = inner.name,
            remaining = running.len(),
            "grace period elapsed; aborting in-flight jobs"
        );
        running.abort_all();
    }
}

async fn run_job<H: JobHandler>(
    inner: Arc<QueueInner<H::Job>>,
    handler: Arc<H>,
    envelope: Envelope<H::Job>,
    _permit: OwnedSemaphorePermit,
) {
    let Envelope { id, entry, job, key } = envelope;
    if let Some((key, Release::OnStart)) = &key {
        inner.release(key, id);
    }

    let max_attempts = inner.policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match handler.handle(job.clone()).await {
            Ok(()) => {
                debug!(queue = inner.name, job_id = id, attempt, "job completed");
                break;
            }
            Err(JobError::Transient(reason)) if attempt < max_attempts => {
                let delay = inner.policy.backoff.delay_for(attempt);
                warn!(
                    queue = inner.name,
                    job_id = id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "job failed; retrying"
                );
                sleep(delay).await;
            }
            Err(err) => {
                let exhausted = JobError::Exhausted {
                    queue: inner.name,
                    attempts: attempt,
                    last_error: err.to_string(),
                };
                error!(queue = inner.name, job_id = id, job = ?job, error = %exhausted, "job failed");
                inner.record_failure(FailedJob {
                    queue: inner.name.to_owned(),
                    job_id: id,
                    job: format!("{job:?}"),
                    attempts: attempt,
                    error: exhausted.to_string(),
                    failed_at: now_millis(),
                });
                break;
            }
        }
    }

    inner.forget(&entry).await;
    if let Some((key, Release::OnFinish)) = &key {
        inner.release(key, id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use futures::{FutureExt, future::BoxFuture};

    use super::*;
    use crate::{dao::job_journal::MemoryJobJournal, jobs::Backoff};

    /// Records every attempt and fails the first `fail_first` attempts of each job.
    #[derive(Clone, Default)]
    struct Recorder {
        attempts: Arc<Mutex<Vec<u32>>>,
        fail_first: u32,
        permanent: bool,
        work: Duration,
        running: Arc<AtomicU32>,
        peak: Arc<AtomicU32>,
    }

    impl Recorder {
        fn attempts(&self) -> Vec<u32> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl JobHandler for Recorder {
        type Job = u32;

        fn handle(&self, job: u32) -> BoxFuture<'static, Result<(), JobError>> {
            let this = self.clone();
            async move {
                let seen = {
                    let mut attempts = this.attempts.lock().unwrap();
                    attempts.push(job);
                    attempts.iter().filter(|value| **value == job).count() as u32
                };
                let now = this.running.fetch_add(1, Ordering::SeqCst) + 1;
                this.peak.fetch_max(now, Ordering::SeqCst);
                if !this.work.is_zero() {
                    sleep(this.work).await;
                }
                this.running.fetch_sub(1, Ordering::SeqCst);
                if seen <= this.fail_first {
                    if this.permanent {
                        return Err(JobError::Permanent(format!("job {job} rejected")));
                    }
                    return Err(JobError::Transient(format!("job {job} attempt {seen}")));
                }
                Ok(())
            }
            .boxed()
        }
    }

    fn policy(concurrency: usize, attempts: u32) -> QueuePolicy {
        QueuePolicy {
            concurrency,
            attempts,
            backoff: Backoff::Exponential { delay_ms: 100 },
        }
    }

    fn start(
        recorder: &Recorder,
        policy: QueuePolicy,
    ) -> (JobQueue<u32>, JoinHandle<()>, watch::Sender<bool>) {
        start_with_journal(recorder, policy, MemoryJobJournal::new())
    }

    fn start_with_journal(
        recorder: &Recorder,
        policy: QueuePolicy,
        journal: MemoryJobJournal,
    ) -> (JobQueue<u32>, JoinHandle<()>, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue, handle) = JobQueue::start(
            "test",
            policy,
            recorder.clone(),
            Arc::new(journal),
            shutdown_rx,
            Duration::from_secs(5),
        );
        (queue, handle, shutdown_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let recorder = Recorder {
            fail_first: 2,
            ..Recorder::default()
        };
        let (queue, _handle, _shutdown) = start(&recorder, policy(1, 3));

        queue.enqueue(7).await.unwrap();
        sleep(Duration::from_secs(5)).await;

        assert_eq!(recorder.attempts(), vec![7, 7, 7]);
        assert_eq!(queue.failed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_job_is_recorded_once() {
        let recorder = Recorder {
            fail_first: 10,
            ..Recorder::default()
        };
        let (queue, _handle, _shutdown) = start(&recorder, policy(1, 3));

        queue.enqueue(1).await.unwrap();
        sleep(Duration::from_secs(5)).await;

        assert_eq!(recorder.attempts().len(), 3);
        let failed = queue.failed_jobs();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 3);
        assert_eq!(failed[0].job, "1");
        assert!(failed[0].error.contains("exhausted after 3 attempt(s)"));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let recorder = Recorder {
            fail_first: 10,
            permanent: true,
            ..Recorder::default()
        };
        let (queue, _handle, _shutdown) = start(&recorder, policy(1, 5));

        queue.enqueue(3).await.unwrap();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(recorder.attempts(), vec![3]);
        assert_eq!(queue.failed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dedup_key_drops_jobs_until_the_holder_finishes() {
        let recorder = Recorder {
            work: Duration::from_millis(200),
            ..Recorder::default()
        };
        let (queue, _handle, _shutdown) = start(&recorder, policy(4, 1));
        let options = || EnqueueOptions::delayed(Duration::from_secs(1)).with_dedup_key("k");

        assert!(queue.enqueue_with(1, options()).await.unwrap().is_some());
        assert!(queue.enqueue_with(2, options()).await.unwrap().is_none());
        sleep(Duration::from_secs(2)).await;
        assert!(queue.enqueue_with(3, options()).await.unwrap().is_some());
        sleep(Duration::from_secs(2)).await;

        assert_eq!(recorder.attempts(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_collapses_triggers_within_the_window() {
        let recorder = Recorder::default();
        let (queue, _handle, _shutdown) = start(&recorder, policy(2, 1));
        let window = Duration::from_secs(1);

        assert!(queue.debounce("session", window, 1).await.unwrap().is_some());
        for value in 2..6 {
            assert!(queue.debounce("session", window, value).await.unwrap().is_none());
        }
        assert!(queue.debounce("other", window, 9).await.unwrap().is_some());
        sleep(Duration::from_millis(1_500)).await;
        assert!(queue.debounce("session", window, 6).await.unwrap().is_some());
        sleep(Duration::from_millis(1_500)).await;

        let mut attempts = recorder.attempts();
        attempts.sort_unstable();
        assert_eq!(attempts, vec![1, 6, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_by_the_policy() {
        let recorder = Recorder {
            work: Duration::from_secs(1),
            ..Recorder::default()
        };
        let (queue, _handle, _shutdown) = start(&recorder, policy(2, 1));

        for job in 0..6 {
            queue.enqueue(job).await.unwrap();
        }
        sleep(Duration::from_secs(10)).await;

        assert_eq!(recorder.attempts().len(), 6);
        assert_eq!(recorder.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_running_jobs_and_closes_the_queue() {
        let recorder = Recorder {
            work: Duration::from_secs(2),
            ..Recorder::default()
        };
        let (queue, handle, shutdown) = start(&recorder, policy(1, 1));

        queue.enqueue(1).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        shutdown.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(recorder.running.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.attempts(), vec![1]);
        assert_eq!(queue.enqueue(2).await, Err(JobError::QueueClosed("test")));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_job_survives_a_restart_of_the_queue() {
        let journal = MemoryJobJournal::new();
        let before = Recorder::default();
        let (queue, handle, shutdown) = start_with_journal(&before, policy(1, 1), journal.clone());

        queue
            .enqueue_with(
                5,
                EnqueueOptions::delayed(Duration::from_secs(10)).with_dedup_key("timer"),
            )
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
        shutdown.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(journal.len(), 1);

        let after = Recorder::default();
        let (_queue, _handle, _shutdown) = start_with_journal(&after, policy(1, 1), journal.clone());
        sleep(Duration::from_secs(12)).await;

        assert!(before.attempts().is_empty());
        assert_eq!(after.attempts(), vec![5]);
        assert!(journal.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_and_failed_jobs_leave_the_journal() {
        let journal = MemoryJobJournal::new();
        let recorder = Recorder {
            fail_first: 1,
            permanent: true,
            ..Recorder::default()
        };
        let (queue, _handle, _shutdown) = start_with_journal(&recorder, policy(2, 1), journal.clone());

        queue.enqueue(1).await.unwrap();
        queue.debounce("k", Duration::from_millis(100), 2).await.unwrap();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(queue.failed_count(), 2);
        assert!(journal.is_empty());
    }
}
