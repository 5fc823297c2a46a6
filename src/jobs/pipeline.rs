use std::sync::Arc;

use tokio::{sync::Mutex, sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    dao::{job_journal::JobJournal, live_store::LiveStore, session_store::SessionStore},
    jobs::{
        FailedJob, JobQueue,
        workers::{
            CleanupJob, CleanupWorker, LeaderboardJob, LeaderboardWorker, QuestionTimerJob,
            QuestionTimerWorker, ScoreJob, ScoreWorker,
        },
    },
    state::rooms::RoomHub,
};

/// Collaborators handed to the workers.
#[derive(Clone)]
pub struct WorkerDeps {
    pub sessions: Arc<dyn SessionStore>,
    pub live: Arc<dyn LiveStore>,
    pub rooms: RoomHub,
    pub journal: Arc<dyn JobJournal>,
}

/// The four queues of the application and the dispatchers draining them.
pub struct JobPipeline {
    score: JobQueue<ScoreJob>,
    leaderboard: JobQueue<LeaderboardJob>,
    question_timer: JobQueue<QuestionTimerJob>,
    cleanup: JobQueue<CleanupJob>,
    shutdown: watch::Sender<bool>,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobPipeline {
    /// Spawn every queue with the policies from `config`. Jobs left in the journal by a previous
    /// process are resumed.
    pub fn start(config: &AppConfig, deps: WorkerDeps) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let grace = config.shutdown_grace;
        let queues = &config.queues;

        let (score, score_task) = JobQueue::start(
            "score",
            queues.score,
            ScoreWorker::new(
                Arc::clone(&deps.sessions),
                Arc::clone(&deps.live),
                deps.rooms.clone(),
                config.points_per_correct,
            ),
            Arc::clone(&deps.journal),
            shutdown_rx.clone(),
            grace,
        );
        let (leaderboard, leaderboard_task) = JobQueue::start(
            "leaderboard",
            queues.leaderboard,
            LeaderboardWorker::new(
                Arc::clone(&deps.sessions),
                Arc::clone(&deps.live),
                deps.rooms.clone(),
                config.points_per_correct,
            ),
            Arc::clone(&deps.journal),
            shutdown_rx.clone(),
            grace,
        );
        let (question_timer, timer_task) = JobQueue::start(
            "question_timer",
            queues.question_timer,
            QuestionTimerWorker::new(Arc::clone(&deps.live), deps.rooms.clone()),
            Arc::clone(&deps.journal),
            shutdown_rx.clone(),
            grace,
        );
        let (cleanup, cleanup_task) = JobQueue::start(
            "cleanup",
            queues.cleanup,
            CleanupWorker::new(deps.sessions, deps.live),
            deps.journal,
            shutdown_rx,
            grace,
        );

        Self {
            score,
            leaderboard,
            question_timer,
            cleanup,
            shutdown,
            dispatchers: Mutex::new(vec![score_task, leaderboard_task, timer_task, cleanup_task]),
        }
    }

    pub fn score(&self) -> &JobQueue<ScoreJob> {
        &self.score
    }

    pub fn leaderboard(&self) -> &JobQueue<LeaderboardJob> {
        &self.leaderboard
    }

    pub fn question_timer(&self) -> &JobQueue<QuestionTimerJob> {
        &self.question_timer
    }

    pub fn cleanup(&self) -> &JobQueue<CleanupJob> {
        &self.cleanup
    }

    /// Jobs that failed for good across every queue since start.
    pub fn failed_total(&self) -> u64 {
        self.score.failed_count()
            + self.leaderboard.failed_count()
            + self.question_timer.failed_count()
            + self.cleanup.failed_count()
    }

    /// Recent failures of every queue, newest last.
    pub fn failed_jobs(&self) -> Vec<FailedJob> {
        let mut failed: Vec<FailedJob> = self
            .score
            .failed_jobs()
            .into_iter()
            .chain(self.leaderboard.failed_jobs())
            .chain(self.question_timer.failed_jobs())
            .chain(self.cleanup.failed_jobs())
            .collect();
        failed.sort_by_key(|job| job.failed_at);
        failed
    }

    /// Stop taking new work and wait for the dispatchers to drain their in-flight jobs.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let dispatchers: Vec<_> = self.dispatchers.lock().await.drain(..).collect();
        for dispatcher in dispatchers {
            if let Err(err) = dispatcher.await {
                warn!(error = %err, "job dispatcher ended abnormally");
            }
        }
        info!("job pipeline stopped");
    }
}
