pub mod rooms;

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    config::AppConfig,
    dao::{
        job_journal::{JobJournal, MemoryJobJournal},
        live_store::LiveStore,
        session_store::SessionStore,
        storage::StorageError,
    },
    error::ServiceError,
    jobs::{JobPipeline, WorkerDeps},
};

pub use self::rooms::{BroadcastError, RoomHub};

pub type SharedState = Arc<AppState>;

/// Central application state: configuration, both stores, the room hub and the job pipeline.
pub struct AppState {
    config: Arc<AppConfig>,
    sessions: Arc<dyn SessionStore>,
    live: Arc<dyn LiveStore>,
    rooms: RoomHub,
    jobs: JobPipeline,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] with an in-memory job journal and
    /// start the job pipeline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: AppConfig,
        sessions: Arc<dyn SessionStore>,
        live: Arc<dyn LiveStore>,
    ) -> SharedState {
        Self::with_journal(config, sessions, live, Arc::new(MemoryJobJournal::new()))
    }

    /// Like [`AppState::new`], resuming the jobs `journal` still holds from a previous run.
    pub fn with_journal(
        config: AppConfig,
        sessions: Arc<dyn SessionStore>,
        live: Arc<dyn LiveStore>,
        journal: Arc<dyn JobJournal>,
    ) -> SharedState {
        let rooms = RoomHub::new();
        let jobs = JobPipeline::start(
            &config,
            WorkerDeps {
                sessions: Arc::clone(&sessions),
                live: Arc::clone(&live),
                rooms: rooms.clone(),
                journal,
            },
        );
        let (degraded, _rx) = watch::channel(false);
        Arc::new(Self {
            config: Arc::new(config),
            sessions,
            live,
            rooms,
            jobs,
            degraded,
        })
    }

    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    /// Durable store for sessions and submissions.
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Ephemeral per-session state.
    pub fn live(&self) -> &Arc<dyn LiveStore> {
        &self.live
    }

    /// Registry of socket connections grouped into rooms.
    pub fn rooms(&self) -> &RoomHub {
        &self.rooms
    }

    pub fn jobs(&self) -> &JobPipeline {
        &self.jobs
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Refuse a write while the stores are flagged degraded. Reads are never gated.
    pub fn ensure_writable(&self) -> Result<(), ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Unavailable(StorageError::Degraded));
        }
        Ok(())
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn set_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}
