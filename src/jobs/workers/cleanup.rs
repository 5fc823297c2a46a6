use std::sync::Arc;

use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{live_store::LiveStore, models::SessionStatus, session_store::SessionStore},
    jobs::{JobError, JobHandler},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupJob {
    pub session_id: Uuid,
}

impl CleanupJob {
    pub fn dedup_key(&self) -> String {
        format!("cleanup:{}", self.session_id)
    }
}

/// Purges the ephemeral state of a session that is finished (or no longer exists).
pub struct CleanupWorker {
    sessions: Arc<dyn SessionStore>,
    live: Arc<dyn LiveStore>,
}

impl CleanupWorker {
    pub fn new(sessions: Arc<dyn SessionStore>, live: Arc<dyn LiveStore>) -> Self {
        Self { sessions, live }
    }
}

impl JobHandler for CleanupWorker {
    type Job = CleanupJob;

    fn handle(&self, job: CleanupJob) -> BoxFuture<'static, Result<(), JobError>> {
        let sessions = Arc::clone(&self.sessions);
        let live = Arc::clone(&self.live);
        async move {
            match sessions.find_session(job.session_id).await? {
                Some(session) if session.status != SessionStatus::Finished => {
                    info!(
                        session_id = %job.session_id,
                        status = session.status.as_str(),
                        "session is running again; cleanup skipped"
                    );
                    return Ok(());
                }
                _ => {}
            }
            let removed = live.purge_session(job.session_id).await?;
            info!(session_id = %job.session_id, removed, "ephemeral session state purged");
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::{
        live_store::{MemoryLiveStore, RoomMeta},
        models::SessionEntity,
        session_store::MemorySessionStore,
    };

    fn session(status: SessionStatus) -> SessionEntity {
        SessionEntity {
            id: Uuid::new_v4(),
            title: "Cleanup".into(),
            join_code: "CLEAN2".into(),
            presenter_token: "token".into(),
            status,
            started_at: None,
            duration_seconds: None,
            questions: Vec::new(),
            created_at: 0,
        }
    }

    async fn seed(live: &MemoryLiveStore, session_id: Uuid) {
        live.set_room_meta(
            session_id,
            RoomMeta {
                status: Some(SessionStatus::Finished),
                ..RoomMeta::default()
            },
        )
        .await
        .unwrap();
        live.update_score(session_id, "id:p1", 10, 0, "Ada").await.unwrap();
    }

    #[tokio::test]
    async fn finished_session_is_purged_and_second_run_is_a_noop() {
        let sessions = Arc::new(MemorySessionStore::new());
        let live = Arc::new(MemoryLiveStore::new(Duration::from_secs(60)));
        let finished = session(SessionStatus::Finished);
        let session_id = finished.id;
        sessions.create_session(finished).await.unwrap();
        seed(&live, session_id).await;
        let worker = CleanupWorker::new(sessions, live.clone());

        worker.handle(CleanupJob { session_id }).await.unwrap();
        worker.handle(CleanupJob { session_id }).await.unwrap();

        assert_eq!(live.room_meta(session_id).await.unwrap(), None);
        assert!(live.top_scores(session_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_session_is_left_alone() {
        let sessions = Arc::new(MemorySessionStore::new());
        let live = Arc::new(MemoryLiveStore::new(Duration::from_secs(60)));
        let running = session(SessionStatus::Live);
        let session_id = running.id;
        sessions.create_session(running).await.unwrap();
        seed(&live, session_id).await;

        CleanupWorker::new(sessions, live.clone())
            .handle(CleanupJob { session_id })
            .await
            .unwrap();

        assert!(live.room_meta(session_id).await.unwrap().is_some());
    }
}
