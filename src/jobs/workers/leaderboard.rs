use std::sync::Arc;

use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{live_store::LiveStore, session_store::SessionStore},
    jobs::{JobError, JobHandler},
    services::{
        room_events::{self, SessionTarget},
        stats,
    },
    state::rooms::RoomHub,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardJob {
    pub session_id: Uuid,
    pub limit: usize,
}

impl LeaderboardJob {
    /// Debounce key shared by every trigger for the session.
    pub fn debounce_key(&self) -> String {
        format!("leaderboard:{}", self.session_id)
    }
}

/// Reads the top of the score ranking and pushes it to the session rooms, followed by the
/// full results aggregated from the durable submissions.
pub struct LeaderboardWorker {
    sessions: Arc<dyn SessionStore>,
    live: Arc<dyn LiveStore>,
    rooms: RoomHub,
    points_per_correct: u32,
}

impl LeaderboardWorker {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        live: Arc<dyn LiveStore>,
        rooms: RoomHub,
        points_per_correct: u32,
    ) -> Self {
        Self {
            sessions,
            live,
            rooms,
            points_per_correct,
        }
    }
}

impl JobHandler for LeaderboardWorker {
    type Job = LeaderboardJob;

    fn handle(&self, job: LeaderboardJob) -> BoxFuture<'static, Result<(), JobError>> {
        let sessions = Arc::clone(&self.sessions);
        let live = Arc::clone(&self.live);
        let rooms = self.rooms.clone();
        let points = self.points_per_correct;
        async move {
            let leaderboard = live.top_scores(job.session_id, job.limit).await?;
            let full = sessions.find_full_session(job.session_id).await?;
            let join_code = match live.room_meta(job.session_id).await {
                Ok(meta) => meta.and_then(|meta| meta.join_code),
                Err(err) => {
                    warn!(session_id = %job.session_id, error = %err, "room meta unavailable; broadcasting to session room only");
                    None
                }
            };
            let target = SessionTarget::new(job.session_id, join_code.as_deref());
            debug!(session_id = %job.session_id, rows = leaderboard.len(), "leaderboard broadcast");
            room_events::broadcast_leaderboard(&rooms, target, leaderboard);
            match full {
                Some(full) => room_events::broadcast_results(
                    &rooms,
                    target,
                    stats::aggregate(&full.session, &full.submissions, points),
                ),
                None => debug!(session_id = %job.session_id, "session gone; results not broadcast"),
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        dao::{
            live_store::{MemoryLiveStore, RoomMeta},
            models::{AnswerEntity, QuestionEntity, SessionEntity, SessionStatus, SubmissionEntity},
            session_store::MemorySessionStore,
        },
        state::rooms::code_room,
    };

    fn session(id: Uuid) -> SessionEntity {
        SessionEntity {
            id,
            title: "Board".into(),
            join_code: "LB2345".into(),
            presenter_token: "token".into(),
            status: SessionStatus::Live,
            started_at: Some(0),
            duration_seconds: None,
            questions: vec![QuestionEntity {
                id: "q1".into(),
                text: "q1?".into(),
                options: vec!["a".into(), "b".into()],
                correct_index: Some(0),
            }],
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn leaderboard_reaches_members_of_the_code_room() {
        let sessions = Arc::new(MemorySessionStore::new());
        let live = Arc::new(MemoryLiveStore::new(Duration::from_secs(60)));
        let rooms = RoomHub::new();
        let session_id = Uuid::new_v4();
        sessions.create_session(session(session_id)).await.unwrap();
        for (id, selected_index) in [("p1", 0), ("p2", 1)] {
            sessions
                .create_submission(
                    session_id,
                    SubmissionEntity {
                        participant_id: Some(id.into()),
                        display_name: id.to_uppercase(),
                        answers: vec![AnswerEntity {
                            question_id: "q1".into(),
                            selected_index,
                            correct: selected_index == 0,
                        }],
                        submitted_at: 1_000,
                    },
                )
                .await
                .unwrap();
        }
        live.set_room_meta(
            session_id,
            RoomMeta {
                join_code: Some("LB2345".into()),
                ..RoomMeta::default()
            },
        )
        .await
        .unwrap();
        live.update_score(session_id, "id:p1", 30, 1_000, "Ada").await.unwrap();
        live.update_score(session_id, "id:p2", 10, 1_000, "Bob").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Uuid::new_v4();
        rooms.connect(connection, tx);
        rooms.join(connection, &code_room("lb2345"));

        LeaderboardWorker::new(sessions, live, rooms, 10)
            .handle(LeaderboardJob {
                session_id,
                limit: 1,
            })
            .await
            .unwrap();

        let event = rx.try_recv().expect("leaderboard delivered");
        assert_eq!(event.event, room_events::EVENT_LEADERBOARD_UPDATE);
        let rows = event.data["leaderboard"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["display_name"], "Ada");
        assert_eq!(rows[0]["rank"], 1);

        let results = rx.try_recv().expect("results delivered");
        assert_eq!(results.event, room_events::EVENT_RESULT_UPDATE);
        assert_eq!(results.data["results"]["total_submissions"], 2);
        assert_eq!(results.data["results"]["questions"][0]["counts"], serde_json::json!([1, 1]));
        assert_eq!(results.data["results"]["leaderboard"][0]["participant_key"], "id:p1");
    }
}
