use std::{sync::Arc, time::Duration};

use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{live_store::LiveStore, models::now_millis},
    jobs::{JobError, JobHandler},
    services::room_events::{self, SessionTarget},
    state::rooms::RoomHub,
};

/// Expire one opening of a question once its duration elapsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionTimerJob {
    pub session_id: Uuid,
    pub question_id: String,
    /// Opening timestamp (epoch millis) of the round this timer belongs to.
    pub sent_at: i64,
    pub duration_seconds: u32,
}

impl QuestionTimerJob {
    /// Absolute deadline in epoch millis, so a redelivered job only waits for what is left.
    pub fn deadline_ms(&self) -> i64 {
        self.sent_at + i64::from(self.duration_seconds) * 1_000
    }
}

pub struct QuestionTimerWorker {
    live: Arc<dyn LiveStore>,
    rooms: RoomHub,
}

impl QuestionTimerWorker {
    pub fn new(live: Arc<dyn LiveStore>, rooms: RoomHub) -> Self {
        Self { live, rooms }
    }
}

impl JobHandler for QuestionTimerWorker {
    type Job = QuestionTimerJob;

    fn handle(&self, job: QuestionTimerJob) -> BoxFuture<'static, Result<(), JobError>> {
        let live = Arc::clone(&self.live);
        let rooms = self.rooms.clone();
        async move {
            let remaining = job.deadline_ms() - now_millis();
            if remaining > 0 {
                sleep(Duration::from_millis(remaining as u64)).await;
            }

            let still_active = live
                .active_question(job.session_id)
                .await?
                .is_some_and(|active| active.is_round(&job.question_id, job.sent_at));
            if !still_active {
                debug!(
                    session_id = %job.session_id,
                    question_id = %job.question_id,
                    "question superseded before its timer fired"
                );
                return Ok(());
            }

            if !live
                .mark_question_expired(job.session_id, &job.question_id, job.sent_at)
                .await?
            {
                debug!(session_id = %job.session_id, question_id = %job.question_id, "question already expired");
                return Ok(());
            }
            live.clear_respondents(job.session_id).await?;

            let join_code = live
                .room_meta(job.session_id)
                .await
                .ok()
                .flatten()
                .and_then(|meta| meta.join_code);
            info!(session_id = %job.session_id, question_id = %job.question_id, "question expired");
            room_events::broadcast_question_expired(
                &rooms,
                SessionTarget::new(job.session_id, join_code.as_deref()),
                &job.question_id,
                job.sent_at,
            );
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        dao::{
            live_store::{ActiveQuestion, MemoryLiveStore},
            models::PublicQuestion,
        },
        dto::events::ServerEvent,
        state::rooms::session_room,
    };

    fn active(question_id: &str, sent_at: i64) -> ActiveQuestion {
        ActiveQuestion {
            question: PublicQuestion {
                id: question_id.into(),
                text: "?".into(),
                options: vec!["a".into(), "b".into()],
            },
            sent_at,
            duration_seconds: Some(5),
        }
    }

    struct Fixture {
        live: Arc<MemoryLiveStore>,
        worker: Arc<QuestionTimerWorker>,
        events: mpsc::UnboundedReceiver<ServerEvent>,
        session_id: Uuid,
    }

    fn fixture() -> Fixture {
        let live = Arc::new(MemoryLiveStore::new(Duration::from_secs(600)));
        let rooms = RoomHub::new();
        let session_id = Uuid::new_v4();
        let (tx, events) = mpsc::unbounded_channel();
        let connection = Uuid::new_v4();
        rooms.connect(connection, tx);
        rooms.join(connection, &session_room(session_id));
        Fixture {
            worker: Arc::new(QuestionTimerWorker::new(live.clone(), rooms)),
            live,
            events,
            session_id,
        }
    }

    fn expired_events(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<String> {
        std::iter::from_fn(|| events.try_recv().ok())
            .filter(|event| event.event == room_events::EVENT_QUESTION_EXPIRED)
            .map(|event| event.data["question_id"].as_str().unwrap_or_default().to_owned())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_timer_expires_the_question_once() {
        let mut fx = fixture();
        let sent_at = now_millis();
        fx.live
            .set_active_question(fx.session_id, active("q1", sent_at))
            .await
            .unwrap();
        fx.live.record_respondent(fx.session_id, "c1", 0).await.unwrap();
        let job = QuestionTimerJob {
            session_id: fx.session_id,
            question_id: "q1".into(),
            sent_at,
            duration_seconds: 5,
        };

        let worker = fx.worker.clone();
        let timer = tokio::spawn(worker.handle(job.clone()));
        sleep(Duration::from_secs(4)).await;
        assert!(!timer.is_finished());
        timer.await.unwrap().unwrap();

        // Redelivery after expiry is a no-op.
        fx.worker.handle(job).await.unwrap();

        assert_eq!(expired_events(&mut fx.events), ["q1"]);
        assert!(!fx.live.has_responded(fx.session_id, "c1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_question_does_not_expire() {
        let mut fx = fixture();
        let sent_at = now_millis();
        fx.live
            .set_active_question(fx.session_id, active("q1", sent_at))
            .await
            .unwrap();
        let timer = tokio::spawn(fx.worker.handle(QuestionTimerJob {
            session_id: fx.session_id,
            question_id: "q1".into(),
            sent_at,
            duration_seconds: 5,
        }));

        sleep(Duration::from_secs(3)).await;
        fx.live
            .set_active_question(fx.session_id, active("q2", sent_at + 3_000))
            .await
            .unwrap();
        fx.live.record_respondent(fx.session_id, "c1", 1).await.unwrap();
        timer.await.unwrap().unwrap();

        assert!(expired_events(&mut fx.events).is_empty());
        assert!(fx.live.has_responded(fx.session_id, "c1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn reopening_the_same_question_starts_a_new_round() {
        let mut fx = fixture();
        let first = now_millis();
        fx.live
            .set_active_question(fx.session_id, active("q1", first))
            .await
            .unwrap();
        let timer = tokio::spawn(fx.worker.handle(QuestionTimerJob {
            session_id: fx.session_id,
            question_id: "q1".into(),
            sent_at: first,
            duration_seconds: 5,
        }));
        fx.live
            .set_active_question(fx.session_id, active("q1", first + 1))
            .await
            .unwrap();
        timer.await.unwrap().unwrap();

        assert!(expired_events(&mut fx.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn redelivery_after_expiry_keeps_later_respondents() {
        let mut fx = fixture();
        let sent_at = now_millis();
        fx.live
            .set_active_question(fx.session_id, active("q1", sent_at))
            .await
            .unwrap();
        let job = QuestionTimerJob {
            session_id: fx.session_id,
            question_id: "q1".into(),
            sent_at,
            duration_seconds: 5,
        };
        tokio::spawn(fx.worker.handle(job.clone()))
            .await
            .unwrap()
            .unwrap();

        // Someone is recorded after the expiry, then the same timer is delivered again.
        fx.live.record_respondent(fx.session_id, "c2", 1).await.unwrap();
        fx.worker.handle(job).await.unwrap();

        assert_eq!(expired_events(&mut fx.events), ["q1"]);
        assert!(fx.live.has_responded(fx.session_id, "c2").await.unwrap());
    }
}
