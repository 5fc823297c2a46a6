use std::sync::Arc;

use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{
        live_store::LiveStore,
        models::{ParticipantKey, SessionEntity, SubmissionEntity},
        session_store::SessionStore,
    },
    dto::events::{StudentAnswer, StudentResultEvent},
    jobs::{JobError, JobHandler},
    services::{
        room_events::{self, SessionTarget},
        stats,
    },
    state::rooms::RoomHub,
};

/// Recompute one participant's score after an answer was stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreJob {
    pub session_id: Uuid,
    pub question_id: String,
    pub participant_key: ParticipantKey,
    pub display_name: String,
    pub selected_index: u32,
}

/// Total score of a submission: every answer re-graded against the authored question.
///
/// Answers to questions that no longer exist score nothing.
pub fn compute_score(
    session: &SessionEntity,
    submission: &SubmissionEntity,
    points_per_correct: u32,
) -> u32 {
    let correct = submission
        .answers
        .iter()
        .filter(|answer| {
            session
                .question(&answer.question_id)
                .is_some_and(|question| question.is_correct(answer.selected_index))
        })
        .count() as u32;
    correct.saturating_mul(points_per_correct)
}

/// The participant's submission graded against the authored questions.
pub fn student_result(
    session: &SessionEntity,
    key: &ParticipantKey,
    submission: &SubmissionEntity,
    score: u32,
) -> StudentResultEvent {
    let answers: Vec<StudentAnswer> = submission
        .answers
        .iter()
        .map(|answer| StudentAnswer {
            question_id: answer.question_id.clone(),
            selected_index: answer.selected_index,
            correct: session
                .question(&answer.question_id)
                .is_some_and(|question| question.is_correct(answer.selected_index)),
        })
        .collect();
    StudentResultEvent {
        session_id: session.id,
        participant_key: key.storage_key(),
        participant_id: submission.participant_id.clone(),
        display_name: submission.display_name.clone(),
        score,
        correct_answers: answers.iter().filter(|answer| answer.correct).count() as u32,
        answers,
        submitted_at: submission.submitted_at,
    }
}

/// Writes the recomputed total to the score ranking, then pushes the participant's graded
/// submission to the session rooms.
///
/// The total is derived from the full durable answer history, never added as a delta, so
/// running the same job again leaves the ranking unchanged.
pub struct ScoreWorker {
    sessions: Arc<dyn SessionStore>,
    live: Arc<dyn LiveStore>,
    rooms: RoomHub,
    points_per_correct: u32,
}

impl ScoreWorker {
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

impl JobHandler for ScoreWorker {
    type Job = ScoreJob;

    fn handle(&self, job: ScoreJob) -> BoxFuture<'static, Result<(), JobError>> {
        let sessions = Arc::clone(&self.sessions);
        let live = Arc::clone(&self.live);
        let rooms = self.rooms.clone();
        let points = self.points_per_correct;
        async move {
            let session = sessions
                .find_session(job.session_id)
                .await?
                .ok_or_else(|| JobError::Permanent(format!("session `{}` not found", job.session_id)))?;
            let question = session.question(&job.question_id).ok_or_else(|| {
                JobError::Permanent(format!("question `{}` not found", job.question_id))
            })?;
            let correct = question.is_correct(job.selected_index);

            let submission = sessions
                .find_submission(job.session_id, &job.participant_key)
                .await?
                .ok_or_else(|| {
                    JobError::Transient(format!(
                        "submission of `{}` not visible yet",
                        job.participant_key
                    ))
                })?;

            let score = compute_score(&session, &submission, points);
            let elapsed_ms = stats::elapsed_ms(session.started_at, submission.submitted_at);
            let display_name = if submission.display_name.is_empty() {
                job.display_name.as_str()
            } else {
                submission.display_name.as_str()
            };
            live.update_score(
                job.session_id,
                &job.participant_key.storage_key(),
                score,
                elapsed_ms,
                display_name,
            )
            .await?;

            let join_code = match live.room_meta(job.session_id).await {
                Ok(meta) => meta.and_then(|meta| meta.join_code),
                Err(err) => {
                    warn!(session_id = %job.session_id, error = %err, "room meta unavailable; using the stored join code");
                    None
                }
            }
            .unwrap_or_else(|| session.join_code.clone());
            room_events::broadcast_student_result(
                &rooms,
                SessionTarget::new(job.session_id, Some(&join_code)),
                &student_result(&session, &job.participant_key, &submission, score),
            );

            debug!(
                session_id = %job.session_id,
                participant = %job.participant_key,
                question_id = %job.question_id,
                correct,
                score,
                "score updated"
            );
            Ok(())
        }
        .boxed()
    }
}
