//! Presenter operations and session reads shared by the socket and HTTP surfaces.

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        live_store::{ActiveQuestion, RoomMeta, SessionMode},
        models::{PublicQuestion, SessionEntity, SessionStatus, now_millis},
        session_store::normalize_join_code,
    },
    dto::{
        events::StatusUpdateEvent,
        session::{
            CreateSessionRequest, CreateSessionResponse, LiveLeaderboardResponse, QuestionInput,
            SessionSummary,
        },
    },
    error::ServiceError,
    jobs::{
        EnqueueOptions,
        workers::{CleanupJob, QuestionTimerJob},
    },
    services::{
        room_events::{self, SessionTarget},
        stats::{self, SessionStats},
    },
    state::SharedState,
};

const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const JOIN_CODE_LENGTH: usize = 6;
const JOIN_CODE_ATTEMPTS: usize = 8;

/// Random join code drawn from an alphabet without look-alike characters.
pub fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LENGTH)
        .map(|_| JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Create a session with a fresh join code and presenter token.
pub async fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<CreateSessionResponse, ServiceError> {
    state.ensure_writable()?;
    let questions: Vec<_> = request
        .questions
        .into_iter()
        .map(QuestionInput::into_entity)
        .collect();
    let presenter_token = Uuid::new_v4().simple().to_string();

    for attempt in 1..=JOIN_CODE_ATTEMPTS {
        let session = SessionEntity {
            id: Uuid::new_v4(),
            title: request.title.trim().to_owned(),
            join_code: generate_join_code(),
            presenter_token: presenter_token.clone(),
            status: SessionStatus::Draft,
            started_at: None,
            duration_seconds: request.duration_seconds,
            questions: questions.clone(),
            created_at: now_millis(),
        };
        let (session_id, join_code) = (session.id, session.join_code.clone());
        if state.sessions().create_session(session).await? {
            info!(session_id = %session_id, join_code = %join_code, "session created");
            return Ok(CreateSessionResponse {
                session_id,
                join_code,
                presenter_token,
            });
        }
        warn!(attempt, join_code = %join_code, "join code collision");
    }

    Err(ServiceError::InvalidState(
        "could not allocate a unique join code".into(),
    ))
}

pub async fn find_session(state: &SharedState, id: Uuid) -> Result<SessionEntity, ServiceError> {
    state
        .sessions()
        .find_session(id)
        .await?
        .ok_or_else(|| ServiceError::SessionNotFound(id.to_string()))
}

/// Case-insensitive join code lookup.
pub async fn find_by_join_code(
    state: &SharedState,
    code: &str,
) -> Result<SessionEntity, ServiceError> {
    let code = normalize_join_code(code);
    state
        .sessions()
        .find_session_by_join_code(&code)
        .await?
        .ok_or(ServiceError::SessionNotFound(code))
}

pub async fn lookup_by_code(state: &SharedState, code: &str) -> Result<SessionSummary, ServiceError> {
    find_by_join_code(state, code)
        .await
        .map(|session| SessionSummary::from(&session))
}

/// Load the session and check the caller owns it.
pub async fn authorize_presenter(
    state: &SharedState,
    id: Uuid,
    token: Option<&str>,
) -> Result<SessionEntity, ServiceError> {
    let session = find_session(state, id).await?;
    ensure_presenter(&session, token)?;
    Ok(session)
}

pub fn ensure_presenter(session: &SessionEntity, token: Option<&str>) -> Result<(), ServiceError> {
    match token {
        Some(token) if token == session.presenter_token => Ok(()),
        _ => Err(ServiceError::Unauthorized(
            "presenter token missing or invalid".into(),
        )),
    }
}

/// Open a question in single-question mode and arm its timer.
pub async fn open_question(
    state: &SharedState,
    session: &SessionEntity,
    question_id: &str,
    duration_seconds: Option<u32>,
) -> Result<ActiveQuestion, ServiceError> {
    state.ensure_writable()?;
    let question = session
        .question(question_id)
        .ok_or_else(|| ServiceError::QuestionNotFound(question_id.to_owned()))?;
    let active = ActiveQuestion {
        question: PublicQuestion::from(question),
        sent_at: now_millis(),
        duration_seconds: duration_seconds.filter(|seconds| *seconds > 0),
    };
    state
        .live()
        .set_active_question(session.id, active.clone())
        .await?;

    room_events::broadcast_question(state.rooms(), target(session), &active);

    if let Some(duration_seconds) = active.duration_seconds {
        let job = QuestionTimerJob {
            session_id: session.id,
            question_id: active.question.id.clone(),
            sent_at: active.sent_at,
            duration_seconds,
        };
        if let Err(err) = state.jobs().question_timer().enqueue(job).await {
            warn!(session_id = %session.id, error = %err, "failed to arm question timer");
        }
    }
    info!(session_id = %session.id, question_id, "question opened");
    Ok(active)
}

/// Push the full question list and switch the session to list mode.
pub async fn publish_question_list(
    state: &SharedState,
    session: &SessionEntity,
) -> Result<Vec<PublicQuestion>, ServiceError> {
    state.ensure_writable()?;
    let questions: Vec<PublicQuestion> = session.questions.iter().map(PublicQuestion::from).collect();
    state
        .live()
        .set_question_list(session.id, questions.clone())
        .await?;
    room_events::broadcast_question_list(state.rooms(), target(session), questions.clone());
    Ok(questions)
}

/// Change the status durably, mirror it to the room and schedule cleanup when finished.
pub async fn change_status(
    state: &SharedState,
    session: &SessionEntity,
    status: SessionStatus,
) -> Result<StatusUpdateEvent, ServiceError> {
    state.ensure_writable()?;
    let now = now_millis();
    let started_at = (status == SessionStatus::Live).then_some(now);
    let updated = state
        .sessions()
        .set_session_status(session.id, status, started_at)
        .await?
        .ok_or_else(|| ServiceError::SessionNotFound(session.id.to_string()))?;

    state
        .live()
        .set_room_meta(
            updated.id,
            RoomMeta {
                status: Some(updated.status),
                started_at: updated.started_at,
                duration_seconds: updated.duration_seconds,
                join_code: Some(updated.join_code.clone()),
            },
        )
        .await?;

    let event = status_event(&updated);
    room_events::broadcast_status(state.rooms(), target(&updated), &event);

    if status == SessionStatus::Finished {
        room_events::broadcast_finished(state.rooms(), target(&updated), now);
        let job = CleanupJob {
            session_id: updated.id,
        };
        let options =
            EnqueueOptions::delayed(state.config().cleanup_delay).with_dedup_key(job.dedup_key());
        if let Err(err) = state.jobs().cleanup().enqueue_with(job, options).await {
            warn!(session_id = %updated.id, error = %err, "failed to schedule cleanup");
        }
    }
    info!(session_id = %updated.id, status = status.as_str(), "session status changed");
    Ok(event)
}

/// Append a question and push the full list replacement to the rooms.
///
/// A session in list mode also gets its stored list replaced, so late joiners catch up on the
/// new question.
pub async fn add_question(
    state: &SharedState,
    session: &SessionEntity,
    input: QuestionInput,
) -> Result<SessionSummary, ServiceError> {
    state.ensure_writable()?;
    let question = input.into_entity();
    if session.question(&question.id).is_some() {
        return Err(ServiceError::InvalidInput(format!(
            "question `{}` already exists",
            question.id
        )));
    }
    let updated = state
        .sessions()
        .add_question(session.id, question)
        .await?
        .ok_or_else(|| ServiceError::SessionNotFound(session.id.to_string()))?;
    let questions: Vec<PublicQuestion> = updated.questions.iter().map(PublicQuestion::from).collect();
    match state.live().session_mode(updated.id).await {
        Ok(Some(SessionMode::QuestionList)) => {
            if let Err(err) = state
                .live()
                .set_question_list(updated.id, questions.clone())
                .await
            {
                warn!(session_id = %updated.id, error = %err, "stored question list not refreshed");
            }
        }
        Ok(_) => {}
        Err(err) => warn!(session_id = %updated.id, error = %err, "session mode unavailable"),
    }
    room_events::broadcast_question_list(state.rooms(), target(&updated), questions);
    Ok(SessionSummary::from(&updated))
}

/// Delete the session, tell the rooms and drop its ephemeral state.
pub async fn delete_session(state: &SharedState, session: &SessionEntity) -> Result<(), ServiceError> {
    state.ensure_writable()?;
    if !state.sessions().delete_session(session.id).await? {
        return Err(ServiceError::SessionNotFound(session.id.to_string()));
    }
    room_events::broadcast_deleted(state.rooms(), target(session));
    match state.live().purge_session(session.id).await {
        Ok(removed) => info!(session_id = %session.id, removed, "session deleted"),
        Err(err) => warn!(session_id = %session.id, error = %err, "session deleted; ephemeral state left to expire"),
    }
    Ok(())
}

/// Results computed over every stored submission.
pub async fn results(state: &SharedState, id: Uuid) -> Result<SessionStats, ServiceError> {
    let full = state
        .sessions()
        .find_full_session(id)
        .await?
        .ok_or_else(|| ServiceError::SessionNotFound(id.to_string()))?;
    Ok(stats::aggregate(
        &full.session,
        &full.submissions,
        state.config().points_per_correct,
    ))
}

/// Ranking as currently held by the ephemeral store.
pub async fn live_leaderboard(
    state: &SharedState,
    id: Uuid,
) -> Result<LiveLeaderboardResponse, ServiceError> {
    let session = find_session(state, id).await?;
    let leaderboard = state
        .live()
        .top_scores(session.id, state.config().leaderboard_limit)
        .await?;
    Ok(LiveLeaderboardResponse {
        session_id: session.id,
        leaderboard,
    })
}

pub fn status_event(session: &SessionEntity) -> StatusUpdateEvent {
    StatusUpdateEvent {
        status: session.status,
        started_at: session.started_at,
        duration_seconds: session.duration_seconds,
        server_time: now_millis(),
    }
}

fn target(session: &SessionEntity) -> SessionTarget<'_> {
    SessionTarget::new(session.id, Some(session.join_code.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_codes_use_the_unambiguous_alphabet() {
        for _ in 0..100 {
            let code = generate_join_code();
            assert_eq!(code.len(), JOIN_CODE_LENGTH);
            assert!(code.bytes().all(|byte| JOIN_CODE_ALPHABET.contains(&byte)));
            assert!(!code.contains(['0', 'O', '1', 'I']));
        }
    }
}
