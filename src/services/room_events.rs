use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::{
        live_store::{ActiveQuestion, ScoreEntry, SessionMode},
        models::{PublicQuestion, now_millis},
    },
    dto::events::{
        AnswerReceivedEvent, AnswerUpdateEvent, DeletedEvent, ErrorEvent, FinishedEvent,
        LeaderboardUpdateEvent, QuestionEvent, QuestionExpiredEvent, QuestionListEvent,
        ResultUpdateEvent, ServerEvent, StatusUpdateEvent, StudentResultEvent,
    },
    error::ServiceError,
    services::stats::SessionStats,
    state::rooms::{RoomHub, session_rooms},
};

pub const EVENT_JOINED: &str = "quiz:joined";
pub const EVENT_QUESTION: &str = "quiz:question";
pub const EVENT_QUESTION_LIST: &str = "quiz:questionList";
pub const EVENT_ANSWER_UPDATE: &str = "quiz:answerUpdate";
pub const EVENT_ANSWER_RECEIVED: &str = "quiz:answerReceived";
pub const EVENT_ANSWER_ACCEPTED: &str = "quiz:answerAccepted";
pub const EVENT_LEADERBOARD_UPDATE: &str = "quiz:leaderboardUpdate";
pub const EVENT_RESULT_UPDATE: &str = "quiz:resultUpdate";
pub const EVENT_STUDENT_RESULT: &str = "quiz:studentResult";
pub const EVENT_STATUS_UPDATE: &str = "quiz:statusUpdate";
pub const EVENT_QUESTION_EXPIRED: &str = "quiz:questionExpired";
pub const EVENT_FINISHED: &str = "quiz:finished";
pub const EVENT_DELETED: &str = "quiz:deleted";
pub const EVENT_ERROR: &str = "quiz:error";

/// Target of a session-wide broadcast: the session room and, when known, the join-code room.
#[derive(Debug, Clone, Copy)]
pub struct SessionTarget<'a> {
    pub session_id: Uuid,
    pub join_code: Option<&'a str>,
}

impl<'a> SessionTarget<'a> {
    pub fn new(session_id: Uuid, join_code: Option<&'a str>) -> Self {
        Self {
            session_id,
            join_code,
        }
    }
}

/// Broadcast a newly opened question.
pub fn broadcast_question(rooms: &RoomHub, target: SessionTarget<'_>, active: &ActiveQuestion) {
    let payload = QuestionEvent {
        session_id: target.session_id,
        question: active.question.clone(),
        sent_at: active.sent_at,
        duration_seconds: active.duration_seconds,
        mode: SessionMode::SingleQuestion,
    };
    send_session_event(rooms, target, EVENT_QUESTION, &payload);
}

/// Broadcast a full question list replacement.
pub fn broadcast_question_list(
    rooms: &RoomHub,
    target: SessionTarget<'_>,
    questions: Vec<PublicQuestion>,
) {
    let payload = QuestionListEvent {
        session_id: target.session_id,
        questions,
        mode: SessionMode::QuestionList,
    };
    send_session_event(rooms, target, EVENT_QUESTION_LIST, &payload);
}

/// Broadcast the live tally of the active question.
pub fn broadcast_answer_update(
    rooms: &RoomHub,
    target: SessionTarget<'_>,
    question_id: &str,
    counts: Vec<u32>,
    last: Option<u32>,
) {
    let payload = AnswerUpdateEvent {
        question_id: question_id.to_owned(),
        counts,
        last,
    };
    send_session_event(rooms, target, EVENT_ANSWER_UPDATE, &payload);
}

pub fn broadcast_answer_received(
    rooms: &RoomHub,
    target: SessionTarget<'_>,
    payload: &AnswerReceivedEvent,
) {
    send_session_event(rooms, target, EVENT_ANSWER_RECEIVED, payload);
}

pub fn broadcast_leaderboard(
    rooms: &RoomHub,
    target: SessionTarget<'_>,
    leaderboard: Vec<ScoreEntry>,
) {
    let payload = LeaderboardUpdateEvent {
        session_id: target.session_id,
        leaderboard,
        updated_at: now_millis(),
    };
    send_session_event(rooms, target, EVENT_LEADERBOARD_UPDATE, &payload);
}

/// Broadcast the full results of the session.
pub fn broadcast_results(rooms: &RoomHub, target: SessionTarget<'_>, results: SessionStats) {
    let payload = ResultUpdateEvent {
        results,
        updated_at: now_millis(),
    };
    send_session_event(rooms, target, EVENT_RESULT_UPDATE, &payload);
}

/// Broadcast one participant's scored submission. Clients pick their own by participant key.
pub fn broadcast_student_result(
    rooms: &RoomHub,
    target: SessionTarget<'_>,
    payload: &StudentResultEvent,
) {
    send_session_event(rooms, target, EVENT_STUDENT_RESULT, payload);
}

pub fn broadcast_status(rooms: &RoomHub, target: SessionTarget<'_>, status: &StatusUpdateEvent) {
    send_session_event(rooms, target, EVENT_STATUS_UPDATE, status);
}

pub fn broadcast_question_expired(
    rooms: &RoomHub,
    target: SessionTarget<'_>,
    question_id: &str,
    sent_at: i64,
) {
    let payload = QuestionExpiredEvent {
        session_id: target.session_id,
        question_id: question_id.to_owned(),
        sent_at,
    };
    send_session_event(rooms, target, EVENT_QUESTION_EXPIRED, &payload);
}

pub fn broadcast_finished(rooms: &RoomHub, target: SessionTarget<'_>, finished_at: i64) {
    let payload = FinishedEvent {
        session_id: target.session_id,
        finished_at,
    };
    send_session_event(rooms, target, EVENT_FINISHED, &payload);
}

pub fn broadcast_deleted(rooms: &RoomHub, target: SessionTarget<'_>) {
    let payload = DeletedEvent {
        session_id: target.session_id,
    };
    send_session_event(rooms, target, EVENT_DELETED, &payload);
}

/// Push an event to one connection. Delivery failures are logged and swallowed.
pub fn send_to_connection(
    rooms: &RoomHub,
    connection: Uuid,
    event: &str,
    payload: &impl Serialize,
) {
    match ServerEvent::json(event, payload) {
        Ok(message) => {
            if let Err(err) = rooms.send_to(connection, message) {
                debug!(event, error = %err, "failed to deliver event");
            }
        }
        Err(err) => warn!(event, error = %err, "failed to serialize event payload"),
    }
}

/// Report a service error to one connection as `quiz:error`.
pub fn send_error(rooms: &RoomHub, connection: Uuid, err: &ServiceError) {
    let payload = ErrorEvent {
        code: err.client_code().to_owned(),
        message: err.client_message(),
    };
    send_to_connection(rooms, connection, EVENT_ERROR, &payload);
}

fn send_session_event(
    rooms: &RoomHub,
    target: SessionTarget<'_>,
    event: &str,
    payload: &impl Serialize,
) {
    match ServerEvent::json(event, payload) {
        Ok(message) => {
            let delivered = rooms.broadcast_many(
                &session_rooms(target.session_id, target.join_code),
                &message,
            );
            debug!(session_id = %target.session_id, event, delivered, "broadcast");
        }
        Err(err) => warn!(event, error = %err, "failed to serialize event payload"),
    }
}
