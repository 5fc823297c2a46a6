use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::{
        live_store::{ScoreEntry, SessionMode},
        models::{PublicQuestion, Role, SessionStatus},
    },
    services::stats::SessionStats,
};

#[derive(Clone, Debug, Serialize, PartialEq)]
/// Frame pushed to socket clients: `{ "event": ..., "data": ... }`.
pub struct ServerEvent {
    pub event: String,
    pub data: serde_json::Value,
}

impl ServerEvent {
    /// Serialise `payload` into the data field.
    pub fn json<T>(event: impl Into<String>, payload: &T) -> serde_json::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_value(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Acknowledges a join request.
pub struct JoinedEvent {
    pub session_id: Uuid,
    pub join_code: String,
    pub role: Role,
    pub connection_id: Uuid,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize, ToSchema)]
/// Session status with the server clock so clients can align countdowns.
pub struct StatusUpdateEvent {
    pub status: SessionStatus,
    pub started_at: Option<i64>,
    pub duration_seconds: Option<u32>,
    pub server_time: i64,
}

#[derive(Debug, Serialize, ToSchema)]
/// A question opened in single-question mode.
pub struct QuestionEvent {
    pub session_id: Uuid,
    pub question: PublicQuestion,
    pub sent_at: i64,
    pub duration_seconds: Option<u32>,
    pub mode: SessionMode,
}

#[derive(Debug, Serialize, ToSchema)]
/// Full question list replacement.
pub struct QuestionListEvent {
    pub session_id: Uuid,
    pub questions: Vec<PublicQuestion>,
    pub mode: SessionMode,
}

#[derive(Debug, Serialize, ToSchema)]
/// Live tally for the active question.
pub struct AnswerUpdateEvent {
    pub question_id: String,
    pub counts: Vec<u32>,
    /// Option that triggered the update, absent after a disconnect adjustment.
    pub last: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Presenter-facing notice that an answer was stored.
pub struct AnswerReceivedEvent {
    pub session_id: Uuid,
    pub question_id: String,
    pub participant_key: String,
    pub display_name: String,
    pub selected_index: u32,
    pub correct: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent to the submitter only.
pub struct AnswerAcceptedEvent {
    pub question_id: String,
    pub selected_index: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LeaderboardUpdateEvent {
    pub session_id: Uuid,
    pub leaderboard: Vec<ScoreEntry>,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Full results recomputed from the durable submissions.
pub struct ResultUpdateEvent {
    pub results: SessionStats,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, ToSchema)]
/// One graded answer of a participant's submission.
pub struct StudentAnswer {
    pub question_id: String,
    pub selected_index: u32,
    pub correct: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// A participant's submission after their latest answer was scored.
pub struct StudentResultEvent {
    pub session_id: Uuid,
    pub participant_key: String,
    pub participant_id: Option<String>,
    pub display_name: String,
    pub score: u32,
    pub correct_answers: u32,
    pub answers: Vec<StudentAnswer>,
    pub submitted_at: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QuestionExpiredEvent {
    pub session_id: Uuid,
    pub question_id: String,
    pub sent_at: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FinishedEvent {
    pub session_id: Uuid,
    pub finished_at: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeletedEvent {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
/// Terminal error reported to a socket client.
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
}
