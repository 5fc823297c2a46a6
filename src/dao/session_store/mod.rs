pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{
    AnswerEntity, FullSessionEntity, ParticipantKey, QuestionEntity, SessionEntity, SessionStatus,
    SubmissionEntity,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

pub use self::memory::MemorySessionStore;

/// Durable store for sessions, their questions and participant submissions.
///
/// Submission writes are conditional single-document operations so concurrent answers are
/// arbitrated by the store rather than by read-modify-write in the caller.
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Returns `false` when the join code is already taken.
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Case-insensitive join code lookup.
    fn find_session_by_join_code(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Update the status. `started_at` is only recorded if the session has none yet.
    fn set_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        started_at: Option<i64>,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    fn add_question(
        &self,
        id: Uuid,
        question: QuestionEntity,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Delete the session and its submissions. Returns whether anything was removed.
    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;
    /// Append `answer` to the participant's submission if it has no answer for the same question.
    ///
    /// Returns `false` when no eligible submission exists (missing, or already answered).
    fn append_submission_answer(
        &self,
        session_id: Uuid,
        key: &ParticipantKey,
        answer: AnswerEntity,
        submitted_at: i64,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Whether the participant's submission already holds an answer for `question_id`.
    fn has_answered(
        &self,
        session_id: Uuid,
        key: &ParticipantKey,
        question_id: &str,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Insert a submission unless one already exists for the same participant key.
    fn create_submission(
        &self,
        session_id: Uuid,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_submission(
        &self,
        session_id: Uuid,
        key: &ParticipantKey,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>>;
    fn find_full_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<FullSessionEntity>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Normalise a join code the way it is stored.
pub fn normalize_join_code(code: &str) -> String {
    code.trim().to_uppercase()
}
