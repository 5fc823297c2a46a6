//! Ephemeral per-session state: room meta, the active question or question list, answer
//! tallies, the respondent set, the participant registry and the score ranking.
//!
//! Every key of a session shares one TTL window and is refreshed on write. Purging removes the
//! whole session as a unit.

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::{
    models::{PublicQuestion, Role, SessionStatus},
    storage::StorageResult,
};

pub use self::memory::MemoryLiveStore;

/// Default TTL window applied to every ephemeral key.
pub const DEFAULT_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Which kind of question state a session currently holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// One question at a time, with live tallies and an optional timer.
    SingleQuestion,
    /// The full question list is pushed at once; no tallies.
    QuestionList,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::SingleQuestion => "single_question",
            SessionMode::QuestionList => "question_list",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "single_question" => Some(SessionMode::SingleQuestion),
            "question_list" => Some(SessionMode::QuestionList),
            _ => None,
        }
    }
}

/// Room-level attributes. `None` fields are left untouched by [`LiveStore::set_room_meta`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomMeta {
    pub status: Option<SessionStatus>,
    pub started_at: Option<i64>,
    pub duration_seconds: Option<u32>,
    pub join_code: Option<String>,
}

impl RoomMeta {
    /// Overwrite the fields set in `update`.
    pub fn merge(&mut self, update: RoomMeta) {
        if update.status.is_some() {
            self.status = update.status;
        }
        if update.started_at.is_some() {
            self.started_at = update.started_at;
        }
        if update.duration_seconds.is_some() {
            self.duration_seconds = update.duration_seconds;
        }
        if update.join_code.is_some() {
            self.join_code = update.join_code;
        }
    }
}

/// The single question currently open in [`SessionMode::SingleQuestion`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveQuestion {
    pub question: PublicQuestion,
    /// Epoch millis when the question was opened; distinguishes re-openings of one question.
    pub sent_at: i64,
    pub duration_seconds: Option<u32>,
}

impl ActiveQuestion {
    /// Whether this is the same opening of `question_id` that was sent at `sent_at`.
    pub fn is_round(&self, question_id: &str, sent_at: i64) -> bool {
        self.question.id == question_id && self.sent_at == sent_at
    }
}

/// Registry entry for a connection that joined the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub role: Role,
    pub display_name: Option<String>,
    pub participant_id: Option<String>,
    pub joined_at: i64,
}

/// Leaderboard row read back from the score ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ScoreEntry {
    pub participant_key: String,
    pub display_name: String,
    pub score: u32,
    /// Dense 1-based position in the ranking.
    pub rank: u32,
}

/// Raw ranking entry before positions are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRecord {
    pub participant_key: String,
    pub display_name: String,
    pub score: u32,
    /// Millis between the session start and the participant's latest answer.
    pub elapsed_ms: i64,
}

/// Order the records the way the final results do (score descending, then elapsed time
/// ascending, then participant key) and assign dense ranks.
pub fn rank_scores(mut records: Vec<ScoreRecord>) -> Vec<ScoreEntry> {
    records.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.elapsed_ms.cmp(&b.elapsed_ms))
            .then_with(|| a.participant_key.cmp(&b.participant_key))
    });
    records
        .into_iter()
        .enumerate()
        .map(|(position, record)| ScoreEntry {
            participant_key: record.participant_key,
            display_name: record.display_name,
            score: record.score,
            rank: position as u32 + 1,
        })
        .collect()
}

/// Contract of the ephemeral state store, keyed by session.
///
/// Write operations fail with [`crate::dao::storage::StorageError`] when the backend is
/// unreachable. Only read paths may choose to degrade to "nothing cached".
pub trait LiveStore: Send + Sync {
    fn set_room_meta(&self, session: Uuid, meta: RoomMeta) -> BoxFuture<'static, StorageResult<()>>;
    fn room_meta(&self, session: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomMeta>>>;

    /// Open a question: replaces the active question, zeroes the tallies, clears the respondent
    /// set and drops any question list, all in one atomic step.
    fn set_active_question(
        &self,
        session: Uuid,
        question: ActiveQuestion,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn active_question(
        &self,
        session: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ActiveQuestion>>>;
    /// Drop the active question together with its tallies and respondents.
    fn clear_active_question(&self, session: Uuid) -> BoxFuture<'static, StorageResult<()>>;

    /// Switch to list mode: stores the list and drops any active question state atomically.
    fn set_question_list(
        &self,
        session: Uuid,
        questions: Vec<PublicQuestion>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn question_list(
        &self,
        session: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Vec<PublicQuestion>>>>;
    fn session_mode(&self, session: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionMode>>>;

    fn init_counts(&self, session: Uuid, options: usize) -> BoxFuture<'static, StorageResult<()>>;
    fn counts(&self, session: Uuid) -> BoxFuture<'static, StorageResult<Vec<u32>>>;
    fn set_counts(&self, session: Uuid, counts: Vec<u32>) -> BoxFuture<'static, StorageResult<()>>;
    /// Atomically add one to the slot and return the resulting tallies.
    fn increment_count(
        &self,
        session: Uuid,
        index: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<u32>>>;
    /// Atomically remove one from the slot (never below zero) and return the resulting tallies.
    fn decrement_count(
        &self,
        session: Uuid,
        index: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<u32>>>;

    /// Record the connection's answer for this round. Returns `false` if it already responded.
    fn record_respondent(
        &self,
        session: Uuid,
        connection: &str,
        index: u32,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn has_responded(
        &self,
        session: Uuid,
        connection: &str,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Remove the connection from the respondent set, returning the index it had chosen.
    fn remove_respondent(
        &self,
        session: Uuid,
        connection: &str,
    ) -> BoxFuture<'static, StorageResult<Option<u32>>>;
    fn clear_respondents(&self, session: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Set-once marker for one opening of a question. Returns `true` only for the first caller.
    fn mark_question_expired(
        &self,
        session: Uuid,
        question_id: &str,
        sent_at: i64,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    fn upsert_participant(
        &self,
        session: Uuid,
        connection: &str,
        info: ParticipantInfo,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn remove_participant(
        &self,
        session: Uuid,
        connection: &str,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn participants(
        &self,
        session: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<(String, ParticipantInfo)>>>;

    /// Record the participant's total score and the time it took them to reach it.
    ///
    /// Neither value ever decreases: a lower score or elapsed time is ignored.
    fn update_score(
        &self,
        session: Uuid,
        participant_key: &str,
        score: u32,
        elapsed_ms: i64,
        display_name: &str,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Highest scores first, ranked 1..N without gaps. See [`rank_scores`] for the order.
    fn top_scores(
        &self,
        session: Uuid,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreEntry>>>;
    fn rank(
        &self,
        session: Uuid,
        participant_key: &str,
    ) -> BoxFuture<'static, StorageResult<Option<ScoreEntry>>>;

    /// Delete every key of the session. Returns how many keys existed; purging twice is a no-op.
    fn purge_session(&self, session: Uuid) -> BoxFuture<'static, StorageResult<u64>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
